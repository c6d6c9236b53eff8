//! Diagnosis prompt construction

use crate::fault::Fault;
use serde_json::Value;

const HEADER: &str = "I received the following stack trace from a Rust application. \
Please analyze the error and provide a diagnosis that includes:\n\
1. The specific file and line number where the error occurred\n\
2. A clear explanation of what went wrong\n\
3. Suggestions for fixing the issue\n\n";

const CLOSING: &str = "Format your response as a concise paragraph that includes the pertinent \
file name (do not include the full path), explanation, and fix. If file and line information \
is available, always reference it.";

/// Request/response shape of the route a fault happened on
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaContext {
    /// Declared request body schema
    pub request_schema: Option<Value>,
    /// Declared response body schema
    pub response_schema: Option<Value>,
    /// The request body as received
    pub request_body: Option<Value>,
}

impl SchemaContext {
    fn is_empty(&self) -> bool {
        self.request_schema.is_none() && self.response_schema.is_none() && self.request_body.is_none()
    }
}

/// Everything one diagnosis call sends to the backend
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosisRequest {
    /// `Kind: message`
    pub summary: String,
    /// Rendered stack trace, embedded verbatim
    pub stack_trace: String,
    /// Route context, when the fault came through the middleware
    pub context: Option<SchemaContext>,
    /// Instruction replacing the default template
    pub custom_prompt: Option<String>,
}

impl DiagnosisRequest {
    /// Request for a fault
    #[must_use]
    pub fn from_fault(fault: &Fault) -> Self {
        Self {
            summary: fault.summary(),
            stack_trace: fault.render(),
            context: None,
            custom_prompt: None,
        }
    }

    /// Request for trace text obtained elsewhere (a log, a crash report)
    #[must_use]
    pub fn from_trace(trace: impl Into<String>) -> Self {
        let stack_trace = trace.into();
        let summary = stack_trace
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
            .to_string();
        Self {
            summary,
            stack_trace,
            context: None,
            custom_prompt: None,
        }
    }

    /// Attach route context
    #[must_use]
    pub fn with_context(mut self, context: SchemaContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Replace the default instruction template
    #[must_use]
    pub fn with_custom_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.custom_prompt = Some(prompt.into());
        self
    }
}

/// Build the prompt text for one request
#[must_use]
pub fn build_prompt(request: &DiagnosisRequest) -> String {
    let mut prompt = String::new();

    match &request.custom_prompt {
        Some(custom) => {
            prompt.push_str(custom.trim_end());
            prompt.push_str("\n\n");
        }
        None => prompt.push_str(HEADER),
    }

    prompt.push_str("Stack Trace:\n");
    prompt.push_str(&request.stack_trace);
    if !request.stack_trace.ends_with('\n') {
        prompt.push('\n');
    }

    if let Some(context) = request.context.as_ref().filter(|c| !c.is_empty()) {
        push_section(&mut prompt, "Request Schema", context.request_schema.as_ref());
        push_section(&mut prompt, "Response Schema", context.response_schema.as_ref());
        push_section(&mut prompt, "Request Data", context.request_body.as_ref());
    }

    if request.custom_prompt.is_none() {
        prompt.push('\n');
        prompt.push_str(CLOSING);
    }

    prompt
}

fn push_section(prompt: &mut String, label: &str, value: Option<&Value>) {
    let Some(value) = value else {
        return;
    };
    let rendered = match value {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    prompt.push('\n');
    prompt.push_str(label);
    prompt.push_str(":\n");
    prompt.push_str(&rendered);
    prompt.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultKind;
    use crate::trace::{Frame, StackTrace};
    use serde_json::json;

    fn sample_fault() -> Fault {
        let trace = StackTrace::from_frames(vec![
            Frame::new("shop::checkout::total").at("src/checkout.rs", 42, Some(9))
        ]);
        Fault::with_trace(FaultKind::DivideByZero, "attempt to divide by zero", trace)
    }

    #[test]
    fn test_default_template() {
        let prompt = build_prompt(&DiagnosisRequest::from_fault(&sample_fault()));

        assert!(prompt.starts_with("I received the following stack trace"));
        assert!(prompt.contains("1. The specific file and line number"));
        assert!(prompt.contains("Stack Trace:\nDivideByZero: attempt to divide by zero\n"));
        assert!(prompt.contains("src/checkout.rs:42:9"));
        assert!(prompt.ends_with(CLOSING));
        assert!(!prompt.contains("Request Schema"));
    }

    #[test]
    fn test_custom_prompt_replaces_template() {
        let request = DiagnosisRequest::from_fault(&sample_fault())
            .with_custom_prompt("Explain this arithmetic bug to a junior developer.");
        let prompt = build_prompt(&request);

        assert!(prompt.starts_with("Explain this arithmetic bug"));
        assert!(!prompt.contains("I received the following"));
        assert!(!prompt.contains(CLOSING));
        assert!(prompt.contains("Stack Trace:\n"));
    }

    #[test]
    fn test_schema_context_sections() {
        let request = DiagnosisRequest::from_fault(&sample_fault()).with_context(SchemaContext {
            request_schema: Some(json!({"type": "object", "required": ["name"]})),
            response_schema: None,
            request_body: Some(json!({"name": ""})),
        });
        let prompt = build_prompt(&request);

        let schema_at = prompt.find("Request Schema:\n").unwrap();
        let data_at = prompt.find("Request Data:\n").unwrap();
        assert!(schema_at < data_at);
        assert!(prompt.contains("\"required\""));
        assert!(!prompt.contains("Response Schema"));
    }

    #[test]
    fn test_raw_body_is_embedded_as_text() {
        let request = DiagnosisRequest::from_trace("boom").with_context(SchemaContext {
            request_body: Some(Value::String("not json at all".into())),
            ..SchemaContext::default()
        });
        assert!(build_prompt(&request).contains("Request Data:\nnot json at all\n"));
    }

    #[test]
    fn test_from_trace_summary_is_first_line() {
        let request = DiagnosisRequest::from_trace(
            "\nthread 'main' panicked at src/main.rs:4:5:\nindex out of bounds\n",
        );
        assert_eq!(request.summary, "thread 'main' panicked at src/main.rs:4:5:");
    }
}
