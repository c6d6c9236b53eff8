//! Diagnosis engine
//!
//! A [`Diagnoser`] owns resolved settings, the compiled dispatch policy and
//! one backend handle. Every diagnosis is a single backend round-trip; the
//! result is never cached and a failed call is never retried.

use crate::error::{Error, Result};
use crate::fault::Fault;
use crate::policy::{DispatchPolicy, HandlingMode};
use crate::prompt::{build_prompt, DiagnosisRequest};
use crate::runtime;
use crate::settings::{clamp_temperature, validate_model, Provider, Settings};
use catcher_llm::{
    CompletionRequest, LlmProvider, Message, OllamaConfig, OllamaProvider, OpenAiConfig,
    OpenAiProvider,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

const RULE_WIDTH: usize = 80;

/// Where printed diagnoses go
pub type OutputSink = Arc<dyn Fn(&str) + Send + Sync>;

/// How a diagnosis string is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagnosisFormat {
    /// Wrapped in a rule/title/rule banner for terminals
    #[default]
    Banner,
    /// The model's text, unmodified
    Plain,
}

impl DiagnosisFormat {
    /// Apply the format to a diagnosis text
    #[must_use]
    pub fn apply(&self, text: &str) -> String {
        match self {
            Self::Banner => banner(text),
            Self::Plain => text.to_string(),
        }
    }
}

/// Wrap `text` in the terminal banner
#[must_use]
pub fn banner(text: &str) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    format!("\n{rule}\nLLM DIAGNOSIS\n{rule}\n{text}\n{rule}\n")
}

/// Fallback text returned when the backend could not be reached
#[must_use]
pub fn failure_message(err: &Error) -> String {
    format!("Failed to contact LLM for diagnosis. Error: {err}")
}

/// Diagnoses faults through a language-model backend
pub struct Diagnoser {
    settings: Settings,
    policy: DispatchPolicy,
    provider: Arc<dyn LlmProvider>,
    output: OutputSink,
}

impl fmt::Debug for Diagnoser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnoser")
            .field("settings", &self.settings)
            .field("policy", &self.policy)
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

impl Diagnoser {
    /// Create a diagnoser with the backend named by `settings`
    ///
    /// # Errors
    /// Returns `Error::Configuration` if validation fails and
    /// `Error::Backend` if the backend client cannot be built
    pub fn new(settings: Settings) -> Result<Self> {
        let settings = settings.validate()?;
        let provider = build_provider(&settings)?;
        Ok(Self::assemble(settings, provider))
    }

    /// Create a diagnoser from the environment and config file
    ///
    /// # Errors
    /// Same as [`Settings::resolve`] and [`Diagnoser::new`]
    pub fn from_env() -> Result<Self> {
        info!("Loading settings from environment/config files");
        Self::new(Settings::resolve()?)
    }

    /// Create a diagnoser with an injected backend
    ///
    /// The settings are normalized but no credential is required.
    #[must_use]
    pub fn with_provider(settings: Settings, provider: Arc<dyn LlmProvider>) -> Self {
        Self::assemble(settings.normalized(), provider)
    }

    fn assemble(settings: Settings, provider: Arc<dyn LlmProvider>) -> Self {
        info!(
            provider = provider.name(),
            model = %settings.llm_model,
            temperature = settings.temperature,
            "LLM diagnoser configured"
        );
        let policy = DispatchPolicy::from_settings(&settings);
        Self {
            settings,
            policy,
            provider,
            output: Arc::new(|text: &str| eprintln!("{text}")),
        }
    }

    /// Send printed diagnoses somewhere other than stderr
    #[must_use]
    pub fn with_output<F>(mut self, sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.output = Arc::new(sink);
        self
    }

    /// Write text to the output sink
    pub fn report(&self, text: &str) {
        (self.output)(text);
    }

    /// Resolved settings
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Compiled dispatch policy
    #[must_use]
    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Mode implied by the handled list
    #[must_use]
    pub fn mode(&self) -> HandlingMode {
        self.policy.mode()
    }

    /// Whether `fault` is eligible under the configured mode
    #[must_use]
    pub fn should_handle(&self, fault: &Fault) -> bool {
        self.policy.should_handle(fault, self.policy.mode())
    }

    /// Backend name (`openai`, `ollama`, ...)
    #[must_use]
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Current model
    #[must_use]
    pub fn model(&self) -> &str {
        &self.settings.llm_model
    }

    /// Change the model for subsequent diagnoses
    ///
    /// Unknown hosted models are replaced the same way as at resolution.
    pub fn set_model(&mut self, model: impl AsRef<str>) {
        self.settings.llm_model = validate_model(self.settings.provider, model.as_ref());
        debug!("Model updated to: {}", self.settings.llm_model);
    }

    /// Current temperature
    #[must_use]
    pub fn temperature(&self) -> f32 {
        self.settings.temperature
    }

    /// Change the temperature for subsequent diagnoses (clamped into [0, 1])
    pub fn set_temperature(&mut self, value: f32) {
        self.settings.temperature = clamp_temperature(value);
        debug!("Temperature updated to: {}", self.settings.temperature);
    }

    /// Diagnosis request for `fault`, with its custom prompt if one is set
    #[must_use]
    pub fn prepare_request(&self, fault: &Fault) -> DiagnosisRequest {
        let request = DiagnosisRequest::from_fault(fault);
        match self.policy.custom_prompt(fault) {
            Some(custom) => request.with_custom_prompt(custom),
            None => request,
        }
    }

    /// Diagnose a fault
    ///
    /// Never fails: a backend error becomes the returned text.
    pub async fn async_diagnose(&self, fault: &Fault, format: DiagnosisFormat) -> String {
        debug!(kind = %fault.kind(), "Diagnosing error: {}", fault.message());
        self.async_diagnose_request(self.prepare_request(fault), format)
            .await
    }

    /// Blocking [`Diagnoser::async_diagnose`]
    pub fn diagnose(&self, fault: &Fault, format: DiagnosisFormat) -> String {
        runtime::block_on(self.async_diagnose(fault, format)).unwrap_or_else(|e| {
            error!("Error during diagnosis: {e}");
            failure_message(&e)
        })
    }

    /// Diagnose a prepared request
    pub async fn async_diagnose_request(
        &self,
        request: DiagnosisRequest,
        format: DiagnosisFormat,
    ) -> String {
        match self.try_diagnose(&request).await {
            Ok(text) => format.apply(&text),
            Err(e) => {
                error!("Error during diagnosis: {e}");
                failure_message(&e)
            }
        }
    }

    /// Blocking [`Diagnoser::async_diagnose_request`]
    pub fn diagnose_request(&self, request: DiagnosisRequest, format: DiagnosisFormat) -> String {
        runtime::block_on(self.async_diagnose_request(request, format)).unwrap_or_else(|e| {
            error!("Error during diagnosis: {e}");
            failure_message(&e)
        })
    }

    /// One backend round-trip, without the fallback text
    ///
    /// # Errors
    /// Returns `Error::Backend` when the backend call fails
    #[instrument(skip(self, request), fields(provider = %self.provider.name(), model = %self.settings.llm_model))]
    pub async fn try_diagnose(&self, request: &DiagnosisRequest) -> Result<String> {
        info!("Diagnosing error with {}", self.provider.name());

        let completion = CompletionRequest::new(&self.settings.llm_model)
            .with_message(Message::user(build_prompt(request)))
            .with_temperature(self.settings.temperature);

        let response = self.provider.complete(completion).await?;
        Ok(response.content.trim().to_string())
    }
}

fn build_provider(settings: &Settings) -> Result<Arc<dyn LlmProvider>> {
    let timeout = Duration::from_secs(settings.request_timeout_secs);

    match settings.provider {
        Provider::OpenAi => {
            let key = settings.openai_api_key.clone().unwrap_or_default();
            let mut config = OpenAiConfig::new(key)
                .with_model(&settings.llm_model)
                .with_timeout(timeout);
            if let Some(url) = &settings.openai_base_url {
                config = config.with_base_url(url);
            }
            info!("Using OpenAI provider with model: {}", settings.llm_model);
            Ok(Arc::new(OpenAiProvider::new(config)?))
        }
        Provider::Ollama => {
            let mut config = OllamaConfig::new()
                .with_model(&settings.llm_model)
                .with_timeout(timeout);
            if let Some(url) = &settings.ollama_base_url {
                config = config.with_base_url(url);
            }
            info!("Using Ollama provider with model: {}", settings.llm_model);
            Ok(Arc::new(OllamaProvider::new(config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultKind;
    use crate::trace::{Frame, StackTrace};
    use catcher_llm::MockProvider;

    fn fault() -> Fault {
        let trace = StackTrace::from_frames(vec![
            Frame::new("shop::checkout::total").at("src/checkout.rs", 42, Some(9))
        ]);
        Fault::with_trace(FaultKind::DivideByZero, "attempt to divide by zero", trace)
    }

    fn unreachable_ollama() -> Diagnoser {
        // Nothing listens on port 1
        Diagnoser::new(
            Settings::ollama("llama3.2")
                .with_ollama_base_url("http://127.0.0.1:1")
                .with_temperature(0.2),
        )
        .unwrap()
    }

    #[test]
    fn test_banner_layout() {
        let rule = "=".repeat(80);
        assert_eq!(
            banner("Check line 42."),
            format!("\n{rule}\nLLM DIAGNOSIS\n{rule}\nCheck line 42.\n{rule}\n")
        );
    }

    #[tokio::test]
    async fn test_banner_wraps_plain_text() {
        let mock = MockProvider::new();
        mock.push_reply("  Line 42 divides by zero.  \n");
        mock.push_reply("Line 42 divides by zero.");
        let diagnoser = Diagnoser::with_provider(Settings::default(), Arc::new(mock));

        let banner = diagnoser.async_diagnose(&fault(), DiagnosisFormat::Banner).await;
        let plain = diagnoser.async_diagnose(&fault(), DiagnosisFormat::Plain).await;

        assert_eq!(plain, "Line 42 divides by zero.");
        let rule = "=".repeat(80);
        assert!(banner.contains(&format!("{rule}\n{plain}\n{rule}")));
    }

    #[tokio::test]
    async fn test_single_user_message_with_settings() {
        let mock = MockProvider::new();
        let settings = Settings::default().with_model("gpt-4o").with_temperature(0.7);
        let diagnoser = Diagnoser::with_provider(settings, Arc::new(mock.clone()));

        diagnoser.async_diagnose(&fault(), DiagnosisFormat::Plain).await;

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "gpt-4o");
        assert_eq!(requests[0].temperature, Some(0.7));
        assert_eq!(requests[0].messages.len(), 1);
        assert!(requests[0].messages[0].content.contains("src/checkout.rs:42:9"));
    }

    #[tokio::test]
    async fn test_no_cache_each_call_reaches_backend() {
        let mock = MockProvider::new();
        let diagnoser = Diagnoser::with_provider(Settings::default(), Arc::new(mock.clone()));

        diagnoser.async_diagnose(&fault(), DiagnosisFormat::Plain).await;
        diagnoser.async_diagnose(&fault(), DiagnosisFormat::Plain).await;

        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_custom_prompt_from_policy() {
        let mock = MockProvider::new();
        let settings =
            Settings::default().with_custom_handler("DivideByZero", "Explain the arithmetic.");
        let diagnoser = Diagnoser::with_provider(settings, Arc::new(mock.clone()));

        diagnoser.async_diagnose(&fault(), DiagnosisFormat::Plain).await;

        let prompt = &mock.requests()[0].messages[0].content;
        assert!(prompt.starts_with("Explain the arithmetic."));
        assert!(!prompt.contains("I received the following"));
    }

    #[tokio::test]
    async fn test_backend_failure_becomes_text() {
        let diagnoser = Diagnoser::with_provider(
            Settings::default(),
            Arc::new(MockProvider::failing("connection reset")),
        );

        let text = diagnoser.async_diagnose(&fault(), DiagnosisFormat::Banner).await;
        assert!(text.starts_with("Failed to contact LLM for diagnosis. Error:"));
        assert!(text.contains("connection reset"));

        let err = diagnoser
            .try_diagnose(&DiagnosisRequest::from_fault(&fault()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend(catcher_llm::Error::Network(_))));
    }

    #[tokio::test]
    async fn test_async_connection_failure_returns_failure_string() {
        let text = unreachable_ollama()
            .async_diagnose(&fault(), DiagnosisFormat::Banner)
            .await;
        assert!(text.contains("Failed to contact LLM for diagnosis"));
    }

    #[test]
    fn test_blocking_connection_failure_returns_failure_string() {
        let text = unreachable_ollama().diagnose(&fault(), DiagnosisFormat::Plain);
        assert!(text.contains("Failed to contact LLM for diagnosis"));
    }

    #[test]
    fn test_blocking_and_async_send_identical_prompts() {
        let mock = MockProvider::new();
        let diagnoser = Diagnoser::with_provider(Settings::default(), Arc::new(mock.clone()));
        let fault = fault();

        let blocking = diagnoser.diagnose(&fault, DiagnosisFormat::Banner);
        let asynchronous =
            tokio_test::block_on(diagnoser.async_diagnose(&fault, DiagnosisFormat::Banner));

        assert_eq!(blocking, asynchronous);
        let requests = mock.requests();
        assert_eq!(requests[0].messages, requests[1].messages);
    }

    #[test]
    fn test_openai_without_key_is_rejected() {
        let result = Diagnoser::new(Settings::default());
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_setters() {
        let mut diagnoser =
            Diagnoser::with_provider(Settings::default(), Arc::new(MockProvider::new()));

        diagnoser.set_temperature(5.0);
        assert_eq!(diagnoser.temperature(), 1.0);
        diagnoser.set_temperature(-1.0);
        assert_eq!(diagnoser.temperature(), 0.0);

        diagnoser.set_model("gpt-4o");
        assert_eq!(diagnoser.model(), "gpt-4o");
        diagnoser.set_model("made-up-model");
        assert_eq!(diagnoser.model(), catcher_llm::openai::FALLBACK_MODEL);
    }

    #[test]
    fn test_output_sink() {
        let captured = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&captured);
        let diagnoser = Diagnoser::with_provider(Settings::default(), Arc::new(MockProvider::new()))
            .with_output(move |text| sink.lock().unwrap().push(text.to_string()));

        diagnoser.report("hello");
        assert_eq!(captured.lock().unwrap().as_slice(), ["hello"]);
    }
}
