//! Faults: the normalised form of every failure an adapter intercepts
//!
//! A [`Fault`] is built from a panic or from an error value. Its
//! [`FaultKind`] is what the dispatch policy matches against configured
//! kind names.

use crate::trace::{Frame, StackTrace};
use std::any::Any;
use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::panic::PanicHookInfo;
use std::sync::{Arc, OnceLock};

/// Failure category
///
/// The closed variants cover the failures the standard library produces.
/// Anything else is `Other`, named by the short type name of the error
/// (`ParseConfigError`, `sqlx::Error` → `Error`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Panic with no more specific category
    Panic,
    /// Integer division or remainder by zero
    DivideByZero,
    /// Arithmetic overflow
    Overflow,
    /// Slice or vector index out of bounds
    IndexOutOfBounds,
    /// `unwrap()` on `None`
    UnwrapNone,
    /// Input rejected by validation
    InvalidInput,
    /// Missing file, key or record
    NotFound,
    /// Permission denied
    PermissionDenied,
    /// Other I/O failure
    Io,
    /// Parsing or deserialization failure
    Parse,
    /// Operation timed out
    Timeout,
    /// Interrupted by the user or the OS
    Interrupted,
    /// Open-ended kind, matched by name
    Other(String),
}

impl FaultKind {
    /// Name used in settings (`handled_exceptions`, `custom_handlers`, ...)
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Panic => "Panic",
            Self::DivideByZero => "DivideByZero",
            Self::Overflow => "Overflow",
            Self::IndexOutOfBounds => "IndexOutOfBounds",
            Self::UnwrapNone => "UnwrapNone",
            Self::InvalidInput => "InvalidInput",
            Self::NotFound => "NotFound",
            Self::PermissionDenied => "PermissionDenied",
            Self::Io => "Io",
            Self::Parse => "Parse",
            Self::Timeout => "Timeout",
            Self::Interrupted => "Interrupted",
            Self::Other(name) => name,
        }
    }

    /// Inverse of [`FaultKind::name`]; exact, case-sensitive
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "Panic" => Self::Panic,
            "DivideByZero" => Self::DivideByZero,
            "Overflow" => Self::Overflow,
            "IndexOutOfBounds" => Self::IndexOutOfBounds,
            "UnwrapNone" => Self::UnwrapNone,
            "InvalidInput" => Self::InvalidInput,
            "NotFound" => Self::NotFound,
            "PermissionDenied" => Self::PermissionDenied,
            "Io" => Self::Io,
            "Parse" => Self::Parse,
            "Timeout" => Self::Timeout,
            "Interrupted" => Self::Interrupted,
            other => Self::Other(other.to_string()),
        }
    }

    fn from_io(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::InvalidInput => Self::InvalidInput,
            io::ErrorKind::InvalidData => Self::Parse,
            io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::Interrupted => Self::Interrupted,
            _ => Self::Io,
        }
    }

    /// Classify a panic message produced by the standard library
    fn from_panic_message(message: &str) -> Self {
        if message.starts_with("attempt to divide by zero")
            || message.starts_with("attempt to calculate the remainder with a divisor of zero")
        {
            Self::DivideByZero
        } else if message.starts_with("attempt to") && message.ends_with("with overflow") {
            Self::Overflow
        } else if message.contains("index out of bounds") {
            Self::IndexOutOfBounds
        } else if message.contains("called `Option::unwrap()` on a `None` value") {
            Self::UnwrapNone
        } else {
            Self::Panic
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stack of a fault, symbolized on first use
///
/// Capturing only walks the stack; frames are resolved and parsed when the
/// trace is first read, which for most `?` conversions is never.
#[derive(Clone)]
struct TraceCell {
    captured: Option<Arc<Backtrace>>,
    parsed: Arc<OnceLock<StackTrace>>,
}

impl TraceCell {
    fn capture() -> Self {
        Self {
            captured: Some(Arc::new(Backtrace::force_capture())),
            parsed: Arc::new(OnceLock::new()),
        }
    }

    fn ready(trace: StackTrace) -> Self {
        Self {
            captured: None,
            parsed: Arc::new(OnceLock::from(trace)),
        }
    }

    fn get(&self) -> &StackTrace {
        self.parsed.get_or_init(|| {
            self.captured
                .as_deref()
                .map(|backtrace| StackTrace::parse(&backtrace.to_string()))
                .unwrap_or_default()
        })
    }

    #[cfg(test)]
    fn is_resolved(&self) -> bool {
        self.parsed.get().is_some()
    }
}

impl fmt::Debug for TraceCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parsed.get() {
            Some(trace) => trace.fmt(f),
            None => f.write_str("StackTrace(<unresolved>)"),
        }
    }
}

/// An intercepted failure
///
/// `Fault` deliberately does not implement `std::error::Error`, so that any
/// error type converts into it with `?`.
#[derive(Debug, Clone)]
pub struct Fault {
    kind: FaultKind,
    parents: Vec<FaultKind>,
    message: String,
    trace: TraceCell,
}

impl Fault {
    /// Create a fault, capturing the current stack
    #[must_use]
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            parents: Vec::new(),
            message: message.into(),
            trace: TraceCell::capture(),
        }
    }

    /// Create a fault with an explicit trace
    #[must_use]
    pub fn with_trace(kind: FaultKind, message: impl Into<String>, trace: StackTrace) -> Self {
        Self {
            kind,
            parents: Vec::new(),
            message: message.into(),
            trace: TraceCell::ready(trace),
        }
    }

    /// Register a parent kind the policy may match through
    #[must_use]
    pub fn with_parent(mut self, parent: FaultKind) -> Self {
        if parent != self.kind && !self.parents.contains(&parent) {
            self.parents.push(parent);
        }
        self
    }

    /// Build a fault from an error value without consuming it
    ///
    /// The message includes the error's `source()` chain.
    #[must_use]
    pub fn from_error<E>(error: &E) -> Self
    where
        E: StdError + 'static,
    {
        let kind = classify_error(error);
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }

        let fault = Self::new(kind, message);
        let dynamic: &(dyn StdError + 'static) = error;
        if dynamic.is::<io::Error>() {
            fault.with_parent(FaultKind::Io)
        } else {
            fault
        }
    }

    /// Build a fault inside a panic hook
    ///
    /// A `Fault` panic payload (`std::panic::panic_any(fault)`) is kept as is;
    /// otherwise the message is classified and the panic location becomes the
    /// innermost frame.
    #[must_use]
    pub fn from_panic(info: &PanicHookInfo<'_>) -> Self {
        if let Some(fault) = info.payload().downcast_ref::<Fault>() {
            return fault.clone();
        }

        let message = payload_message(info.payload());
        let mut trace = StackTrace::capture();
        if let Some(location) = info.location() {
            let already_top = trace.frames().first().is_some_and(|frame| {
                frame.file.as_deref() == Some(location.file())
                    && frame.line == Some(location.line())
            });
            if !already_top {
                trace.push_innermost(
                    Frame::new("<panic>").at(
                        location.file(),
                        location.line(),
                        Some(location.column()),
                    ),
                );
            }
        }

        Self::panicked(message, TraceCell::ready(trace))
    }

    /// Build a fault from a payload caught with `catch_unwind`
    ///
    /// The panic location is not part of the payload; the trace is the
    /// catching stack.
    #[must_use]
    pub fn from_panic_payload(payload: &(dyn Any + Send)) -> Self {
        if let Some(fault) = payload.downcast_ref::<Fault>() {
            return fault.clone();
        }
        Self::panicked(payload_message(payload), TraceCell::capture())
    }

    fn panicked(message: String, trace: TraceCell) -> Self {
        let kind = FaultKind::from_panic_message(&message);
        Self {
            kind,
            parents: Vec::new(),
            message,
            trace,
        }
        .with_parent(FaultKind::Panic)
    }

    /// Failure category
    #[must_use]
    pub fn kind(&self) -> &FaultKind {
        &self.kind
    }

    /// Registered parent kinds
    #[must_use]
    pub fn parents(&self) -> &[FaultKind] {
        &self.parents
    }

    /// Human-readable message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Captured stack
    #[must_use]
    pub fn trace(&self) -> &StackTrace {
        self.trace.get()
    }

    /// `Kind: message`, the one-line summary
    #[must_use]
    pub fn summary(&self) -> String {
        format!("{}: {}", self.kind, self.message)
    }

    /// Summary followed by the frames, the text embedded in prompts
    #[must_use]
    pub fn render(&self) -> String {
        let trace = self.trace();
        if trace.is_empty() {
            format!("{}\n", self.summary())
        } else {
            format!("{}\nStack backtrace:\n{trace}", self.summary())
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl<E> From<E> for Fault
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::from_error(&error)
    }
}

/// Errors a wrapper can observe without taking ownership
pub trait AsFault {
    /// Describe `self` as a fault
    fn as_fault(&self) -> Fault;
}

impl<E> AsFault for E
where
    E: StdError + 'static,
{
    fn as_fault(&self) -> Fault {
        Fault::from_error(self)
    }
}

impl AsFault for Fault {
    fn as_fault(&self) -> Fault {
        self.clone()
    }
}

fn classify_error<E>(error: &E) -> FaultKind
where
    E: StdError + 'static,
{
    let dynamic: &(dyn StdError + 'static) = error;
    if let Some(io_error) = dynamic.downcast_ref::<io::Error>() {
        return FaultKind::from_io(io_error.kind());
    }
    if let Some(json) = dynamic.downcast_ref::<serde_json::Error>() {
        return if json.is_io() {
            FaultKind::Io
        } else {
            FaultKind::Parse
        };
    }
    if dynamic.is::<std::num::ParseIntError>()
        || dynamic.is::<std::num::ParseFloatError>()
        || dynamic.is::<std::str::ParseBoolError>()
        || dynamic.is::<std::str::Utf8Error>()
        || dynamic.is::<std::string::FromUtf8Error>()
    {
        return FaultKind::Parse;
    }
    FaultKind::Other(short_type_name::<E>().to_string())
}

/// `my_app::errors::CheckoutError<T>` → `CheckoutError`
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(feature = "axum")]
mod response {
    use super::Fault;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};

    /// Handlers may return `Result<_, Fault>`; the fault rides along in the
    /// response extensions so a diagnosis layer can pick it up.
    impl IntoResponse for Fault {
        fn into_response(self) -> Response {
            let mut response =
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response();
            response.extensions_mut().insert(self);
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct CheckoutError;

    impl fmt::Display for CheckoutError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("cart is empty")
        }
    }

    impl StdError for CheckoutError {}

    #[test]
    fn test_kind_names_round_trip() {
        for kind in [
            FaultKind::Panic,
            FaultKind::DivideByZero,
            FaultKind::InvalidInput,
            FaultKind::Interrupted,
            FaultKind::Other("CheckoutError".to_string()),
        ] {
            assert_eq!(FaultKind::from_name(kind.name()), kind);
        }
        assert_eq!(
            FaultKind::from_name("invalidinput"),
            FaultKind::Other("invalidinput".to_string())
        );
    }

    #[test]
    fn test_io_errors_are_classified() {
        let fault = Fault::from(io::Error::new(io::ErrorKind::NotFound, "missing.toml"));
        assert_eq!(fault.kind(), &FaultKind::NotFound);
        assert_eq!(fault.message(), "missing.toml");
        assert_eq!(fault.parents(), &[FaultKind::Io]);
    }

    #[test]
    fn test_parse_errors_are_classified() {
        let err = "abc".parse::<i32>().unwrap_err();
        assert_eq!(Fault::from(err).kind(), &FaultKind::Parse);

        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(Fault::from(err).kind(), &FaultKind::Parse);
    }

    #[test]
    fn test_custom_errors_use_type_name() {
        let fault = Fault::from(CheckoutError);
        assert_eq!(fault.kind(), &FaultKind::Other("CheckoutError".to_string()));
        assert_eq!(fault.summary(), "CheckoutError: cart is empty");
    }

    #[test]
    fn test_panic_messages_are_classified() {
        let cases = [
            ("attempt to divide by zero", FaultKind::DivideByZero),
            (
                "attempt to calculate the remainder with a divisor of zero",
                FaultKind::DivideByZero,
            ),
            ("attempt to add with overflow", FaultKind::Overflow),
            (
                "index out of bounds: the len is 3 but the index is 7",
                FaultKind::IndexOutOfBounds,
            ),
            (
                "called `Option::unwrap()` on a `None` value",
                FaultKind::UnwrapNone,
            ),
            ("something else broke", FaultKind::Panic),
        ];

        for (message, expected) in cases {
            let payload: Box<dyn Any + Send> = Box::new(message);
            let fault = Fault::from_panic_payload(payload.as_ref());
            assert_eq!(fault.kind(), &expected, "{message}");
            assert_eq!(fault.message(), message);
        }
    }

    #[test]
    fn test_panic_subkinds_register_panic_parent() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("attempt to divide by zero"));
        let fault = Fault::from_panic_payload(payload.as_ref());
        assert_eq!(fault.parents(), &[FaultKind::Panic]);

        let payload: Box<dyn Any + Send> = Box::new("plain");
        let fault = Fault::from_panic_payload(payload.as_ref());
        assert!(fault.parents().is_empty());
    }

    #[test]
    fn test_fault_payload_is_recovered() {
        let original = Fault::new(FaultKind::Interrupted, "ctrl-c");
        let payload: Box<dyn Any + Send> = Box::new(original);
        let fault = Fault::from_panic_payload(payload.as_ref());
        assert_eq!(fault.kind(), &FaultKind::Interrupted);
        assert_eq!(fault.message(), "ctrl-c");
    }

    #[test]
    fn test_render_includes_summary_and_frames() {
        let trace = StackTrace::from_frames(vec![Frame::new("app::run").at("src/app.rs", 4, None)]);
        let fault = Fault::with_trace(FaultKind::InvalidInput, "bad input", trace);
        let rendered = fault.render();
        assert!(rendered.starts_with("InvalidInput: bad input\n"));
        assert!(rendered.contains("app::run"));
        assert!(rendered.contains("src/app.rs:4"));
    }

    #[test]
    fn test_trace_resolved_on_first_read() {
        let fault = Fault::from(io::Error::other("disk on fire"));
        assert!(!fault.trace.is_resolved());
        assert!(format!("{fault:?}").contains("<unresolved>"));

        let copy = fault.clone();
        let _ = fault.trace();
        assert!(fault.trace.is_resolved());
        assert!(copy.trace.is_resolved());
    }

    #[test]
    fn test_explicit_trace_is_kept() {
        let trace = StackTrace::from_frames(vec![Frame::new("app::run")]);
        let fault = Fault::with_trace(FaultKind::Timeout, "slow", trace.clone());
        assert!(fault.trace.is_resolved());
        assert_eq!(fault.trace(), &trace);
    }

    #[test]
    fn test_source_chain_in_message() {
        #[derive(Debug)]
        struct Outer(io::Error);
        impl fmt::Display for Outer {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("loading settings")
            }
        }
        impl StdError for Outer {
            fn source(&self) -> Option<&(dyn StdError + 'static)> {
                Some(&self.0)
            }
        }

        let fault = Fault::from(Outer(io::Error::other("disk on fire")));
        assert_eq!(fault.message(), "loading settings: disk on fire");
        assert_eq!(fault.kind(), &FaultKind::Other("Outer".to_string()));
    }
}
