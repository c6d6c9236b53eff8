//! Catcher Core - failure interception and LLM diagnosis
//!
//! This crate provides:
//! - Settings resolution (defaults, `LLM_CATCHER_*` environment, JSON file)
//! - The `Fault` model shared by every interception adapter
//! - The dispatch policy deciding which faults get diagnosed
//! - The diagnosis engine (prompt building, backend call, formatting)
//! - The panic-hook adapter and the `catch` / `wrap` wrappers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catch;
pub mod diagnoser;
pub mod error;
pub mod fault;
pub mod hook;
pub mod policy;
pub mod prompt;
pub mod runtime;
pub mod scope;
pub mod settings;
pub mod trace;

pub use diagnoser::{banner, DiagnosisFormat, Diagnoser, OutputSink};
pub use error::{Error, Result};
pub use fault::{AsFault, Fault, FaultKind};
pub use hook::{install as install_panic_hook, PanicHookGuard};
pub use policy::{DispatchPolicy, HandlingMode};
pub use prompt::{build_prompt, DiagnosisRequest, SchemaContext};
pub use settings::{Provider, Settings, SettingsSources};
pub use trace::{Frame, StackTrace};
