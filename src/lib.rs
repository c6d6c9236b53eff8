//! LLM Catcher - diagnose panics and errors with a language model
//!
//! Three ways to attach a [`Diagnoser`]:
//! - [`install_panic_hook`] for panics nobody catches
//! - [`Diagnoser::catch`], [`Diagnoser::catch_async`] and [`Diagnoser::wrap`]
//!   around individual calls
//! - [`DiagnoseLayer`] in an Axum router

#![forbid(unsafe_code)]

pub mod middleware;

pub use catcher_core::{
    banner, install_panic_hook, scope, AsFault, DiagnosisFormat, DiagnosisRequest, Diagnoser,
    DispatchPolicy, Error, Fault, FaultKind, HandlingMode, PanicHookGuard, Provider, Result,
    SchemaContext, Settings, SettingsSources, StackTrace,
};
pub use catcher_llm::{LlmProvider, MockProvider};
pub use middleware::{DiagnoseLayer, RouteSchema};
