//! Middleware module for LLM Catcher
//!
//! Provides:
//! - Diagnosis middleware (panics and `Fault` error responses)

pub mod diagnose;

pub use diagnose::{DiagnoseLayer, DiagnoseService, RouteSchema, DEFAULT_MAX_BODY_BYTES};
