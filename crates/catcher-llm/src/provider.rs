//! LLM Provider trait definition
//!
//! This module defines the core trait that all diagnosis backends implement.

use crate::completion::{CompletionRequest, CompletionResponse};
use crate::error::Result;

/// Trait for LLM providers
///
/// Implementations must be safe to share between concurrent diagnoses: one
/// provider handle serves every request of a diagnoser.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Complete a conversation (text only)
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}
