//! Mock LLM Provider for testing
//!
//! This module provides a mock provider that returns scripted replies and
//! records every request it receives.

use crate::completion::{CompletionRequest, CompletionResponse};
use crate::error::{Error, Result};
use crate::provider::LlmProvider;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Reply used when the queue is empty
pub const DEFAULT_REPLY: &str = "mock diagnosis";

/// A mock LLM provider that returns queued replies or a default one.
#[derive(Clone)]
pub struct MockProvider {
    replies: Arc<Mutex<VecDeque<Result<String>>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    always_fail: Option<String>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create a new mock provider.
    #[must_use]
    pub fn new() -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            always_fail: None,
        }
    }

    /// Create a provider whose every call fails with a network error.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            always_fail: Some(message.into()),
            ..Self::new()
        }
    }

    /// Add a reply to the queue.
    pub fn push_reply(&self, content: impl Into<String>) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(content.into()));
    }

    /// Add a failure to the queue.
    pub fn push_error(&self, error: Error) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(error));
    }

    /// Requests received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of `complete` calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = if request.model.is_empty() {
            "mock-model".to_string()
        } else {
            request.model.clone()
        };
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);

        if let Some(message) = &self.always_fail {
            return Err(Error::Network(message.clone()));
        }

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Ok(DEFAULT_REPLY.to_string()))?;

        Ok(CompletionResponse {
            content: reply,
            model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn test_queued_replies_then_default() {
        let provider = MockProvider::new();
        provider.push_reply("first");
        provider.push_error(Error::Api("boom".to_string()));

        let request = CompletionRequest::new("").with_message(Message::user("hi"));

        let first = tokio_test::block_on(provider.complete(request.clone())).unwrap();
        assert_eq!(first.content, "first");
        assert_eq!(first.model, "mock-model");

        let second = tokio_test::block_on(provider.complete(request.clone()));
        assert!(matches!(second, Err(Error::Api(_))));

        let third = tokio_test::block_on(provider.complete(request)).unwrap();
        assert_eq!(third.content, DEFAULT_REPLY);
        assert_eq!(provider.call_count(), 3);
    }

    #[test]
    fn test_failing_provider_records_requests() {
        let provider = MockProvider::failing("connection refused");
        let request = CompletionRequest::new("m").with_message(Message::user("prompt"));

        let result = tokio_test::block_on(provider.complete(request));
        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(provider.requests()[0].messages[0].content, "prompt");
    }
}
