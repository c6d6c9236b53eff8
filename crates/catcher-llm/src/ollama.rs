//! Ollama - Local Ollama API provider
//!
//! This module implements the Ollama backend for local inference.

use crate::completion::{CompletionRequest, CompletionResponse};
use crate::error::{Error, Result};
use crate::message::{Message, USER_ROLE};
use crate::provider::LlmProvider;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

// ============================================================================
// Security Utilities
// ============================================================================

/// Sanitize API error messages to prevent leaking sensitive information
fn sanitize_api_error(error: &str) -> String {
    let lower = error.to_lowercase();

    // Don't expose internal paths or system information
    if lower.contains("/home")
        || lower.contains("/root")
        || lower.contains("/var")
        || lower.contains("\\users\\")
    {
        return "An internal error occurred. Please check your Ollama installation.".to_string();
    }

    if lower.contains("connection refused") || lower.contains("failed to connect") {
        return "Failed to connect to Ollama. Is Ollama running?".to_string();
    }

    if lower.contains("model") && (lower.contains("not found") || lower.contains("pull")) {
        return "Model not available. Please pull the model first with: ollama pull <model>"
            .to_string();
    }

    if error.len() < 100 {
        return error.to_string();
    }

    "An error occurred. Please try again.".to_string()
}

/// Default Ollama model
pub const DEFAULT_MODEL: &str = "llama3.2";

/// Default Ollama API URL
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    model: String,
    message: OllamaResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// Ollama provider configuration
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Base URL (default: http://localhost:11434)
    pub base_url: String,
    /// Default model
    pub default_model: String,
    /// Request timeout (longer for local inference)
    pub timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(300), // 5 minutes for local inference
        }
    }
}

impl OllamaConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the default model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Ollama local provider
pub struct OllamaProvider {
    client: Client,
    config: OllamaConfig,
}

impl OllamaProvider {
    /// Create a new Ollama provider
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Convert messages to Ollama format
    fn convert_messages(messages: &[Message]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .map(|msg| OllamaMessage {
                role: USER_ROLE,
                content: msg.content.clone(),
            })
            .collect()
    }

    /// Send request to Ollama API
    async fn send_request(&self, request: OllamaChatRequest) -> Result<OllamaChatResponse> {
        let url = format!("{}/api/chat", self.config.base_url);

        debug!("Sending request to Ollama: {}", request.model);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    Error::Network(format!(
                        "Failed to connect to Ollama at {}. Is Ollama running?",
                        self.config.base_url
                    ))
                } else if e.is_timeout() {
                    Error::Timeout(self.config.timeout.as_millis() as u64)
                } else {
                    Error::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<OllamaError>(&body) {
                return Err(Error::Api(sanitize_api_error(&error.error)));
            }
            // SECURITY: Don't expose raw HTTP response body
            return Err(Error::Api(sanitize_api_error(&format!(
                "HTTP {}: {}",
                status, body
            ))));
        }

        serde_json::from_str(&body).map_err(|e| Error::InvalidResponse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = if request.model.is_empty() {
            &self.config.default_model
        } else {
            &request.model
        };

        let ollama_request = OllamaChatRequest {
            model: model.to_string(),
            messages: Self::convert_messages(&request.messages),
            options: request
                .temperature
                .map(|temperature| OllamaOptions { temperature }),
            stream: false,
        };

        let response = self.send_request(ollama_request).await?;

        Ok(CompletionResponse {
            content: response.message.content,
            model: response.model,
        })
    }
}
