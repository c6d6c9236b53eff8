//! Catcher LLM - Diagnosis backend abstraction
//!
//! This crate provides the model backends used by llm-catcher:
//! - Provider: the `LlmProvider` trait every backend implements
//! - OpenAI: hosted chat completions through async-openai
//! - Ollama: local inference over the Ollama HTTP API
//! - Mock: scripted provider for tests and offline demos

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod completion;
pub mod error;
pub mod message;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod util;

pub use completion::{CompletionRequest, CompletionResponse};
pub use error::{Error, Result};
pub use message::Message;
pub use mock::MockProvider;
pub use provider::LlmProvider;

// Re-export provider types
pub use ollama::{OllamaConfig, OllamaProvider};
pub use openai::{OpenAiConfig, OpenAiProvider};
