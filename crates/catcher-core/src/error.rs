//! Error types for catcher-core

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Settings could not be resolved or failed validation
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The diagnosis backend failed
    #[error("backend error: {0}")]
    Backend(#[from] catcher_llm::Error),

    /// No async runtime could drive a blocking diagnosis
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
