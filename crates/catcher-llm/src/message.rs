//! Message type for diagnosis conversations
//!
//! A diagnosis is a single user message; the providers translate it into
//! their wire formats with the `user` role.

use serde::{Deserialize, Serialize};

/// Wire role of every diagnosis message
pub const USER_ROLE: &str = "user";

/// A user message carrying the diagnosis prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message content
    pub content: String,
}

impl Message {
    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}
