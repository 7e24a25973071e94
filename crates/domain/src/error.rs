//! Unified error type for domain operations.

use thiserror::Error;

use crate::ids::SessionId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Validation failed (e.g., invalid field values)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A session id collided with a live participant
    #[error("Session id already in use: {0}")]
    DuplicateSession(SessionId),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
