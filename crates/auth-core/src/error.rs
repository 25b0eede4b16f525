//! Error types for backend collaborator operations

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid role: {0}")]
    InvalidRole(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl AuthError {
    /// Whether retrying the same call later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::Network(_) | AuthError::Backend(_))
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
