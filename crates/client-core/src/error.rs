//! Error types for session authority operations
//!
//! Only operations that report to the caller produce these. Role and profile
//! read failures during routine identity loading are absorbed into the
//! fallback role and never surface here.

use agency_auth_core::{AuthError, Role};
use thiserror::Error;

pub type AuthorityResult<T> = Result<T, AuthorityError>;

#[derive(Debug, Error)]
pub enum AuthorityError {
    /// No authenticated session is present
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The operation needs a privilege the real user does not hold
    #[error("Insufficient privileges: {reason}")]
    InsufficientPrivileges { reason: String },

    /// The start-impersonation audit call did not acknowledge
    #[error("Impersonation audit failed for target {target_id}: {source}")]
    AuditRejected {
        target_id: String,
        #[source]
        source: AuthError,
    },

    /// The impersonation target could not be resolved
    #[error("Impersonation target {target_id} unavailable: {source}")]
    TargetUnavailable {
        target_id: String,
        #[source]
        source: AuthError,
    },

    /// Persisted role writes are refused while viewing as another user
    #[error("Operation '{operation}' is not allowed while impersonating")]
    ImpersonationActive { operation: String },

    #[error("Role {role} is not granted to the current user")]
    RoleNotGranted { role: Role },

    #[error("Role switch to {role} failed: {source}")]
    RoleSwitchFailed {
        role: Role,
        #[source]
        source: AuthError,
    },

    #[error("Invalid input for {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl AuthorityError {
    /// Whether repeating the operation later could succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            AuthorityError::AuditRejected { source, .. }
            | AuthorityError::TargetUnavailable { source, .. }
            | AuthorityError::RoleSwitchFailed { source, .. } => source.is_transient(),
            AuthorityError::ImpersonationActive { .. } => true,
            AuthorityError::NotAuthenticated
            | AuthorityError::InsufficientPrivileges { .. }
            | AuthorityError::RoleNotGranted { .. }
            | AuthorityError::InvalidInput { .. }
            | AuthorityError::Configuration(_) => false,
        }
    }
}

impl From<config::ConfigError> for AuthorityError {
    fn from(err: config::ConfigError) -> Self {
        AuthorityError::Configuration(err.to_string())
    }
}
