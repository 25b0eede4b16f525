//! Contracts for the hosted backend collaborators
//!
//! The session authority only talks to the outside world through these
//! traits. Production wires them to the hosted backend's client SDK; tests
//! and demos use [`crate::memory`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{AuthEvent, Role, RoleGrant, Session, UserProfile};

/// Callback invoked by the credential store on every auth change
pub type AuthCallback = Arc<dyn Fn(AuthEvent, Option<Session>) + Send + Sync>;

/// Handle for an auth change subscription.
///
/// The callback stays registered until `unsubscribe` is called or the
/// handle is dropped.
pub struct AuthSubscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl AuthSubscription {
    pub fn new<F>(detach: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for AuthSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSubscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

/// The backend authentication service
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// One-shot read of the current session
    async fn get_session(&self) -> Result<Option<Session>>;

    /// Register for `(event, session)` notifications
    fn on_auth_state_change(&self, callback: AuthCallback) -> AuthSubscription;

    async fn sign_out(&self) -> Result<()>;
}

/// Read-only view of the role grant table
#[async_trait]
pub trait RoleLedger: Send + Sync {
    async fn fetch_role_grants(&self, user_id: &str) -> Result<Vec<RoleGrant>>;
}

/// Per-user profile records
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> Result<UserProfile>;

    /// Primary access level of a user, used to render an impersonated identity
    async fn get_access_level(&self, user_id: &str) -> Result<Option<Role>>;

    async fn get_active_role(&self, user_id: &str) -> Result<Option<Role>>;

    async fn set_active_role(&self, user_id: &str, role: Role) -> Result<()>;
}

/// Serverless functions recording impersonation for audit
#[async_trait]
pub trait ImpersonationAudit: Send + Sync {
    async fn log_start(&self, admin_id: &str, target_id: &str, reason: Option<&str>) -> Result<()>;

    async fn log_stop(&self, admin_id: &str, target_id: &str) -> Result<()>;
}

/// Confirmation returned by the role switch function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSwitchConfirmation {
    pub user_id: String,
    pub active_role: Role,
    pub switched_at: DateTime<Utc>,
}

/// Serverless function that changes a user's persisted active role
#[async_trait]
pub trait RoleSwitchGateway: Send + Sync {
    async fn switch_role(&self, user_id: &str, role: Role) -> Result<RoleSwitchConfirmation>;
}

/// Browser-scoped key/value persistence
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Cached feature data that is implicitly keyed by the current identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKey {
    Conversations,
    Tasks,
    Profile,
    Team,
    UnreadCounts,
    ActiveRole,
}

impl CacheKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKey::Conversations => "conversations",
            CacheKey::Tasks => "tasks",
            CacheKey::Profile => "profile",
            CacheKey::Team => "team",
            CacheKey::UnreadCounts => "unread_counts",
            CacheKey::ActiveRole => "active_role",
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query cache shared by the feature hooks
#[async_trait]
pub trait QueryCache: Send + Sync {
    async fn invalidate(&self, key: CacheKey);
}

/// Client-side navigation
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscription_detaches_once() {
        let detached = Arc::new(AtomicUsize::new(0));
        let counter = detached.clone();
        let sub = AuthSubscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();
        assert_eq!(detached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscription_detaches_on_drop() {
        let detached = Arc::new(AtomicUsize::new(0));
        let counter = detached.clone();
        {
            let _sub = AuthSubscription::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(detached.load(Ordering::SeqCst), 1);
    }
}
