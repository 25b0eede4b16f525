//! # Agency Client Core
//!
//! Session and role authority for the agency CRM client: who is signed in,
//! which roles they hold, which role the UI renders as, and whether a
//! platform admin is viewing the app as another user.
//!
//! ```rust,no_run
//! use agency_auth_core::memory::*;
//! use agency_client_core::{RouteRoleMap, RouteRoleSynchronizer, SessionAuthority};
//! use std::sync::Arc;
//!
//! # async fn run() -> agency_client_core::AuthorityResult<()> {
//! let profiles = Arc::new(MemoryProfileStore::new());
//! let authority = SessionAuthority::builder()
//!     .credentials(Arc::new(MemoryCredentialStore::new()))
//!     .role_ledger(Arc::new(MemoryRoleLedger::new()))
//!     .profiles(profiles.clone())
//!     .audit(Arc::new(MemoryAudit::new()))
//!     .role_switch(Arc::new(MemoryRoleSwitchGateway::new(profiles)))
//!     .navigator(Arc::new(RecordingNavigator::new()))
//!     .build()?;
//! authority.initialize().await?;
//!
//! let sync = RouteRoleSynchronizer::new(authority.clone(), RouteRoleMap::default());
//! sync.on_navigate("/plan-dashboard").await?;
//! # Ok(())
//! # }
//! ```

// Identity authority
pub mod authority;

pub mod config;
pub mod error;
pub mod events;
pub mod invalidation;
pub mod route_sync;
pub mod state;

pub use authority::{
    Key, SessionAuthority, SessionAuthorityBuilder, VIEW_AS_REASON_KEY, VIEW_AS_START_TIME_KEY,
    VIEW_AS_USER_ID_KEY,
};
pub use config::AuthorityConfig;
pub use error::{AuthorityError, AuthorityResult};
pub use events::{AuthorityEvent, AuthorityEventHandler, ListenerId, StopReason};
pub use invalidation::{IdentityCacheInvalidator, IdentityChange, IDENTITY_SCOPED_KEYS};
pub use route_sync::{RouteRoleMap, RouteRoleSynchronizer, SyncOutcome};
pub use state::{AuthorityState, ImpersonationState, InitPhase, SessionMode};

/// Commonly used types
pub mod prelude {
    pub use super::{
        AuthorityConfig, AuthorityError, AuthorityEvent, AuthorityResult, AuthorityState, Key,
        RouteRoleMap, RouteRoleSynchronizer, SessionAuthority, SessionMode, StopReason,
        SyncOutcome,
    };
    pub use agency_auth_core::{Identity, Role, RoleSet, UserProfile};
}
