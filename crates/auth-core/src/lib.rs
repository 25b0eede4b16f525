//! # Auth-Core - Identity and role primitives for the agency session authority
//!
//! This crate holds everything the session authority needs to know about the
//! outside world without depending on any particular backend:
//!
//! - `types`: sessions, profiles, roles, role grants and the acting `Identity`
//! - `backend`: async contracts for the credential store, role ledger, profile
//!   store, impersonation audit, role switch gateway and local persistence
//! - `cache`: the identity-scoped feature data cache
//! - `memory`: in-memory implementations of every backend contract

pub mod backend;
pub mod cache;
pub mod error;
pub mod memory;
pub mod types;

pub use backend::{
    AuthCallback, AuthSubscription, CacheKey, CredentialStore, ImpersonationAudit, LocalStore,
    Navigator, ProfileStore, QueryCache, RoleLedger, RoleSwitchConfirmation, RoleSwitchGateway,
};
pub use cache::FeatureDataCache;
pub use error::{AuthError, Result};
pub use types::{AuthEvent, Identity, Role, RoleGrant, RoleSet, Session, SessionMetadata, UserProfile};
