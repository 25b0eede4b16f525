//! Core types for auth-core
//!
//! The credential store owns [`Session`]; the role ledger owns [`RoleGrant`]
//! rows. Everything else here is derived state the session authority builds
//! from those two sources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AuthError;

/// Roles an agency user can act as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Salesperson,
    Assistant,
    TeamLeader,
    OfficeManager,
    PlatformAdmin,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Salesperson,
        Role::Assistant,
        Role::TeamLeader,
        Role::OfficeManager,
        Role::PlatformAdmin,
    ];

    /// Name as stored in the role ledger and profile records
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Salesperson => "salesperson",
            Role::Assistant => "assistant",
            Role::TeamLeader => "team_leader",
            Role::OfficeManager => "office_manager",
            Role::PlatformAdmin => "platform_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == s.trim())
            .ok_or_else(|| AuthError::InvalidRole(s.to_string()))
    }
}

/// A single row from the role ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role: String,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RoleGrant {
    pub fn active(role: Role) -> Self {
        Self {
            role: role.as_str().to_string(),
            revoked_at: None,
        }
    }

    pub fn revoked(role: Role, at: DateTime<Utc>) -> Self {
        Self {
            role: role.as_str().to_string(),
            revoked_at: Some(at),
        }
    }

    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// Ordered set of non-revoked roles held by the real user.
///
/// Order follows the ledger; the first entry is the default active role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(Vec<Role>);

impl RoleSet {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Build the effective set from ledger rows.
    ///
    /// Revoked grants are dropped, duplicates collapse onto their first
    /// position and unknown role names are skipped with a warning.
    pub fn from_grants(grants: &[RoleGrant]) -> Self {
        let mut roles = Vec::with_capacity(grants.len());
        for grant in grants.iter().filter(|g| g.is_active()) {
            match grant.role.parse::<Role>() {
                Ok(role) if !roles.contains(&role) => roles.push(role),
                Ok(_) => {}
                Err(_) => tracing::warn!("Skipping unknown role grant '{}'", grant.role),
            }
        }
        Self(roles)
    }

    /// Single-role set used when the ledger is empty or unreadable
    pub fn fallback(role: Role) -> Self {
        Self(vec![role])
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn first(&self) -> Option<Role> {
        self.0.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Role> {
        self.0.iter()
    }

    pub fn to_vec(&self) -> Vec<Role> {
        self.0.clone()
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        let mut roles = Vec::new();
        for role in iter {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
        Self(roles)
    }
}

/// Profile metadata carried on the session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Authenticated credential issued by the credential store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub metadata: SessionMetadata,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// A user's public profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            display_name: None,
            avatar_url: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

impl From<&Session> for UserProfile {
    fn from(session: &Session) -> Self {
        Self {
            id: session.user_id.clone(),
            email: session.metadata.email.clone(),
            display_name: session.metadata.display_name.clone(),
            avatar_url: session.metadata.avatar_url.clone(),
        }
    }
}

/// The identity the rest of the application acts as.
///
/// Exactly one profile is "acting" at any time; while impersonating, the
/// operator's own profile rides along in `real` so it can be restored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    Real(UserProfile),
    Impersonated { target: UserProfile, real: UserProfile },
}

impl Identity {
    /// Id of the acting identity
    pub fn id(&self) -> &str {
        &self.profile().id
    }

    /// Profile of the acting identity
    pub fn profile(&self) -> &UserProfile {
        match self {
            Identity::Real(profile) => profile,
            Identity::Impersonated { target, .. } => target,
        }
    }

    /// Profile of the authenticated operator
    pub fn real(&self) -> &UserProfile {
        match self {
            Identity::Real(profile) => profile,
            Identity::Impersonated { real, .. } => real,
        }
    }

    pub fn is_impersonated(&self) -> bool {
        matches!(self, Identity::Impersonated { .. })
    }
}

/// Event kinds delivered by the credential store's change feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}
