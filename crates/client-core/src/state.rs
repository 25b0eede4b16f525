//! Authority state
//!
//! ```text
//! uninitialized ──► unauthenticated
//!       │                 ▲  │
//!       ▼                 │  ▼
//!       authenticated { normal ⇄ impersonating }
//! ```
//!
//! Initialization itself is tracked separately by [`InitPhase`] so that
//! notifications arriving before the initial session check completes can be
//! told apart from notifications that update an established state.

use agency_auth_core::{Identity, Role, RoleSet, Session, UserProfile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Progress of the initial session check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPhase {
    NotStarted,
    Checking,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Normal,
    Impersonating,
}

/// Externally visible authority state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "mode", rename_all = "snake_case")]
pub enum AuthorityState {
    Uninitialized,
    Unauthenticated,
    Authenticated(SessionMode),
}

/// A platform admin temporarily acting as another user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpersonationState {
    pub target: UserProfile,
    /// Role rendered for the target, from its access level
    pub target_role: Role,
    /// The operator underneath
    pub real: UserProfile,
    pub started_at: DateTime<Utc>,
    pub reason: Option<String>,
}

impl ImpersonationState {
    /// Time left before the cap elapses, zero once expired
    pub fn remaining(&self, timeout: Duration, now: DateTime<Utc>) -> Duration {
        let elapsed = (now - self.started_at).to_std().unwrap_or(Duration::ZERO);
        timeout.saturating_sub(elapsed)
    }

    pub fn is_expired(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        self.remaining(timeout, now).is_zero()
    }
}

/// Flag raised when the identity a role load was started for goes away
#[derive(Debug, Clone, Default)]
pub(crate) struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub(crate) struct AuthorityInner {
    pub(crate) phase: InitPhase,
    pub(crate) session: Option<Session>,
    pub(crate) real: Option<UserProfile>,
    /// Roles of the real user; kept untouched while impersonating
    pub(crate) roles: RoleSet,
    /// Active role of the real user; kept untouched while impersonating
    pub(crate) active_role: Option<Role>,
    pub(crate) roles_loading: bool,
    pub(crate) impersonation: Option<ImpersonationState>,
    pub(crate) role_load: Option<CancelFlag>,
}

impl AuthorityInner {
    pub(crate) fn new() -> Self {
        Self {
            phase: InitPhase::NotStarted,
            session: None,
            real: None,
            roles: RoleSet::empty(),
            active_role: None,
            roles_loading: false,
            impersonation: None,
            role_load: None,
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.phase == InitPhase::Ready && !self.roles_loading
    }

    pub(crate) fn state(&self) -> AuthorityState {
        match (self.phase, &self.real, &self.impersonation) {
            (InitPhase::NotStarted | InitPhase::Checking, _, _) => AuthorityState::Uninitialized,
            (InitPhase::Ready, None, _) => AuthorityState::Unauthenticated,
            (InitPhase::Ready, Some(_), None) => AuthorityState::Authenticated(SessionMode::Normal),
            (InitPhase::Ready, Some(_), Some(_)) => {
                AuthorityState::Authenticated(SessionMode::Impersonating)
            }
        }
    }

    pub(crate) fn identity(&self) -> Option<Identity> {
        let real = self.real.clone()?;
        Some(match &self.impersonation {
            Some(state) => Identity::Impersonated {
                target: state.target.clone(),
                real,
            },
            None => Identity::Real(real),
        })
    }

    pub(crate) fn effective_active_role(&self) -> Option<Role> {
        match &self.impersonation {
            Some(state) => Some(state.target_role),
            None => self.active_role,
        }
    }

    pub(crate) fn is_platform_admin(&self) -> bool {
        self.impersonation.is_some() || self.roles.contains(Role::PlatformAdmin)
    }

    /// Drop every identity fact, returning whether a session was present
    /// and the impersonation that was active, if any
    pub(crate) fn clear(&mut self) -> (bool, Option<ImpersonationState>) {
        if let Some(flag) = self.role_load.take() {
            flag.cancel();
        }
        let had_session = self.session.take().is_some();
        self.real = None;
        self.roles = RoleSet::empty();
        self.active_role = None;
        self.roles_loading = false;
        (had_session, self.impersonation.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agency_auth_core::memory::test_session;

    fn signed_in() -> AuthorityInner {
        let session = test_session("admin-1");
        let mut inner = AuthorityInner::new();
        inner.phase = InitPhase::Ready;
        inner.real = Some(UserProfile::from(&session));
        inner.session = Some(session);
        inner.roles = RoleSet::from_iter([Role::PlatformAdmin, Role::OfficeManager]);
        inner.active_role = Some(Role::OfficeManager);
        inner
    }

    fn impersonation(started_at: DateTime<Utc>) -> ImpersonationState {
        ImpersonationState {
            target: UserProfile::new("user-42"),
            target_role: Role::Salesperson,
            real: UserProfile::new("admin-1"),
            started_at,
            reason: None,
        }
    }

    #[test]
    fn uninitialized_until_ready() {
        let mut inner = AuthorityInner::new();
        assert_eq!(inner.state(), AuthorityState::Uninitialized);
        inner.phase = InitPhase::Checking;
        assert_eq!(inner.state(), AuthorityState::Uninitialized);
        inner.phase = InitPhase::Ready;
        assert_eq!(inner.state(), AuthorityState::Unauthenticated);
    }

    #[test]
    fn impersonation_swaps_identity_and_role_only() {
        let mut inner = signed_in();
        inner.impersonation = Some(impersonation(Utc::now()));

        assert_eq!(
            inner.state(),
            AuthorityState::Authenticated(SessionMode::Impersonating)
        );
        let identity = inner.identity().unwrap();
        assert_eq!(identity.id(), "user-42");
        assert_eq!(identity.real().id, "admin-1");
        assert_eq!(inner.effective_active_role(), Some(Role::Salesperson));
        assert_eq!(inner.active_role, Some(Role::OfficeManager));
        assert!(inner.is_platform_admin());
    }

    #[test]
    fn clear_cancels_role_load() {
        let mut inner = signed_in();
        let flag = CancelFlag::default();
        inner.role_load = Some(flag.clone());
        inner.impersonation = Some(impersonation(Utc::now()));

        let (had_session, previous) = inner.clear();
        assert!(had_session);
        assert!(previous.is_some());
        assert!(flag.is_cancelled());
        assert!(inner.identity().is_none());
        assert!(inner.roles.is_empty());
    }

    #[test]
    fn remaining_time_saturates() {
        let timeout = Duration::from_secs(30 * 60);
        let now = Utc::now();
        let fresh = impersonation(now - chrono::Duration::minutes(10));
        assert_eq!(fresh.remaining(timeout, now), Duration::from_secs(20 * 60));
        let stale = impersonation(now - chrono::Duration::minutes(31));
        assert!(stale.is_expired(timeout, now));
    }
}
