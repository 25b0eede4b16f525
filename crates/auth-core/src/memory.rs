//! In-memory backend collaborators
//!
//! Every contract in [`crate::backend`] has a process-local implementation
//! here. They keep a log of the calls made against them and can be told to
//! fail, which is how the authority's degrade and fail-closed paths are
//! exercised without a hosted backend.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{
    AuthCallback, AuthSubscription, CacheKey, CredentialStore, ImpersonationAudit, LocalStore,
    Navigator, ProfileStore, QueryCache, RoleLedger, RoleSwitchConfirmation, RoleSwitchGateway,
};
use crate::error::{AuthError, Result};
use crate::types::{AuthEvent, Role, RoleGrant, Session, SessionMetadata, UserProfile};

/// Build a session valid for one hour
pub fn test_session(user_id: &str) -> Session {
    Session {
        user_id: user_id.to_string(),
        access_token: format!("access-{}", user_id),
        refresh_token: format!("refresh-{}", user_id),
        expires_at: Utc::now() + chrono::Duration::hours(1),
        metadata: SessionMetadata {
            email: Some(format!("{}@agency.test", user_id)),
            display_name: Some(user_id.to_string()),
            avatar_url: None,
        },
    }
}

// ===== CREDENTIAL STORE =====

/// Credential store with a controllable change feed
#[derive(Default)]
pub struct MemoryCredentialStore {
    session: Mutex<Option<Session>>,
    subscribers: Arc<Mutex<HashMap<u64, AuthCallback>>>,
    next_subscriber: AtomicU64,
    get_session_delay: Mutex<Option<Duration>>,
    fail_sign_out: AtomicBool,
    sign_out_calls: AtomicU64,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        let store = Self::default();
        *store.session.lock() = Some(session);
        store
    }

    /// Delay `get_session` answers.
    ///
    /// The answer is the session held when the call was made, so a delayed
    /// check can resolve with stale state after newer notifications.
    pub fn set_get_session_delay(&self, delay: Option<Duration>) {
        *self.get_session_delay.lock() = delay;
    }

    pub fn set_fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    pub fn current_session(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn sign_out_calls(&self) -> u64 {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    /// Store `session` and notify subscribers with `event`
    pub fn emit(&self, event: AuthEvent, session: Option<Session>) {
        *self.session.lock() = session.clone();
        let callbacks: Vec<AuthCallback> = self.subscribers.lock().values().cloned().collect();
        for callback in callbacks {
            callback(event, session.clone());
        }
    }

    pub fn sign_in(&self, session: Session) {
        self.emit(AuthEvent::SignedIn, Some(session));
    }

    pub fn refresh(&self, session: Session) {
        self.emit(AuthEvent::TokenRefreshed, Some(session));
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_session(&self) -> Result<Option<Session>> {
        let snapshot = self.session.lock().clone();
        let delay = *self.get_session_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(snapshot)
    }

    fn on_auth_state_change(&self, callback: AuthCallback) -> AuthSubscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().insert(id, callback);
        let subscribers = self.subscribers.clone();
        AuthSubscription::new(move || {
            subscribers.lock().remove(&id);
        })
    }

    async fn sign_out(&self) -> Result<()> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(AuthError::Network("sign-out request failed".to_string()));
        }
        self.emit(AuthEvent::SignedOut, None);
        Ok(())
    }
}

// ===== ROLE LEDGER =====

#[derive(Default)]
pub struct MemoryRoleLedger {
    grants: Mutex<HashMap<String, Vec<RoleGrant>>>,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
    fetches: AtomicU64,
}

impl MemoryRoleLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, user_id: &str, role: Role) {
        self.grants
            .lock()
            .entry(user_id.to_string())
            .or_default()
            .push(RoleGrant::active(role));
    }

    /// Mark every active grant of `role` as revoked now
    pub fn revoke(&self, user_id: &str, role: Role) {
        if let Some(rows) = self.grants.lock().get_mut(user_id) {
            let now = Utc::now();
            for row in rows.iter_mut().filter(|r| r.role == role.as_str() && r.is_active()) {
                row.revoked_at = Some(now);
            }
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoleLedger for MemoryRoleLedger {
    async fn fetch_role_grants(&self, user_id: &str) -> Result<Vec<RoleGrant>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(AuthError::Network("role ledger unavailable".to_string()));
        }
        Ok(self.grants.lock().get(user_id).cloned().unwrap_or_default())
    }
}

// ===== PROFILE STORE =====

#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: Mutex<HashMap<String, UserProfile>>,
    access_levels: Mutex<HashMap<String, Role>>,
    active_roles: Mutex<HashMap<String, Role>>,
    active_role_writes: Mutex<Vec<(String, Role)>>,
    fail_reads: AtomicBool,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_profile(&self, profile: UserProfile) {
        self.profiles.lock().insert(profile.id.clone(), profile);
    }

    pub fn set_access_level(&self, user_id: &str, role: Role) {
        self.access_levels.lock().insert(user_id.to_string(), role);
    }

    /// Seed a persisted active role without recording a write
    pub fn seed_active_role(&self, user_id: &str, role: Role) {
        self.active_roles.lock().insert(user_id.to_string(), role);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn stored_active_role(&self, user_id: &str) -> Option<Role> {
        self.active_roles.lock().get(user_id).copied()
    }

    pub fn active_role_writes(&self) -> Vec<(String, Role)> {
        self.active_role_writes.lock().clone()
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AuthError::Network("profile store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get_profile(&self, user_id: &str) -> Result<UserProfile> {
        self.check_reads()?;
        self.profiles
            .lock()
            .get(user_id)
            .cloned()
            .ok_or_else(|| AuthError::NotFound(format!("profile {}", user_id)))
    }

    async fn get_access_level(&self, user_id: &str) -> Result<Option<Role>> {
        self.check_reads()?;
        Ok(self.access_levels.lock().get(user_id).copied())
    }

    async fn get_active_role(&self, user_id: &str) -> Result<Option<Role>> {
        self.check_reads()?;
        Ok(self.active_roles.lock().get(user_id).copied())
    }

    async fn set_active_role(&self, user_id: &str, role: Role) -> Result<()> {
        self.active_roles.lock().insert(user_id.to_string(), role);
        self.active_role_writes.lock().push((user_id.to_string(), role));
        Ok(())
    }
}

// ===== IMPERSONATION AUDIT =====

/// One recorded audit invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub admin_id: String,
    pub target_id: String,
    pub reason: Option<String>,
}

#[derive(Default)]
pub struct MemoryAudit {
    starts: Mutex<Vec<AuditRecord>>,
    stops: Mutex<Vec<AuditRecord>>,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
}

impl MemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn starts(&self) -> Vec<AuditRecord> {
        self.starts.lock().clone()
    }

    pub fn stops(&self) -> Vec<AuditRecord> {
        self.stops.lock().clone()
    }
}

#[async_trait]
impl ImpersonationAudit for MemoryAudit {
    async fn log_start(&self, admin_id: &str, target_id: &str, reason: Option<&str>) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(AuthError::Network("start-impersonation function unreachable".to_string()));
        }
        self.starts.lock().push(AuditRecord {
            admin_id: admin_id.to_string(),
            target_id: target_id.to_string(),
            reason: reason.map(str::to_string),
        });
        Ok(())
    }

    async fn log_stop(&self, admin_id: &str, target_id: &str) -> Result<()> {
        self.stops.lock().push(AuditRecord {
            admin_id: admin_id.to_string(),
            target_id: target_id.to_string(),
            reason: None,
        });
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(AuthError::Network("stop-impersonation function unreachable".to_string()));
        }
        Ok(())
    }
}

// ===== ROLE SWITCH GATEWAY =====

/// Role switch function writing through to a [`MemoryProfileStore`]
pub struct MemoryRoleSwitchGateway {
    profiles: Arc<MemoryProfileStore>,
    calls: Mutex<Vec<(String, Role)>>,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MemoryRoleSwitchGateway {
    pub fn new(profiles: Arc<MemoryProfileStore>) -> Self {
        Self {
            profiles,
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            delay: Mutex::new(None),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Hold each switch this long before it reaches the profile store
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> Vec<(String, Role)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RoleSwitchGateway for MemoryRoleSwitchGateway {
    async fn switch_role(&self, user_id: &str, role: Role) -> Result<RoleSwitchConfirmation> {
        self.calls.lock().push((user_id.to_string(), role));
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(AuthError::Rejected("role switch declined".to_string()));
        }
        self.profiles.set_active_role(user_id, role).await?;
        Ok(RoleSwitchConfirmation {
            user_id: user_id.to_string(),
            active_role: role,
            switched_at: Utc::now(),
        })
    }
}

// ===== LOCAL STORE =====

#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.values.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values.lock().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values.lock().remove(key);
    }
}

// ===== QUERY CACHE / NAVIGATION =====

/// Query cache that only records which scopes were invalidated
#[derive(Debug, Default)]
pub struct RecordingQueryCache {
    invalidated: Mutex<Vec<CacheKey>>,
}

impl RecordingQueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidated(&self) -> Vec<CacheKey> {
        self.invalidated.lock().clone()
    }

    pub fn count(&self, key: CacheKey) -> usize {
        self.invalidated.lock().iter().filter(|k| **k == key).count()
    }

    pub fn clear(&self) {
        self.invalidated.lock().clear();
    }
}

#[async_trait]
impl QueryCache for RecordingQueryCache {
    async fn invalidate(&self, key: CacheKey) {
        self.invalidated.lock().push(key);
    }
}

#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visits: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, path: &str) {
        self.visits.lock().push(path.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoleSet;

    #[test]
    fn credential_feed_reaches_subscribers_until_unsubscribed() {
        let store = MemoryCredentialStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = store.on_auth_state_change(Arc::new(move |event, session| {
            sink.lock().push((event, session.map(|s| s.user_id)));
        }));

        store.sign_in(test_session("u1"));
        assert_eq!(store.subscriber_count(), 1);
        sub.unsubscribe();
        store.sign_in(test_session("u2"));

        assert_eq!(
            seen.lock().clone(),
            vec![(AuthEvent::SignedIn, Some("u1".to_string()))]
        );
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn ledger_revocation_is_reflected_in_role_set() {
        let ledger = MemoryRoleLedger::new();
        ledger.grant("u1", Role::Salesperson);
        ledger.grant("u1", Role::TeamLeader);
        ledger.revoke("u1", Role::TeamLeader);

        let grants = tokio_test::block_on(ledger.fetch_role_grants("u1")).unwrap();
        assert_eq!(RoleSet::from_grants(&grants).to_vec(), vec![Role::Salesperson]);
        assert_eq!(ledger.fetch_count(), 1);
    }

    #[test]
    fn failed_sign_out_keeps_backend_session() {
        let store = MemoryCredentialStore::with_session(test_session("u1"));
        store.set_fail_sign_out(true);
        assert!(tokio_test::block_on(store.sign_out()).is_err());
        assert!(store.current_session().is_some());
        assert_eq!(store.sign_out_calls(), 1);
    }

    #[test]
    fn role_switch_gateway_writes_profile() {
        let profiles = Arc::new(MemoryProfileStore::new());
        let gateway = MemoryRoleSwitchGateway::new(profiles.clone());
        let confirmation =
            tokio_test::block_on(gateway.switch_role("u1", Role::TeamLeader)).unwrap();
        assert_eq!(confirmation.active_role, Role::TeamLeader);
        assert_eq!(profiles.stored_active_role("u1"), Some(Role::TeamLeader));
    }
}
