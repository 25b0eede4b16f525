//! Shared harness for session authority integration tests
#![allow(dead_code)]

use agency_auth_core::memory::*;
use agency_auth_core::{AuthEvent, Role, UserProfile};
use agency_client_core::{AuthorityConfig, AuthorityEvent, SessionAuthority};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const ADMIN: &str = "admin-1";
pub const TARGET: &str = "user-42";
pub const SELLER: &str = "seller-7";

pub struct Harness {
    pub credentials: Arc<MemoryCredentialStore>,
    pub ledger: Arc<MemoryRoleLedger>,
    pub profiles: Arc<MemoryProfileStore>,
    pub audit: Arc<MemoryAudit>,
    pub gateway: Arc<MemoryRoleSwitchGateway>,
    pub local: Arc<MemoryLocalStore>,
    pub cache: Arc<RecordingQueryCache>,
    pub navigator: Arc<RecordingNavigator>,
    pub authority: SessionAuthority,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AuthorityConfig::default())
    }

    /// Memory backends seeded with an admin, an impersonation target and a
    /// seller. The authority is built but not initialized.
    pub fn with_config(config: AuthorityConfig) -> Self {
        agency_infra_common::init_test_logging();

        let credentials = Arc::new(MemoryCredentialStore::new());
        let ledger = Arc::new(MemoryRoleLedger::new());
        let profiles = Arc::new(MemoryProfileStore::new());
        let audit = Arc::new(MemoryAudit::new());
        let gateway = Arc::new(MemoryRoleSwitchGateway::new(profiles.clone()));
        let local = Arc::new(MemoryLocalStore::new());
        let cache = Arc::new(RecordingQueryCache::new());
        let navigator = Arc::new(RecordingNavigator::new());

        ledger.grant(ADMIN, Role::PlatformAdmin);
        ledger.grant(ADMIN, Role::OfficeManager);
        ledger.grant(SELLER, Role::Salesperson);
        ledger.grant(SELLER, Role::TeamLeader);
        ledger.grant(TARGET, Role::Salesperson);

        profiles.insert_profile(UserProfile::new(ADMIN).with_display_name("Ada Admin"));
        profiles.insert_profile(UserProfile::new(TARGET).with_display_name("Sam Seller"));
        profiles.insert_profile(UserProfile::new(SELLER).with_display_name("Tia Lead"));
        profiles.set_access_level(TARGET, Role::Salesperson);
        profiles.set_access_level(SELLER, Role::TeamLeader);

        let authority = SessionAuthority::builder()
            .config(config)
            .credentials(credentials.clone())
            .role_ledger(ledger.clone())
            .profiles(profiles.clone())
            .audit(audit.clone())
            .role_switch(gateway.clone())
            .local_store(local.clone())
            .query_cache(cache.clone())
            .navigator(navigator.clone())
            .build()
            .expect("authority builds");

        Self {
            credentials,
            ledger,
            profiles,
            audit,
            gateway,
            local,
            cache,
            navigator,
            authority,
        }
    }

    /// Put a session in the credential store without notifying anyone
    pub fn seed_session(&self, user_id: &str) {
        self.credentials
            .emit(AuthEvent::InitialSession, Some(test_session(user_id)));
    }

    /// Seed `user_id` as signed in and run initialization
    pub async fn start_as(self, user_id: &str) -> Self {
        self.seed_session(user_id);
        self.authority.initialize().await.expect("initialize");
        self
    }

    pub async fn admin() -> Self {
        Self::new().start_as(ADMIN).await
    }

    /// Admin viewing as the target, with the cache log cleared
    pub async fn impersonating() -> Self {
        let h = Self::admin().await;
        h.authority
            .start_viewing_as(TARGET, Some("customer ticket"))
            .await
            .expect("view-as starts");
        h.cache.clear();
        h
    }
}

/// Poll `check` until it holds, failing the test after about two seconds
pub async fn eventually<F, Fut>(authority: &SessionAuthority, check: F)
where
    F: Fn(SessionAuthority) -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check(authority.clone()).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Everything currently buffered on `rx`
pub fn drain(rx: &mut broadcast::Receiver<AuthorityEvent>) -> Vec<AuthorityEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
