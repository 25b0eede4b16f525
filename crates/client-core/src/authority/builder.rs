//! Builder for [`SessionAuthority`]
//!
//! Every backend collaborator is injected; nothing is looked up globally, so
//! tests can stand up isolated authorities side by side.

use agency_auth_core::memory::MemoryLocalStore;
use agency_auth_core::{
    CredentialStore, FeatureDataCache, ImpersonationAudit, LocalStore, Navigator, ProfileStore,
    QueryCache, RoleLedger, RoleSwitchGateway,
};
use parking_lot::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

use super::{Backends, SessionAuthority, Shared};
use crate::config::AuthorityConfig;
use crate::error::{AuthorityError, AuthorityResult};
use crate::events::EventBus;
use crate::invalidation::IdentityCacheInvalidator;
use crate::state::AuthorityInner;

#[derive(Default)]
pub struct SessionAuthorityBuilder {
    config: Option<AuthorityConfig>,
    credentials: Option<Arc<dyn CredentialStore>>,
    ledger: Option<Arc<dyn RoleLedger>>,
    profiles: Option<Arc<dyn ProfileStore>>,
    audit: Option<Arc<dyn ImpersonationAudit>>,
    role_switch: Option<Arc<dyn RoleSwitchGateway>>,
    local_store: Option<Arc<dyn LocalStore>>,
    query_cache: Option<Arc<dyn QueryCache>>,
    navigator: Option<Arc<dyn Navigator>>,
}

impl SessionAuthorityBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: AuthorityConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    pub fn role_ledger(mut self, ledger: Arc<dyn RoleLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn profiles(mut self, profiles: Arc<dyn ProfileStore>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn ImpersonationAudit>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn role_switch(mut self, gateway: Arc<dyn RoleSwitchGateway>) -> Self {
        self.role_switch = Some(gateway);
        self
    }

    /// Defaults to a process-local store that does not survive restarts
    pub fn local_store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.local_store = Some(store);
        self
    }

    /// Defaults to an in-process [`FeatureDataCache`]
    pub fn query_cache(mut self, cache: Arc<dyn QueryCache>) -> Self {
        self.query_cache = Some(cache);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn build(self) -> AuthorityResult<SessionAuthority> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let backends = Backends {
            credentials: require(self.credentials, "credentials")?,
            ledger: require(self.ledger, "role_ledger")?,
            profiles: require(self.profiles, "profiles")?,
            audit: require(self.audit, "audit")?,
            role_switch: require(self.role_switch, "role_switch")?,
            local_store: self
                .local_store
                .unwrap_or_else(|| Arc::new(MemoryLocalStore::new())),
            navigator: require(self.navigator, "navigator")?,
        };
        let cache = self
            .query_cache
            .unwrap_or_else(|| Arc::new(FeatureDataCache::new()));

        let (ready, _) = watch::channel(false);
        let shared = Shared {
            invalidator: IdentityCacheInvalidator::new(cache, config.invalidation_settle_delay()),
            events: EventBus::new(config.event_channel_capacity),
            config,
            backends,
            inner: RwLock::new(AuthorityInner::new()),
            ready,
            auth_subscription: Mutex::new(None),
            feed_task: Mutex::new(None),
            expiry_timer: Mutex::new(None),
            expiry_generation: AtomicU64::new(0),
            role_write_gate: tokio::sync::Mutex::new(()),
        };

        Ok(SessionAuthority {
            shared: Arc::new(shared),
        })
    }
}

fn require<T: ?Sized>(value: Option<Arc<T>>, name: &str) -> AuthorityResult<Arc<T>> {
    value.ok_or_else(|| AuthorityError::Configuration(format!("missing collaborator: {}", name)))
}
