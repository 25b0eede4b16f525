//! Session & Role Authority
//!
//! The single source of truth for who the user is, which roles they hold,
//! and whether a platform admin is currently viewing the app as someone
//! else. Every feature hook reads identity from here and nowhere else.
//!
//! A [`SessionAuthority`] is a cheap clonable handle. Build one per
//! application instance with [`SessionAuthorityBuilder`], call
//! [`SessionAuthority::initialize`] once, and pass clones to consumers.
//!
//! The work is split across:
//! - `session`: initial check, auth feed handling, role loading, role
//!   switching and sign-out
//! - `impersonation`: view-as start/stop, expiry timer, reload restore

mod builder;
mod impersonation;
mod session;

pub use builder::SessionAuthorityBuilder;
pub use impersonation::{Key, VIEW_AS_REASON_KEY, VIEW_AS_START_TIME_KEY, VIEW_AS_USER_ID_KEY};

use agency_auth_core::{
    AuthSubscription, CredentialStore, Identity, ImpersonationAudit, LocalStore, Navigator,
    ProfileStore, Role, RoleLedger, RoleSet, RoleSwitchGateway, Session,
};
use parking_lot::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;

use crate::config::AuthorityConfig;
use crate::events::{AuthorityEvent, AuthorityEventHandler, EventBus, ListenerId};
use crate::invalidation::IdentityCacheInvalidator;
use crate::state::{AuthorityInner, AuthorityState, ImpersonationState};

/// Backend collaborators the authority talks to
pub(crate) struct Backends {
    pub(crate) credentials: Arc<dyn CredentialStore>,
    pub(crate) ledger: Arc<dyn RoleLedger>,
    pub(crate) profiles: Arc<dyn ProfileStore>,
    pub(crate) audit: Arc<dyn ImpersonationAudit>,
    pub(crate) role_switch: Arc<dyn RoleSwitchGateway>,
    pub(crate) local_store: Arc<dyn LocalStore>,
    pub(crate) navigator: Arc<dyn Navigator>,
}

pub(crate) struct Shared {
    pub(crate) config: AuthorityConfig,
    pub(crate) backends: Backends,
    pub(crate) inner: RwLock<AuthorityInner>,
    /// `true` once the initial check completed and no role load is pending
    pub(crate) ready: watch::Sender<bool>,
    pub(crate) events: EventBus,
    pub(crate) invalidator: IdentityCacheInvalidator,
    pub(crate) auth_subscription: Mutex<Option<AuthSubscription>>,
    pub(crate) feed_task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) expiry_timer: Mutex<Option<JoinHandle<()>>>,
    /// Bumped whenever an expiry timer is scheduled or cancelled
    pub(crate) expiry_generation: AtomicU64,
    /// Held across a role switch round trip and while a view-as is committed
    pub(crate) role_write_gate: tokio::sync::Mutex<()>,
}

impl Shared {
    /// Mirror the loading flag of `inner` into the ready channel
    pub(crate) fn sync_ready(&self, inner: &AuthorityInner) {
        let ready = inner.is_ready();
        self.ready.send_if_modified(|current| {
            let changed = *current != ready;
            *current = ready;
            changed
        });
    }
}

#[derive(Clone)]
pub struct SessionAuthority {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for SessionAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAuthority")
            .field("config", &self.shared.config)
            .field("listeners", &self.shared.events.listener_count())
            .finish()
    }
}

impl SessionAuthority {
    pub fn builder() -> SessionAuthorityBuilder {
        SessionAuthorityBuilder::new()
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.shared.config
    }

    // ===== READS =====

    /// Whether identity-dependent reads should still wait
    pub fn is_loading(&self) -> bool {
        !*self.shared.ready.borrow()
    }

    /// Resolve once the initial check finished and roles are loaded
    pub async fn wait_until_ready(&self) {
        let mut rx = self.shared.ready.subscribe();
        // The sender lives in `shared`, which `self` keeps alive.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    pub async fn state(&self) -> AuthorityState {
        self.shared.inner.read().await.state()
    }

    /// The acting identity, if any
    pub async fn get_identity(&self) -> Option<Identity> {
        self.shared.inner.read().await.identity()
    }

    /// The role the UI renders as
    pub async fn get_active_role(&self) -> Option<Role> {
        self.shared.inner.read().await.effective_active_role()
    }

    /// Roles of the authenticated user
    pub async fn get_roles(&self) -> RoleSet {
        self.shared.inner.read().await.roles.clone()
    }

    pub async fn has_role(&self, role: Role) -> bool {
        self.shared.inner.read().await.roles.contains(role)
    }

    pub async fn get_session(&self) -> Option<Session> {
        self.shared.inner.read().await.session.clone()
    }

    /// Operator privilege; stays `true` while impersonating
    pub async fn is_platform_admin(&self) -> bool {
        self.shared.inner.read().await.is_platform_admin()
    }

    pub async fn is_impersonating(&self) -> bool {
        self.shared.inner.read().await.impersonation.is_some()
    }

    pub async fn impersonation(&self) -> Option<ImpersonationState> {
        self.shared.inner.read().await.impersonation.clone()
    }

    // ===== EVENTS =====

    pub fn subscribe(&self, handler: Arc<dyn AuthorityEventHandler>) -> ListenerId {
        self.shared.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    pub fn events(&self) -> broadcast::Receiver<AuthorityEvent> {
        self.shared.events.receiver()
    }

    // ===== TEARDOWN =====

    /// Detach from the credential feed and stop background work
    pub async fn shutdown(&self) {
        if let Some(subscription) = self.shared.auth_subscription.lock().take() {
            subscription.unsubscribe();
        }
        if let Some(task) = self.shared.feed_task.lock().take() {
            task.abort();
        }
        self.cancel_expiry_timer();
        let mut inner = self.shared.inner.write().await;
        if let Some(flag) = inner.role_load.take() {
            flag.cancel();
        }
        tracing::debug!("Session authority shut down");
    }
}
