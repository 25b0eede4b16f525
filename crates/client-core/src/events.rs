//! Events published by the session authority
//!
//! Consumers can either register an [`AuthorityEventHandler`] through
//! `SessionAuthority::subscribe` or pull a broadcast receiver from
//! `SessionAuthority::events`. Both see the same events in the same order.
//!
//! ```rust
//! use agency_client_core::events::{AuthorityEvent, AuthorityEventHandler};
//! use async_trait::async_trait;
//!
//! struct BannerHandler;
//!
//! #[async_trait]
//! impl AuthorityEventHandler for BannerHandler {
//!     async fn on_event(&self, event: AuthorityEvent) {
//!         if let AuthorityEvent::ViewAsStarted { target_id, .. } = event {
//!             println!("Viewing as {}", target_id);
//!         }
//!     }
//! }
//! ```

use agency_auth_core::{Role, RoleSet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Why an impersonation session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `stop_viewing_as` was called
    Manual,
    /// Escape was pressed
    EscapeKey,
    /// The wall-clock cap elapsed
    Timeout,
    /// The operator signed out
    SignOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthorityEvent {
    /// A new real identity was established
    SessionEstablished { user_id: String },
    /// Tokens were replaced for the same user
    TokenRefreshed { user_id: String },
    /// Roles finished loading for the real identity
    RolesLoaded {
        user_id: String,
        roles: RoleSet,
        active_role: Role,
        fallback_applied: bool,
    },
    ActiveRoleChanged {
        user_id: String,
        previous: Option<Role>,
        current: Role,
    },
    ViewAsStarted {
        admin_id: String,
        target_id: String,
        reason: Option<String>,
        started_at: DateTime<Utc>,
    },
    ViewAsStopped {
        admin_id: String,
        target_id: String,
        reason: StopReason,
    },
    SignedOut,
}

/// Receives authority events
#[async_trait]
pub trait AuthorityEventHandler: Send + Sync {
    async fn on_event(&self, event: AuthorityEvent);
}

/// Opaque handle returned by `subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fan-out of authority events to handlers and broadcast receivers
pub(crate) struct EventBus {
    listeners: DashMap<ListenerId, Arc<dyn AuthorityEventHandler>>,
    tx: broadcast::Sender<AuthorityEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            listeners: DashMap::new(),
            tx,
        }
    }

    pub(crate) fn subscribe(&self, handler: Arc<dyn AuthorityEventHandler>) -> ListenerId {
        let id = ListenerId(Uuid::new_v4());
        self.listeners.insert(id, handler);
        id
    }

    pub(crate) fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub(crate) fn receiver(&self) -> broadcast::Receiver<AuthorityEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) async fn publish(&self, event: AuthorityEvent) {
        tracing::debug!("Publishing authority event: {:?}", event);
        // No receivers is fine.
        let _ = self.tx.send(event.clone());

        // Snapshot first so handlers never run while a map shard is locked.
        let handlers: Vec<Arc<dyn AuthorityEventHandler>> =
            self.listeners.iter().map(|entry| entry.value().clone()).collect();
        for handler in handlers {
            handler.on_event(event.clone()).await;
        }
    }
}
