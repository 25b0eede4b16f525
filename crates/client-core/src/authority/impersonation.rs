//! View-as (impersonation) for platform admins
//!
//! Starting is fail-closed: nothing changes unless the start audit call
//! acknowledges. Stopping is fail-open: local state always clears, the stop
//! audit call is best-effort. Sessions are capped at
//! `AuthorityConfig::impersonation_timeout` of wall-clock time, checked when
//! restoring after a reload and enforced by a timer for the remaining time.

use agency_auth_core::{Identity, Role};
use agency_infra_common::LogContext;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, Level};

use super::SessionAuthority;
use crate::error::{AuthorityError, AuthorityResult};
use crate::events::{AuthorityEvent, StopReason};
use crate::invalidation::IdentityChange;
use crate::state::ImpersonationState;

/// Local store key holding the impersonated user id
pub const VIEW_AS_USER_ID_KEY: &str = "viewAsUserId";
/// Local store key holding the start time in epoch milliseconds
pub const VIEW_AS_START_TIME_KEY: &str = "viewAsStartTime";
pub const VIEW_AS_REASON_KEY: &str = "viewAsReason";

/// Keyboard input relevant to the authority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    Enter,
    Character(char),
}

impl SessionAuthority {
    /// Start viewing the app as `target_id`.
    ///
    /// Requires the real user to hold `platform_admin`. Calling it while
    /// already impersonating replaces the target.
    pub async fn start_viewing_as(
        &self,
        target_id: &str,
        reason: Option<&str>,
    ) -> AuthorityResult<Identity> {
        let target_id = target_id.trim();
        if target_id.is_empty() {
            return Err(AuthorityError::InvalidInput {
                field: "target_id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        let max_reason = self.shared.config.max_reason_length;
        if reason.as_ref().map_or(false, |r| r.chars().count() > max_reason) {
            return Err(AuthorityError::InvalidInput {
                field: "reason".to_string(),
                reason: format!("longer than {} characters", max_reason),
            });
        }

        let real = {
            let inner = self.shared.inner.read().await;
            let real = inner.real.clone().ok_or(AuthorityError::NotAuthenticated)?;
            if !inner.roles.contains(Role::PlatformAdmin) {
                return Err(AuthorityError::InsufficientPrivileges {
                    reason: "viewing as another user requires platform_admin".to_string(),
                });
            }
            real
        };
        if real.id == target_id {
            return Err(AuthorityError::InvalidInput {
                field: "target_id".to_string(),
                reason: "cannot view as yourself".to_string(),
            });
        }

        let span = LogContext::with_operation("authority", "start_viewing_as")
            .with_field("admin", &real.id)
            .with_field("target", target_id)
            .span(Level::INFO);

        async move {
            let backends = &self.shared.backends;
            if let Err(source) = backends
                .audit
                .log_start(&real.id, target_id, reason.as_deref())
                .await
            {
                tracing::error!("Impersonation audit was not acknowledged: {}", source);
                return Err(AuthorityError::AuditRejected {
                    target_id: target_id.to_string(),
                    source,
                });
            }

            let (profile, access_level) = futures::future::join(
                backends.profiles.get_profile(target_id),
                backends.profiles.get_access_level(target_id),
            )
            .await;
            let target = match profile {
                Ok(profile) => profile,
                Err(source) => {
                    tracing::error!("Impersonation target lookup failed: {}", source);
                    self.log_stop_best_effort(&real.id, target_id).await;
                    return Err(AuthorityError::TargetUnavailable {
                        target_id: target_id.to_string(),
                        source,
                    });
                }
            };
            let target_role = self.resolve_target_role(target_id, access_level);

            let started_at = Utc::now();
            let state = ImpersonationState {
                target,
                target_role,
                real: real.clone(),
                started_at,
                reason: reason.clone(),
            };

            let (identity, replaced) = {
                let _gate = self.shared.role_write_gate.lock().await;
                let mut inner = self.shared.inner.write().await;
                if inner.real.as_ref().map(|p| p.id.as_str()) != Some(real.id.as_str()) {
                    drop(inner);
                    self.log_stop_best_effort(&real.id, target_id).await;
                    return Err(AuthorityError::NotAuthenticated);
                }
                let replaced = inner.impersonation.replace(state);
                let identity = inner.identity().ok_or(AuthorityError::NotAuthenticated)?;
                // Keys and timer go in under the guard so a concurrent
                // sign-out always sees them and tears them down.
                self.persist_view_as(target_id, started_at, reason.as_deref());
                self.schedule_expiry(started_at);
                (identity, replaced)
            };

            if let Some(previous) = replaced {
                if previous.target.id != target_id {
                    self.log_stop_best_effort(&real.id, &previous.target.id).await;
                }
            }

            tracing::info!("Viewing as {} ({})", target_id, target_role);
            self.shared
                .events
                .publish(AuthorityEvent::ViewAsStarted {
                    admin_id: real.id.clone(),
                    target_id: target_id.to_string(),
                    reason,
                    started_at,
                })
                .await;
            self.shared
                .invalidator
                .on_identity_changed(IdentityChange::ViewAsStarted)
                .await;
            Ok(identity)
        }
        .instrument(span)
        .await
    }

    /// Stop viewing as another user and restore the real identity.
    ///
    /// Returns whether an impersonation was active.
    pub async fn stop_viewing_as(&self) -> bool {
        self.stop_with(StopReason::Manual).await
    }

    /// Escape ends impersonation; every other key is ignored
    pub async fn handle_key(&self, key: Key) -> bool {
        if key != Key::Escape {
            return false;
        }
        self.stop_with(StopReason::EscapeKey).await
    }

    pub(crate) async fn stop_with(&self, reason: StopReason) -> bool {
        let ended = self.shared.inner.write().await.impersonation.take();
        let Some(state) = ended else {
            return false;
        };
        self.finish_impersonation(state, reason).await;
        self.shared
            .invalidator
            .on_identity_changed(IdentityChange::ViewAsStopped)
            .await;
        true
    }

    /// Tear down an impersonation already removed from the state
    pub(crate) async fn finish_impersonation(&self, state: ImpersonationState, reason: StopReason) {
        self.cancel_expiry_timer();
        self.clear_view_as_keys();
        self.log_stop_best_effort(&state.real.id, &state.target.id).await;

        tracing::info!(
            "Stopped viewing as {} ({:?}), restored {}",
            state.target.id,
            reason,
            state.real.id
        );
        self.shared
            .events
            .publish(AuthorityEvent::ViewAsStopped {
                admin_id: state.real.id,
                target_id: state.target.id,
                reason,
            })
            .await;
    }

    /// Bring back an impersonation persisted before a reload, or expire it
    pub(crate) async fn restore_impersonation(&self) {
        let store = &self.shared.backends.local_store;
        let Some(target_id) = store.get(VIEW_AS_USER_ID_KEY) else {
            return;
        };
        let started_at = store
            .get(VIEW_AS_START_TIME_KEY)
            .and_then(|raw| raw.parse::<i64>().ok())
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single());
        let reason = store.get(VIEW_AS_REASON_KEY);

        let real = {
            let inner = self.shared.inner.read().await;
            if inner.impersonation.is_some() {
                return;
            }
            match &inner.real {
                Some(real) if inner.roles.contains(Role::PlatformAdmin) => real.clone(),
                _ => {
                    drop(inner);
                    tracing::warn!("Discarding persisted view-as of {}; operator is not a platform admin", target_id);
                    self.clear_view_as_keys();
                    return;
                }
            }
        };

        let Some(started_at) = started_at else {
            tracing::warn!("Discarding persisted view-as of {}; start time unreadable", target_id);
            self.clear_view_as_keys();
            return;
        };

        let timeout = self.shared.config.impersonation_timeout();
        let elapsed = (Utc::now() - started_at).to_std().unwrap_or(Duration::ZERO);
        if elapsed >= timeout {
            tracing::info!("Persisted view-as of {} expired, not restoring", target_id);
            self.clear_view_as_keys();
            self.log_stop_best_effort(&real.id, &target_id).await;
            self.shared
                .events
                .publish(AuthorityEvent::ViewAsStopped {
                    admin_id: real.id,
                    target_id,
                    reason: StopReason::Timeout,
                })
                .await;
            return;
        }

        let (profile, access_level) = futures::future::join(
            self.shared.backends.profiles.get_profile(&target_id),
            self.shared.backends.profiles.get_access_level(&target_id),
        )
        .await;
        let target = match profile {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!("Could not restore view-as of {}: {}", target_id, e);
                self.clear_view_as_keys();
                self.log_stop_best_effort(&real.id, &target_id).await;
                return;
            }
        };
        let target_role = self.resolve_target_role(&target_id, access_level);

        {
            let _gate = self.shared.role_write_gate.lock().await;
            let mut inner = self.shared.inner.write().await;
            let same_operator = inner.real.as_ref().map(|p| p.id.as_str()) == Some(real.id.as_str());
            if !same_operator || inner.impersonation.is_some() {
                return;
            }
            inner.impersonation = Some(ImpersonationState {
                target,
                target_role,
                real: real.clone(),
                started_at,
                reason: reason.clone(),
            });
            self.schedule_expiry(started_at);
        }

        tracing::info!("Restored view-as of {} started at {}", target_id, started_at);
        self.shared
            .events
            .publish(AuthorityEvent::ViewAsStarted {
                admin_id: real.id,
                target_id,
                reason,
                started_at,
            })
            .await;
        self.shared
            .invalidator
            .on_identity_changed(IdentityChange::ViewAsStarted)
            .await;
    }

    fn resolve_target_role(
        &self,
        target_id: &str,
        access_level: agency_auth_core::Result<Option<Role>>,
    ) -> Role {
        let fallback = self.shared.config.fallback_role;
        match access_level {
            Ok(Some(role)) => role,
            Ok(None) => fallback,
            Err(e) => {
                tracing::warn!("Access level lookup for {} failed, rendering as {}: {}", target_id, fallback, e);
                fallback
            }
        }
    }

    async fn log_stop_best_effort(&self, admin_id: &str, target_id: &str) {
        if let Err(e) = self.shared.backends.audit.log_stop(admin_id, target_id).await {
            tracing::warn!("Stop-impersonation audit for {} failed (ignored): {}", target_id, e);
        }
    }

    fn persist_view_as(&self, target_id: &str, started_at: DateTime<Utc>, reason: Option<&str>) {
        let store = &self.shared.backends.local_store;
        store.set(VIEW_AS_USER_ID_KEY, target_id);
        store.set(VIEW_AS_START_TIME_KEY, &started_at.timestamp_millis().to_string());
        match reason {
            Some(reason) => store.set(VIEW_AS_REASON_KEY, reason),
            None => store.remove(VIEW_AS_REASON_KEY),
        }
    }

    pub(crate) fn clear_view_as_keys(&self) {
        let store = &self.shared.backends.local_store;
        store.remove(VIEW_AS_USER_ID_KEY);
        store.remove(VIEW_AS_START_TIME_KEY);
        store.remove(VIEW_AS_REASON_KEY);
    }

    fn schedule_expiry(&self, started_at: DateTime<Utc>) {
        let timeout = self.shared.config.impersonation_timeout();
        let elapsed = (Utc::now() - started_at).to_std().unwrap_or(Duration::ZERO);
        let remaining = timeout.saturating_sub(elapsed);

        let mut slot = self.shared.expiry_timer.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        let generation = self
            .shared
            .expiry_generation
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        let weak = Arc::downgrade(&self.shared);
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            if let Some(shared) = weak.upgrade() {
                SessionAuthority { shared }.expire_impersonation(generation).await;
            }
        }));
        tracing::debug!("Impersonation expires in {:?}", remaining);
    }

    async fn expire_impersonation(&self, generation: u64) {
        {
            let mut slot = self.shared.expiry_timer.lock();
            let current = self
                .shared
                .expiry_generation
                .load(std::sync::atomic::Ordering::SeqCst);
            if current != generation {
                return;
            }
            // Detach our own handle so the stop path does not abort this task.
            slot.take();
        }
        tracing::info!("Impersonation reached its time limit");
        self.stop_with(StopReason::Timeout).await;
    }

    pub(crate) fn cancel_expiry_timer(&self) {
        let mut slot = self.shared.expiry_timer.lock();
        self.shared
            .expiry_generation
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(timer) = slot.take() {
            timer.abort();
        }
    }
}
