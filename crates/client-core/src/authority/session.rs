//! Session lifecycle: initial check, auth feed, role loading, sign-out

use agency_auth_core::{AuthEvent, Role, RoleSet, Session, UserProfile};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

use super::{SessionAuthority, Shared};
use crate::error::{AuthorityError, AuthorityResult};
use crate::events::{AuthorityEvent, StopReason};
use crate::invalidation::IdentityChange;
use crate::state::{CancelFlag, ImpersonationState, InitPhase};

/// Where a session update came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionSource {
    InitialCheck,
    Feed(AuthEvent),
}

/// Follow-up work decided under the state lock and run after releasing it
#[derive(Debug, Default)]
struct Followup {
    events: Vec<AuthorityEvent>,
    change: Option<IdentityChange>,
    ended_impersonation: Option<ImpersonationState>,
    role_load: Option<(String, CancelFlag)>,
}

impl SessionAuthority {
    /// Run the initial session check and attach to the credential feed.
    ///
    /// Resolves once roles for the initial identity are loaded and any
    /// persisted impersonation was restored or expired. Calling it again is
    /// a no-op.
    pub async fn initialize(&self) -> AuthorityResult<()> {
        {
            let mut inner = self.shared.inner.write().await;
            if inner.phase != InitPhase::NotStarted {
                tracing::debug!("Session authority already initialized");
                return Ok(());
            }
            inner.phase = InitPhase::Checking;
        }

        self.attach_auth_feed();

        let initial = match self.shared.backends.credentials.get_session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Initial session check failed, treating as signed out: {}", e);
                None
            }
        };
        self.apply_session(initial, SessionSource::InitialCheck).await;

        self.wait_until_ready().await;
        self.restore_impersonation().await;
        Ok(())
    }

    fn attach_auth_feed(&self) {
        let (tx, mut rx) = mpsc::unbounded_channel::<(AuthEvent, Option<Session>)>();
        let subscription = self
            .shared
            .backends
            .credentials
            .on_auth_state_change(Arc::new(move |event, session| {
                // Receiver gone means the authority shut down.
                let _ = tx.send((event, session));
            }));
        *self.shared.auth_subscription.lock() = Some(subscription);

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let task = tokio::spawn(async move {
            while let Some((event, session)) = rx.recv().await {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let authority = SessionAuthority { shared };
                tracing::debug!("Auth feed event {:?}", event);
                authority.apply_session(session, SessionSource::Feed(event)).await;
            }
        });
        *self.shared.feed_task.lock() = Some(task);
    }

    async fn apply_session(&self, session: Option<Session>, source: SessionSource) {
        let followup = {
            let mut inner = self.shared.inner.write().await;
            match (inner.phase, source, &session) {
                (InitPhase::Ready, SessionSource::InitialCheck, _) => {
                    tracing::debug!("Initial session check resolved after the feed; keeping newer state");
                    return;
                }
                (InitPhase::Checking, SessionSource::Feed(event), None) => {
                    tracing::debug!("Ignoring {:?} without session before the initial check completed", event);
                    return;
                }
                (InitPhase::NotStarted, _, _) => return,
                _ => {}
            }
            inner.phase = InitPhase::Ready;

            let mut followup = Followup::default();
            match session {
                None => {
                    let (had_session, ended) = inner.clear();
                    if had_session {
                        tracing::info!("Session ended");
                        followup.events.push(AuthorityEvent::SignedOut);
                        followup.change = Some(IdentityChange::SignedOut);
                    }
                    followup.ended_impersonation = ended;
                }
                Some(session) if inner.session.as_ref().map(|s| &s.user_id) == Some(&session.user_id) => {
                    if source == SessionSource::Feed(AuthEvent::TokenRefreshed) {
                        followup.events.push(AuthorityEvent::TokenRefreshed {
                            user_id: session.user_id.clone(),
                        });
                    }
                    inner.real = Some(UserProfile::from(&session));
                    inner.session = Some(session);
                }
                Some(session) => {
                    let (_, ended) = inner.clear();
                    followup.ended_impersonation = ended;

                    let user_id = session.user_id.clone();
                    tracing::info!("Session established for {}", user_id);
                    let flag = CancelFlag::default();
                    inner.real = Some(UserProfile::from(&session));
                    inner.session = Some(session);
                    inner.roles_loading = true;
                    inner.role_load = Some(flag.clone());

                    followup.events.push(AuthorityEvent::SessionEstablished {
                        user_id: user_id.clone(),
                    });
                    followup.change = Some(IdentityChange::SignedIn);
                    followup.role_load = Some((user_id, flag));
                }
            }
            self.shared.sync_ready(&inner);
            followup
        };

        self.run_followup(followup, StopReason::SignOut).await;
    }

    async fn run_followup(&self, followup: Followup, stop_reason: StopReason) {
        if let Some(ended) = followup.ended_impersonation {
            self.finish_impersonation(ended, stop_reason).await;
        }
        for event in followup.events {
            self.shared.events.publish(event).await;
        }
        if let Some(change) = followup.change {
            self.shared.invalidator.on_identity_changed(change).await;
        }
        if let Some((user_id, flag)) = followup.role_load {
            let shared = self.shared.clone();
            tokio::spawn(async move {
                SessionAuthority { shared }.load_roles(user_id, flag).await;
            });
        }
    }

    /// Fetch roles and the persisted active role for `user_id`.
    ///
    /// Failures degrade to the fallback role. The result is dropped if
    /// `flag` was raised because the identity changed meanwhile.
    async fn load_roles(&self, user_id: String, flag: CancelFlag) {
        let fallback = self.shared.config.fallback_role;
        let backends = &self.shared.backends;

        let (roles, fallback_applied) = match backends.ledger.fetch_role_grants(&user_id).await {
            Ok(grants) => {
                let roles = RoleSet::from_grants(&grants);
                if roles.is_empty() {
                    tracing::warn!("No active roles for {}, applying fallback role {}", user_id, fallback);
                    (RoleSet::fallback(fallback), true)
                } else {
                    (roles, false)
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Role fetch for {} failed, applying fallback role {}: {}",
                    user_id,
                    fallback,
                    e
                );
                (RoleSet::fallback(fallback), true)
            }
        };

        let persisted = match backends.profiles.get_active_role(&user_id).await {
            Ok(role) => role,
            Err(e) => {
                tracing::warn!("Could not read persisted active role for {}: {}", user_id, e);
                None
            }
        };

        let active_role = persisted
            .filter(|role| roles.contains(*role))
            .or_else(|| roles.first())
            .unwrap_or(fallback);

        {
            let mut inner = self.shared.inner.write().await;
            let same_identity = inner.real.as_ref().map(|p| p.id.as_str()) == Some(user_id.as_str());
            if flag.is_cancelled() || !same_identity {
                tracing::debug!("Discarding role load for {}; identity changed", user_id);
                return;
            }
            inner.roles = roles.clone();
            inner.active_role = Some(active_role);
            inner.roles_loading = false;
            inner.role_load = None;
            self.shared.sync_ready(&inner);
        }

        tracing::debug!("Roles for {}: {:?} (active {})", user_id, roles, active_role);
        self.shared
            .events
            .publish(AuthorityEvent::RolesLoaded {
                user_id,
                roles,
                active_role,
                fallback_applied,
            })
            .await;
    }

    /// Switch the persisted active role through the role switch gateway.
    ///
    /// Refused while impersonating: role writes must never land on a viewed
    /// identity. A view-as cannot be committed while a switch is in flight,
    /// it waits for the gateway round trip to finish first.
    pub async fn switch_role(&self, role: Role) -> AuthorityResult<Role> {
        let gate = self.shared.role_write_gate.lock().await;
        let user_id = {
            let inner = self.shared.inner.read().await;
            let real = inner.real.as_ref().ok_or(AuthorityError::NotAuthenticated)?;
            if inner.impersonation.is_some() {
                return Err(AuthorityError::ImpersonationActive {
                    operation: "switch_role".to_string(),
                });
            }
            if !inner.roles.contains(role) {
                return Err(AuthorityError::RoleNotGranted { role });
            }
            if inner.active_role == Some(role) {
                return Ok(role);
            }
            real.id.clone()
        };

        let confirmation = self
            .shared
            .backends
            .role_switch
            .switch_role(&user_id, role)
            .await
            .map_err(|source| {
                tracing::warn!("Role switch to {} for {} failed: {}", role, user_id, source);
                AuthorityError::RoleSwitchFailed { role, source }
            })?;

        let previous = {
            let mut inner = self.shared.inner.write().await;
            if inner.real.as_ref().map(|p| p.id.as_str()) != Some(user_id.as_str()) {
                return Err(AuthorityError::NotAuthenticated);
            }
            if inner.impersonation.is_some() {
                tracing::warn!(
                    "View-as began during role switch; {} written for operator {} only",
                    confirmation.active_role,
                    user_id
                );
                return Err(AuthorityError::ImpersonationActive {
                    operation: "switch_role".to_string(),
                });
            }
            inner.active_role.replace(confirmation.active_role)
        };
        drop(gate);

        tracing::info!("Active role for {} switched to {}", user_id, confirmation.active_role);
        self.shared
            .events
            .publish(AuthorityEvent::ActiveRoleChanged {
                user_id,
                previous,
                current: confirmation.active_role,
            })
            .await;
        self.shared
            .invalidator
            .on_identity_changed(IdentityChange::RoleSwitched)
            .await;
        Ok(confirmation.active_role)
    }

    /// Sign out and clear all local identity state.
    ///
    /// Local state is cleared and navigation happens even when the backend
    /// sign-out call fails.
    pub async fn sign_out(&self) {
        if let Err(e) = self.shared.backends.credentials.sign_out().await {
            tracing::warn!("Backend sign-out failed, clearing local state anyway: {}", e);
        }

        let followup = {
            let mut inner = self.shared.inner.write().await;
            let (had_session, ended) = inner.clear();
            if inner.phase != InitPhase::NotStarted {
                inner.phase = InitPhase::Ready;
            }
            self.shared.sync_ready(&inner);
            Followup {
                events: if had_session {
                    vec![AuthorityEvent::SignedOut]
                } else {
                    Vec::new()
                },
                change: Some(IdentityChange::SignedOut),
                ended_impersonation: ended,
                role_load: None,
            }
        };
        self.clear_view_as_keys();

        self.run_followup(followup, StopReason::SignOut).await;
        tracing::info!("Signed out");
        self.shared
            .backends
            .navigator
            .navigate(&self.shared.config.sign_in_path);
    }
}
