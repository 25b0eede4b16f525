//! Route-role synchronizer
//!
//! Keeps the persisted active role aligned with the navigation location so
//! deep links land in the right role-scoped UI. Writes go exclusively
//! through [`SessionAuthority::switch_role`], and nothing is written while a
//! platform admin is viewing as another user.

use agency_auth_core::Role;
use agency_infra_common::LogContext;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, Level};
use url::Url;

use crate::authority::SessionAuthority;
use crate::error::{AuthorityError, AuthorityResult};

/// Path prefix to role mapping, matched longest prefix first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRoleMap {
    entries: Vec<(String, Role)>,
}

impl Default for RouteRoleMap {
    fn default() -> Self {
        Self::new([
            ("/admin", Role::PlatformAdmin),
            ("/office", Role::OfficeManager),
            ("/team", Role::TeamLeader),
            ("/plan-dashboard", Role::TeamLeader),
            ("/plan", Role::Salesperson),
            ("/assistant", Role::Assistant),
            ("/pipeline", Role::Salesperson),
        ])
    }
}

impl RouteRoleMap {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Role)>,
        S: Into<String>,
    {
        let mut map = Self {
            entries: Vec::new(),
        };
        for (prefix, role) in entries {
            map.insert(prefix, role);
        }
        map
    }

    /// Add or replace a mapping
    pub fn insert(&mut self, prefix: impl Into<String>, role: Role) {
        let prefix = prefix.into();
        self.entries.retain(|(existing, _)| *existing != prefix);
        self.entries.push((prefix, role));
        // Longer prefixes first so `/plan-dashboard` is not shadowed by `/plan`.
        self.entries
            .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    }

    /// Role for `location`, which may be a bare path or a full URL
    pub fn resolve(&self, location: &str) -> Option<Role> {
        let path = normalize_path(location)?;
        self.entries
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, role)| *role)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Strip query string and fragment, keeping only the path
fn normalize_path(location: &str) -> Option<String> {
    let base = Url::parse("http://localhost/").ok()?;
    let url = base.join(location.trim()).ok()?;
    Some(url.path().to_string())
}

/// What a navigation did to the active role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Impersonation active; nothing written
    Suppressed,
    Unmapped,
    AlreadyActive,
    /// Mapped role is not held by the user
    NotGranted,
    Switched(Role),
}

#[derive(Debug, Clone)]
pub struct RouteRoleSynchronizer {
    authority: SessionAuthority,
    map: RouteRoleMap,
}

impl RouteRoleSynchronizer {
    pub fn new(authority: SessionAuthority, map: RouteRoleMap) -> Self {
        Self { authority, map }
    }

    pub fn map(&self) -> &RouteRoleMap {
        &self.map
    }

    /// React to a navigation to `location`
    pub async fn on_navigate(&self, location: &str) -> AuthorityResult<SyncOutcome> {
        let span = LogContext::with_operation("route_sync", "on_navigate")
            .with_field("path", location)
            .span(Level::DEBUG);

        async {
            self.authority.wait_until_ready().await;

            if self.authority.is_impersonating().await {
                tracing::debug!("Impersonating, role sync suppressed");
                return Ok(SyncOutcome::Suppressed);
            }
            let Some(role) = self.map.resolve(location) else {
                return Ok(SyncOutcome::Unmapped);
            };
            if self.authority.get_active_role().await == Some(role) {
                return Ok(SyncOutcome::AlreadyActive);
            }
            if !self.authority.has_role(role).await {
                tracing::debug!("Route maps to {} which the user does not hold", role);
                return Ok(SyncOutcome::NotGranted);
            }

            match self.authority.switch_role(role).await {
                Ok(role) => {
                    tracing::info!("Active role synced to {} from route", role);
                    Ok(SyncOutcome::Switched(role))
                }
                // Impersonation began between the check and the write.
                Err(AuthorityError::ImpersonationActive { .. }) => Ok(SyncOutcome::Suppressed),
                Err(AuthorityError::RoleNotGranted { .. }) => Ok(SyncOutcome::NotGranted),
                Err(e) => Err(e),
            }
        }
        .instrument(span)
        .await
    }

    /// Process navigation paths from `rx` until the channel closes
    pub fn spawn(self, mut rx: mpsc::Receiver<String>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(location) = rx.recv().await {
                if let Err(e) = self.on_navigate(&location).await {
                    tracing::warn!("Role sync for {} failed: {}", location, e);
                }
            }
            tracing::debug!("Navigation channel closed, role sync stopped");
        })
    }
}
