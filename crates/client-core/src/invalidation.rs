//! Identity-scoped cache invalidation
//!
//! Feature data (tasks, conversations, team, ...) is cached without an
//! explicit identity key, so every identity transition must drop it. All
//! transitions go through [`IdentityCacheInvalidator::on_identity_changed`]
//! so a new transition path cannot forget a key.

use agency_auth_core::{CacheKey, QueryCache};
use std::sync::Arc;
use std::time::Duration;

/// Feature caches keyed implicitly by the acting identity
pub const IDENTITY_SCOPED_KEYS: [CacheKey; 5] = [
    CacheKey::Conversations,
    CacheKey::Tasks,
    CacheKey::Profile,
    CacheKey::Team,
    CacheKey::UnreadCounts,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityChange {
    SignedIn,
    SignedOut,
    ViewAsStarted,
    ViewAsStopped,
    RoleSwitched,
}

impl IdentityChange {
    /// Keys dropped for this transition
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys = IDENTITY_SCOPED_KEYS.to_vec();
        if *self != IdentityChange::ViewAsStarted {
            keys.push(CacheKey::ActiveRole);
        }
        keys
    }

    /// Impersonation start waits for the new identity to settle first
    fn is_deferred(&self) -> bool {
        *self == IdentityChange::ViewAsStarted
    }
}

#[derive(Clone)]
pub struct IdentityCacheInvalidator {
    cache: Arc<dyn QueryCache>,
    settle_delay: Duration,
}

impl IdentityCacheInvalidator {
    pub fn new(cache: Arc<dyn QueryCache>, settle_delay: Duration) -> Self {
        Self {
            cache,
            settle_delay,
        }
    }

    pub async fn on_identity_changed(&self, change: IdentityChange) {
        let keys = change.keys();
        if change.is_deferred() && !self.settle_delay.is_zero() {
            let cache = self.cache.clone();
            let delay = self.settle_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                invalidate_all(cache.as_ref(), &keys).await;
            });
        } else {
            invalidate_all(self.cache.as_ref(), &keys).await;
        }
        tracing::debug!("Identity change {:?} invalidated feature caches", change);
    }
}

async fn invalidate_all(cache: &dyn QueryCache, keys: &[CacheKey]) {
    for key in keys {
        cache.invalidate(*key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agency_auth_core::memory::RecordingQueryCache;

    #[tokio::test]
    async fn stop_includes_active_role() {
        let cache = Arc::new(RecordingQueryCache::new());
        let invalidator = IdentityCacheInvalidator::new(cache.clone(), Duration::from_millis(100));

        invalidator.on_identity_changed(IdentityChange::ViewAsStopped).await;

        assert_eq!(cache.invalidated().len(), 6);
        assert_eq!(cache.count(CacheKey::ActiveRole), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_waits_for_settle_delay() {
        let cache = Arc::new(RecordingQueryCache::new());
        let invalidator = IdentityCacheInvalidator::new(cache.clone(), Duration::from_millis(100));

        invalidator.on_identity_changed(IdentityChange::ViewAsStarted).await;
        tokio::task::yield_now().await;
        assert!(cache.invalidated().is_empty());

        tokio::time::sleep(Duration::from_millis(101)).await;
        assert_eq!(cache.invalidated(), IDENTITY_SCOPED_KEYS.to_vec());
    }
}
