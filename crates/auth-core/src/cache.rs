//! Identity-scoped feature data cache
//!
//! Feature hooks (tasks, conversations, team, ...) park their query results
//! here. Entries are implicitly owned by whoever the current identity is, so
//! the session authority invalidates whole [`CacheKey`] scopes whenever the
//! identity changes.

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;

use crate::backend::{CacheKey, QueryCache};

const DEFAULT_MAX_ENTRIES: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QueryKey {
    scope: CacheKey,
    discriminator: String,
}

/// In-process query cache backed by moka
#[derive(Clone)]
pub struct FeatureDataCache {
    entries: Cache<QueryKey, Arc<serde_json::Value>>,
}

impl FeatureDataCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .support_invalidation_closures()
            .build();
        Self { entries }
    }

    /// Store a query result, e.g. `(Tasks, "list:today")`
    pub async fn insert(&self, scope: CacheKey, discriminator: impl Into<String>, value: serde_json::Value) {
        let key = QueryKey {
            scope,
            discriminator: discriminator.into(),
        };
        self.entries.insert(key, Arc::new(value)).await;
    }

    pub async fn get(&self, scope: CacheKey, discriminator: &str) -> Option<Arc<serde_json::Value>> {
        let key = QueryKey {
            scope,
            discriminator: discriminator.to_string(),
        };
        self.entries.get(&key).await
    }
}

impl Default for FeatureDataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FeatureDataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureDataCache")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

#[async_trait]
impl QueryCache for FeatureDataCache {
    async fn invalidate(&self, key: CacheKey) {
        match self.entries.invalidate_entries_if(move |k, _| k.scope == key) {
            Ok(_) => tracing::debug!("Invalidated cached '{}' queries", key),
            Err(e) => tracing::warn!("Failed to invalidate cached '{}' queries: {}", key, e),
        }
    }
}
