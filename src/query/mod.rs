//! Read path: recent-entry queries with a short-lived result cache.
//!
//! The cache is keyed by the clamped limit value and is the only shared
//! mutable state in the service. Staleness up to the TTL is an accepted
//! trade-off; the underlying store is never affected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::ServerConfig;
use crate::db::{DbError, Store, StoredEntry};

/// Whether a response was served from cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

struct CacheEntry {
    fetched_at: Instant,
    rows: Arc<Vec<StoredEntry>>,
}

/// Read-only query service over the metric store.
pub struct QueryService {
    store: Store,
    default_limit: i64,
    max_limit: i64,
    ttl: Duration,
    storage_timeout: Duration,
    cache: Mutex<HashMap<i64, CacheEntry>>,
}

impl QueryService {
    pub fn new(store: Store, cfg: &ServerConfig) -> Self {
        Self {
            store,
            default_limit: cfg.default_query_limit,
            max_limit: cfg.max_query_limit,
            ttl: cfg.cache_ttl,
            storage_timeout: cfg.storage_timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the requested limit: default when omitted, clamped to
    /// `[1, max]` otherwise. Reads are low-risk, so out-of-range values are
    /// clamped rather than rejected.
    pub fn clamp_limit(&self, requested: Option<i64>) -> i64 {
        match requested {
            None => self.default_limit,
            Some(n) => n.clamp(1, self.max_limit),
        }
    }

    /// Fetch the most recent `limit` entries, newest first, consulting the
    /// per-limit cache.
    pub async fn recent(
        &self,
        limit: i64,
    ) -> Result<(Arc<Vec<StoredEntry>>, CacheStatus), DbError> {
        if let Some(rows) = self.cached(limit) {
            return Ok((rows, CacheStatus::Hit));
        }

        let store = self.store.clone();
        let rows = tokio::time::timeout(
            self.storage_timeout,
            tokio::task::spawn_blocking(move || store.recent(limit)),
        )
        .await
        .map_err(|_| DbError::Timeout)?
        .map_err(|e| DbError::Unavailable(e.to_string()))??;

        let rows = Arc::new(rows);
        self.cache.lock().unwrap().insert(
            limit,
            CacheEntry {
                fetched_at: Instant::now(),
                rows: rows.clone(),
            },
        );

        Ok((rows, CacheStatus::Miss))
    }

    fn cached(&self, limit: i64) -> Option<Arc<Vec<StoredEntry>>> {
        let cache = self.cache.lock().unwrap();
        cache
            .get(&limit)
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.rows.clone())
    }
}
