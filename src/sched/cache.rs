//! Pass-scoped query deduplication
//!
//! Uses moka's future cache, whose `get_with` coalesces concurrent
//! initializations of the same key: while one caller is fetching a query the
//! others wait on it and receive the same result. The outcome is stored
//! whether it succeeded or not, so every lookup of a query within a pass sees
//! the same answer and the backend is asked exactly once.

use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::{BackendError, QueryBackend};
use crate::expr::QueryRef;
use crate::tags::Series;

/// Stored outcome of one backend query
pub type FetchResult = Result<Arc<Vec<Series>>, Arc<BackendError>>;

/// Query cache living for exactly one evaluation pass
pub struct QueryCache {
    cache: Cache<String, FetchResult>,
    /// Lookups, including ones served by an in-flight fetch
    lookups: AtomicU64,
    /// Calls actually issued to the backend
    backend_calls: AtomicU64,
}

impl QueryCache {
    /// Create an unbounded cache; it is dropped with its pass
    pub fn new() -> Self {
        Self::from_cache(Cache::builder().build())
    }

    /// Create a cache holding at most `max_entries` queries. Past that,
    /// evicted queries are fetched again.
    pub fn with_capacity(max_entries: u64) -> Self {
        Self::from_cache(Cache::builder().max_capacity(max_entries).build())
    }

    fn from_cache(cache: Cache<String, FetchResult>) -> Self {
        Self {
            cache,
            lookups: AtomicU64::new(0),
            backend_calls: AtomicU64::new(0),
        }
    }

    /// Return the series for `query`, issuing at most one backend call per
    /// normalized query no matter how many callers ask concurrently
    pub async fn get_or_fetch(
        &self,
        query: &QueryRef,
        backend: &dyn QueryBackend,
    ) -> FetchResult {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        self.cache
            .get_with(query.cache_key(), async {
                self.backend_calls.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(query = %query, "Issuing backend query");
                match backend.query(query).await {
                    Ok(series) => Ok(Arc::new(series)),
                    Err(e) => {
                        tracing::warn!(query = %query, error = %e, "Backend query failed");
                        Err(Arc::new(e))
                    }
                }
            })
            .await
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let lookups = self.lookups.load(Ordering::Relaxed);
        let backend_calls = self.backend_calls.load(Ordering::Relaxed);
        let hits = lookups.saturating_sub(backend_calls);

        CacheStats {
            lookups,
            backend_calls,
            hits,
            hit_rate: if lookups > 0 {
                hits as f64 / lookups as f64
            } else {
                0.0
            },
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics for one pass
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct CacheStats {
    /// Number of lookups
    pub lookups: u64,
    /// Number of backend calls issued
    pub backend_calls: u64,
    /// Lookups answered without a new backend call
    pub hits: u64,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}
