use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{BackendError, QueryBackend};
use crate::expr::QueryRef;
use crate::tags::Series;

/// Backend serving canned responses keyed by normalized `q(...)` text.
///
/// Keys are normalized on insert, so `q("avg:a{host=*,cpu=*}", "5m", "")`
/// and its sorted form address the same response.
#[derive(Default)]
pub struct StaticBackend {
    responses: RwLock<HashMap<String, Result<Vec<Series>, String>>>,
    calls: RwLock<HashMap<String, u64>>,
    total_calls: AtomicU64,
    latency: Option<Duration>,
}

impl StaticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response, so concurrent callers overlap in flight
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Register a response for a query
    pub fn respond(&self, query: &QueryRef, series: Vec<Series>) {
        self.responses.write().insert(query.cache_key(), Ok(series));
    }

    /// Register a failure for a query
    pub fn fail(&self, query: &QueryRef, message: impl Into<String>) {
        self.responses
            .write()
            .insert(query.cache_key(), Err(message.into()));
    }

    /// Builder-style [`respond`](Self::respond)
    pub fn with_response(self, query: &QueryRef, series: Vec<Series>) -> Self {
        self.respond(query, series);
        self
    }

    /// Number of backend calls issued for a query
    pub fn calls_for(&self, query: &QueryRef) -> u64 {
        self.calls
            .read()
            .get(&query.cache_key())
            .copied()
            .unwrap_or(0)
    }

    /// Total backend calls across all queries
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    async fn lookup(&self, query: &QueryRef) -> Result<Vec<Series>, BackendError> {
        let key = query.cache_key();
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        *self.calls.write().entry(key.clone()).or_insert(0) += 1;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match self.responses.read().get(&key) {
            Some(Ok(series)) => Ok(series.clone()),
            Some(Err(message)) => Err(BackendError::Other(message.clone())),
            None => Err(BackendError::NotFound(key)),
        }
    }
}

impl QueryBackend for StaticBackend {
    fn query<'a>(&'a self, query: &'a QueryRef) -> BoxFuture<'a, Result<Vec<Series>, BackendError>> {
        self.lookup(query).boxed()
    }
}
