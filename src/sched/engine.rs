//! State engine: one evaluation pass over every alert
//!
//! A pass builds the dependency graph, then walks its layers. Alerts in a
//! layer run concurrently as tokio tasks (bounded by a semaphore); the next
//! layer starts only after every alert in the current one has committed.
//! The pass owns its query cache and instance state, so aborting it (deadline,
//! shutdown) drops both and aborts in-flight backend calls with the tasks.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use super::adapter::ResultAdapter;
use super::cache::{CacheStats, QueryCache};
use super::error::{AlertError, CycleError, ExprKind};
use super::graph::{CompiledAlert, DependencyGraph};
use super::resolver::{assign_severities, resolve};
use super::state::{InstanceState, StateSnapshot};
use crate::alerts::{AlertDefinition, Severity};
use crate::backend::QueryBackend;
use crate::tags::TagSet;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum alerts evaluated at once within a layer
    pub max_concurrency: usize,
    /// Deadline for a whole pass
    pub cycle_timeout: Duration,
    /// Upper bound on distinct queries cached per pass. `None` keeps every
    /// query for the whole pass, so each one reaches the backend once.
    pub cache_capacity: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            cycle_timeout: Duration::from_secs(60),
            cache_capacity: None,
        }
    }
}

/// Result of one completed pass
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub snapshot: StateSnapshot,
    /// Per-alert failures, ordered by alert name
    pub errors: Vec<AlertError>,
    pub cache: CacheStats,
    pub layers: usize,
}

impl CycleReport {
    /// Severity of an instance by canonical identifier, e.g. `a{a=c}`
    pub fn severity(&self, id: &str) -> Option<Severity> {
        self.snapshot.get_str(id)
    }

    /// Identifiers of every instance at `severity`
    pub fn with_severity(&self, severity: Severity) -> Vec<String> {
        self.snapshot.with_severity(severity)
    }
}

/// Everything one pass owns
struct Pass {
    backend: Arc<dyn QueryBackend>,
    cache: QueryCache,
    state: InstanceState,
}

impl Pass {
    fn new(backend: Arc<dyn QueryBackend>, cache_capacity: Option<u64>) -> Self {
        let cache = match cache_capacity {
            Some(max_entries) => QueryCache::with_capacity(max_entries),
            None => QueryCache::new(),
        };
        Self {
            backend,
            cache,
            state: InstanceState::new(),
        }
    }

    /// Evaluate, resolve and commit one alert. Failures mark the alert's
    /// instances Unknown and are returned rather than propagated.
    async fn evaluate_alert(&self, alert: &CompiledAlert) -> Vec<AlertError> {
        if let Some((kind, source)) = &alert.parse_error {
            let error = AlertError::Parse {
                alert: alert.name.clone(),
                kind: *kind,
                source: source.clone(),
            };
            tracing::warn!(alert = %alert.name, error = %error, "Alert marked unknown");
            self.state
                .commit(&alert.name, vec![(TagSet::new(), Severity::Unknown)]);
            return vec![error];
        }

        let adapter = ResultAdapter::new(self.backend.as_ref(), &self.cache, &self.state);
        let (crit, warn, depends) = futures::join!(
            adapter.evaluate(alert, ExprKind::Crit),
            adapter.evaluate(alert, ExprKind::Warn),
            adapter.evaluate(alert, ExprKind::Depends),
        );

        match (crit, warn, depends) {
            (Ok(crit), Ok(warn), Ok(depends)) => {
                let resolution = resolve(
                    crit.unwrap_or_default(),
                    warn.unwrap_or_default(),
                    depends.as_deref(),
                    alert.depends.as_ref(),
                    &self.state,
                );
                let instances = assign_severities(&resolution);

                tracing::debug!(
                    alert = %alert.name,
                    instances = instances.len(),
                    firing = instances.iter().filter(|(_, s)| s.is_firing()).count(),
                    "Alert evaluated"
                );
                self.state.commit(&alert.name, instances);
                Vec::new()
            }
            (crit, warn, depends) => {
                let mut known = BTreeSet::new();
                let mut errors = Vec::new();
                for result in [crit, warn] {
                    match result {
                        Ok(groups) => known.extend(groups.into_iter().flatten().map(|g| g.tags)),
                        Err(e) => errors.push(e),
                    }
                }
                if let Err(e) = depends {
                    errors.push(e);
                }
                if known.is_empty() {
                    known.insert(TagSet::new());
                }

                for error in &errors {
                    tracing::warn!(alert = %alert.name, error = %error, "Alert marked unknown");
                }
                self.state.commit(
                    &alert.name,
                    known.into_iter().map(|tags| (tags, Severity::Unknown)).collect(),
                );
                errors
            }
        }
    }
}

/// Alert scheduler: owns the definitions and runs passes one at a time
pub struct Scheduler {
    definitions: DashMap<String, AlertDefinition>,
    backend: Arc<dyn QueryBackend>,
    config: EngineConfig,
    /// Held for the duration of a pass; passes never overlap
    pass_lock: Mutex<()>,
}

impl Scheduler {
    pub fn new(backend: Arc<dyn QueryBackend>, config: EngineConfig) -> Self {
        Self {
            definitions: DashMap::new(),
            backend,
            config,
            pass_lock: Mutex::new(()),
        }
    }

    /// Builder-style bulk registration
    pub fn with_definitions(self, definitions: impl IntoIterator<Item = AlertDefinition>) -> Self {
        for def in definitions {
            self.register(def);
        }
        self
    }

    /// Register or replace an alert
    pub fn register(&self, definition: AlertDefinition) -> Option<AlertDefinition> {
        self.definitions.insert(definition.name.clone(), definition)
    }

    /// Unregister an alert
    pub fn unregister(&self, name: &str) -> Option<AlertDefinition> {
        self.definitions.remove(name).map(|(_, def)| def)
    }

    /// Get an alert by name
    pub fn get(&self, name: &str) -> Option<AlertDefinition> {
        self.definitions.get(name).map(|d| d.clone())
    }

    /// All definitions, ordered by name
    pub fn definitions(&self) -> Vec<AlertDefinition> {
        let mut defs: Vec<AlertDefinition> = self.definitions.iter().map(|e| e.value().clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one full pass
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        self.run_cycle_until(std::future::pending::<()>()).await
    }

    /// Run one full pass, abandoning it if `shutdown` completes first.
    ///
    /// Fatal configuration errors are returned before any backend query is
    /// issued. An abandoned or timed-out pass returns an error and its
    /// partial state is dropped.
    pub async fn run_cycle_until<F>(&self, shutdown: F) -> Result<CycleReport, CycleError>
    where
        F: Future<Output = ()>,
    {
        let _pass_guard = self.pass_lock.lock().await;
        let started_at = Utc::now();
        let clock = Instant::now();

        let graph = DependencyGraph::build(&self.definitions()).map_err(|e| {
            tracing::error!(error = %e, "Alert configuration rejected");
            e
        })?;
        let pass = Arc::new(Pass::new(Arc::clone(&self.backend), self.config.cache_capacity));

        let evaluation = evaluate_layers(&graph, Arc::clone(&pass), self.config.max_concurrency);
        let mut errors = tokio::select! {
            result = tokio::time::timeout(self.config.cycle_timeout, evaluation) => match result {
                Ok(result) => result?,
                Err(_) => {
                    tracing::warn!(timeout = ?self.config.cycle_timeout, "Pass exceeded deadline, discarding");
                    return Err(CycleError::DeadlineExceeded(self.config.cycle_timeout));
                }
            },
            _ = shutdown => {
                tracing::info!("Pass cancelled, discarding");
                return Err(CycleError::Cancelled);
            }
        };
        errors.sort_by(|a, b| a.alert().cmp(b.alert()));

        let report = CycleReport {
            started_at,
            finished_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            snapshot: pass.state.snapshot(),
            errors,
            cache: pass.cache.stats(),
            layers: graph.layers().len(),
        };

        tracing::info!(
            alerts = graph.len(),
            instances = report.snapshot.len(),
            errors = report.errors.len(),
            backend_calls = report.cache.backend_calls,
            duration_ms = report.duration_ms,
            "Pass complete"
        );
        Ok(report)
    }
}

/// Walk the layers in order with a barrier between them
async fn evaluate_layers(
    graph: &DependencyGraph,
    pass: Arc<Pass>,
    max_concurrency: usize,
) -> Result<Vec<AlertError>, CycleError> {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut errors = Vec::new();

    for (depth, layer) in graph.layers().iter().enumerate() {
        let mut tasks = JoinSet::new();
        for name in layer {
            let alert = match graph.get(name) {
                Some(alert) => Arc::clone(alert),
                None => continue,
            };
            let pass = Arc::clone(&pass);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| CycleError::Internal(e.to_string()))?;
                Ok::<_, CycleError>(pass.evaluate_alert(&alert).await)
            });
        }

        // Dropping the JoinSet on an early return aborts the remaining tasks
        while let Some(joined) = tasks.join_next().await {
            let alert_errors =
                joined.map_err(|e| CycleError::Internal(format!("alert task failed: {}", e)))??;
            errors.extend(alert_errors);
        }
        tracing::debug!(layer = depth, alerts = layer.len(), "Layer committed");
    }

    Ok(errors)
}
