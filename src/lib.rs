//! Tripwire: Dependency-Aware Alert Evaluation
//!
//! Evaluates a set of alert definitions against a time-series backend on a
//! fixed interval and assigns every alert instance (an alert name plus a tag
//! set) one of Normal, Warning, Critical, Unevaluated or Unknown per pass.
//!
//! # Features
//!
//! - **Expression Language**: `q(...)` backend queries, reducers, arithmetic
//!   and comparison joined on matching tags
//! - **Tag Matching**: intersection-equality, so coarse groups cover finer ones
//! - **Query Deduplication**: identical normalized queries in a pass hit the
//!   backend once, even when issued concurrently
//! - **Dependencies**: same-alert suppression and cross-alert blocking with
//!   Unevaluated cascading down alert chains
//! - **Layered Concurrency**: alerts run concurrently within a dependency
//!   layer, with a barrier between layers
//! - **Status API**: latest published pass over HTTP
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tripwire::alerts::AlertDefinition;
//! use tripwire::backend::HttpBackend;
//! use tripwire::sched::{EngineConfig, Scheduler};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(HttpBackend::new("http://localhost:4242")?);
//! let scheduler = Scheduler::new(backend, EngineConfig::default()).with_definitions(vec![
//!     AlertDefinition::new("cpu.high").with_crit(r#"avg(q("avg:cpu{host=*}", "5m")) > 90"#),
//!     AlertDefinition::new("web.slow")
//!         .with_crit(r#"avg(q("avg:latency{host=*}", "5m")) > 500"#)
//!         .with_depends(r#"alert("cpu.high", "crit")"#),
//! ]);
//!
//! let report = scheduler.run_cycle().await?;
//! for (instance, severity) in report.snapshot.iter() {
//!     println!("{} {}", instance, severity);
//! }
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod api;
pub mod backend;
pub mod expr;
pub mod sched;
pub mod tags;

// Re-export commonly used types
pub use alerts::{AlertDefinition, Severity};
pub use backend::{BackendError, QueryBackend};
pub use sched::{AlertError, CycleError, CycleReport, EngineConfig, Runner, Scheduler};
pub use tags::{Group, TagSet};
