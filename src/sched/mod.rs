//! Dependency-aware alert scheduling
//!
//! One evaluation pass:
//!
//! 1. compile definitions into a [`DependencyGraph`], rejecting cycles and
//!    unresolved `alert()` references before any query runs;
//! 2. walk the graph layer by layer, evaluating every alert of a layer
//!    concurrently through the [`ResultAdapter`] and a shared [`QueryCache`];
//! 3. resolve dependencies and commit severities to the pass's
//!    [`InstanceState`] before the next layer starts.

pub mod adapter;
pub mod cache;
pub mod engine;
pub mod error;
pub mod graph;
pub mod resolver;
pub mod runner;
pub mod state;

pub use adapter::ResultAdapter;
pub use cache::{CacheStats, QueryCache};
pub use engine::{CycleReport, EngineConfig, Scheduler};
pub use error::{AlertError, CycleError, ExprKind};
pub use graph::{CompiledAlert, DependencyGraph, Depends};
pub use resolver::{assign_severities, resolve, GroupStatus, Resolution, ResolvedGroup};
pub use runner::{CycleFailure, Runner};
pub use state::{InstanceKey, InstanceState, StateReader, StateSnapshot};
