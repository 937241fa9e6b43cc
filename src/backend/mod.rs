//! Time-series backends
//!
//! The evaluation core only sees the [`QueryBackend`] trait. `HttpBackend`
//! talks to an OpenTSDB-compatible `/api/query` endpoint; `StaticBackend`
//! serves canned responses for replay and tests.

pub mod http;
pub mod static_backend;

use futures::future::BoxFuture;

use crate::expr::QueryRef;
use crate::tags::Series;

pub use http::HttpBackend;
pub use static_backend::StaticBackend;

/// Executes one normalized query against a time-series store
pub trait QueryBackend: Send + Sync {
    fn query<'a>(&'a self, query: &'a QueryRef) -> BoxFuture<'a, Result<Vec<Series>, BackendError>>;
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid query {query}: {reason}")]
    InvalidQuery { query: String, reason: String },

    #[error("No response configured for {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    Other(String),
}
