use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::BackendError;
use crate::expr::{EvalError, ParseError};

/// Which of an alert's expressions an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprKind {
    Crit,
    Warn,
    Depends,
}

impl fmt::Display for ExprKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExprKind::Crit => "crit",
            ExprKind::Warn => "warn",
            ExprKind::Depends => "depends",
        })
    }
}

/// Failure isolated to a single alert; its instances become Unknown and the
/// pass continues
#[derive(Debug, Clone, thiserror::Error)]
pub enum AlertError {
    #[error("alert {alert}: {kind} query {query} failed: {source}")]
    Backend {
        alert: String,
        kind: ExprKind,
        query: String,
        #[source]
        source: Arc<BackendError>,
    },

    #[error("alert {alert}: {kind} expression could not be parsed: {source}")]
    Parse {
        alert: String,
        kind: ExprKind,
        #[source]
        source: ParseError,
    },

    #[error("alert {alert}: {kind} expression failed: {source}")]
    Expression {
        alert: String,
        kind: ExprKind,
        #[source]
        source: EvalError,
    },
}

impl AlertError {
    pub fn alert(&self) -> &str {
        match self {
            AlertError::Backend { alert, .. }
            | AlertError::Parse { alert, .. }
            | AlertError::Expression { alert, .. } => alert,
        }
    }

    pub fn kind(&self) -> ExprKind {
        match self {
            AlertError::Backend { kind, .. }
            | AlertError::Parse { kind, .. }
            | AlertError::Expression { kind, .. } => *kind,
        }
    }
}

/// Fatal pass errors; nothing from the pass is published
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CycleError {
    #[error("Dependency cycle: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("Alert {alert} references unknown alert {reference}")]
    UnresolvedReference { alert: String, reference: String },

    #[error("Alert {alert} references {reference} with unknown severity '{severity}'")]
    InvalidSeverity {
        alert: String,
        reference: String,
        severity: String,
    },

    #[error("Duplicate alert name: {0}")]
    DuplicateAlert(String),

    #[error("Pass exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("Pass cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}
