use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::alerts::Severity;
use crate::sched::{CacheStats, CycleError, CycleReport, Runner, StateSnapshot};
use crate::tags::TagSet;

/// Application state shared across handlers
pub struct AppState {
    pub runner: Arc<Runner>,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub alerts: usize,
    pub last_pass: Option<DateTime<Utc>>,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        alerts: state.runner.scheduler().definitions().len(),
        last_pass: state.runner.latest().map(|r| r.finished_at),
    })
}

// ============================================================================
// State
// ============================================================================

#[derive(Serialize)]
pub struct StateResponse {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub counts: BTreeMap<Severity, usize>,
    pub instances: StateSnapshot,
}

impl From<&CycleReport> for StateResponse {
    fn from(report: &CycleReport) -> Self {
        let mut counts = BTreeMap::new();
        for (_, severity) in report.snapshot.iter() {
            *counts.entry(severity).or_insert(0) += 1;
        }

        Self {
            started_at: report.started_at,
            finished_at: report.finished_at,
            duration_ms: report.duration_ms,
            counts,
            instances: report.snapshot.clone(),
        }
    }
}

pub async fn current_state(State(state): State<Arc<AppState>>) -> Result<Json<StateResponse>, ApiError> {
    let report = latest_report(&state)?;
    Ok(Json(StateResponse::from(report.as_ref())))
}

#[derive(Serialize)]
pub struct AlertStateResponse {
    pub alert: String,
    pub instances: Vec<InstanceInfo>,
}

#[derive(Serialize)]
pub struct InstanceInfo {
    pub id: String,
    pub tags: TagSet,
    pub severity: Severity,
}

pub async fn alert_state(
    State(state): State<Arc<AppState>>,
    Path(alert): Path<String>,
) -> Result<Json<AlertStateResponse>, ApiError> {
    if state.runner.scheduler().get(&alert).is_none() {
        return Err(ApiError::NotFound(format!("Alert '{}' not found", alert)));
    }
    let report = latest_report(&state)?;

    let instances = report
        .snapshot
        .for_alert(&alert)
        .map(|(key, severity)| InstanceInfo {
            id: key.to_string(),
            tags: key.tags.clone(),
            severity,
        })
        .collect();

    Ok(Json(AlertStateResponse { alert, instances }))
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Serialize)]
pub struct ErrorsResponse {
    /// Per-alert failures from the latest published pass
    pub alerts: Vec<AlertErrorInfo>,
    /// Most recent pass that failed as a whole, if any
    pub last_failure: Option<FailureInfo>,
}

#[derive(Serialize)]
pub struct AlertErrorInfo {
    pub alert: String,
    pub expression: String,
    pub error: String,
}

#[derive(Serialize)]
pub struct FailureInfo {
    pub at: DateTime<Utc>,
    pub error: String,
}

pub async fn errors(State(state): State<Arc<AppState>>) -> Json<ErrorsResponse> {
    let alerts = state
        .runner
        .latest()
        .map(|report| {
            report
                .errors
                .iter()
                .map(|e| AlertErrorInfo {
                    alert: e.alert().to_string(),
                    expression: e.kind().to_string(),
                    error: e.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let last_failure = state.runner.last_failure().map(|f| FailureInfo {
        at: f.at,
        error: f.error.to_string(),
    });

    Json(ErrorsResponse { alerts, last_failure })
}

// ============================================================================
// Manual Pass
// ============================================================================

#[derive(Serialize)]
pub struct CycleResponse {
    pub duration_ms: u64,
    pub layers: usize,
    pub instances: usize,
    pub firing: usize,
    pub errors: usize,
    pub cache: CacheStats,
}

pub async fn run_cycle(State(state): State<Arc<AppState>>) -> Result<Json<CycleResponse>, ApiError> {
    let report = state.runner.run_once().await?;

    Ok(Json(CycleResponse {
        duration_ms: report.duration_ms,
        layers: report.layers,
        instances: report.snapshot.len(),
        firing: report.snapshot.iter().filter(|(_, s)| s.is_firing()).count(),
        errors: report.errors.len(),
        cache: report.cache.clone(),
    }))
}

fn latest_report(state: &AppState) -> Result<Arc<CycleReport>, ApiError> {
    state
        .runner
        .latest()
        .ok_or_else(|| ApiError::Unavailable("No evaluation pass has completed yet".to_string()))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
    Timeout(String),
    Internal(String),
}

impl From<CycleError> for ApiError {
    fn from(err: CycleError) -> Self {
        match err {
            CycleError::DependencyCycle { .. }
            | CycleError::UnresolvedReference { .. }
            | CycleError::InvalidSeverity { .. }
            | CycleError::DuplicateAlert(_) => ApiError::BadRequest(err.to_string()),
            CycleError::DeadlineExceeded(_) => ApiError::Timeout(err.to_string()),
            CycleError::Cancelled => ApiError::Unavailable(err.to_string()),
            CycleError::Internal(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
