use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{alert_state, current_state, errors, health_check, run_cycle, AppState};
use crate::alerts::load_definitions;
use crate::backend::HttpBackend;
use crate::sched::{EngineConfig, Runner, Scheduler};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// JSON file with the alert definitions
    pub alerts_path: Option<PathBuf>,
    /// Base URL of the OpenTSDB-compatible backend
    pub backend_url: String,
    pub interval_secs: u64,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            alerts_path: None,
            backend_url: "http://127.0.0.1:4242".to_string(),
            interval_secs: 60,
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read `TRIPWIRE_*` variables, falling back to defaults for anything
    /// unset or unparseable
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            host: lookup("TRIPWIRE_HOST").unwrap_or(defaults.host),
            port: lookup("TRIPWIRE_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            alerts_path: lookup("TRIPWIRE_ALERTS").map(PathBuf::from),
            backend_url: lookup("TRIPWIRE_BACKEND_URL").unwrap_or(defaults.backend_url),
            interval_secs: parsed("TRIPWIRE_INTERVAL_SECS")
                .filter(|s| *s > 0)
                .unwrap_or(defaults.interval_secs),
            engine: EngineConfig {
                max_concurrency: parsed("TRIPWIRE_MAX_CONCURRENCY")
                    .filter(|n| *n > 0)
                    .map(|n| n as usize)
                    .unwrap_or(defaults.engine.max_concurrency),
                cycle_timeout: parsed("TRIPWIRE_CYCLE_TIMEOUT_SECS")
                    .filter(|s| *s > 0)
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.engine.cycle_timeout),
                cache_capacity: parsed("TRIPWIRE_CACHE_CAPACITY")
                    .filter(|n| *n > 0)
                    .or(defaults.engine.cache_capacity),
            },
        }
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Published state
        .route("/api/state", get(current_state))
        .route("/api/state/:alert", get(alert_state))
        .route("/api/errors", get(errors))
        // Manual trigger
        .route("/api/cycle", post(run_cycle))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let definitions = match &config.alerts_path {
        Some(path) => load_definitions(path)?,
        None => {
            tracing::warn!("TRIPWIRE_ALERTS not set, starting with no alerts");
            Vec::new()
        }
    };

    let backend = Arc::new(HttpBackend::new(config.backend_url.clone())?);
    let scheduler = Scheduler::new(backend, config.engine.clone()).with_definitions(definitions);
    let runner = Arc::new(Runner::new(Arc::new(scheduler)));
    let runner_handle = Arc::clone(&runner).start(Duration::from_secs(config.interval_secs));

    let state = Arc::new(AppState {
        runner: Arc::clone(&runner),
    });
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting tripwire server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&runner)))
        .await?;

    if let Err(e) = runner_handle.await {
        tracing::warn!(error = %e, "Alert runner did not stop cleanly");
    }

    tracing::info!("tripwire server stopped");
    Ok(())
}

async fn shutdown_signal(runner: Arc<Runner>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for CTRL+C");
    }

    tracing::info!("Shutdown signal received, stopping alert runner...");
    runner.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertDefinition;
    use crate::backend::StaticBackend;
    use crate::expr::QueryRef;
    use crate::tags::Series;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    fn create_test_app() -> (Router, Arc<Runner>) {
        let query = QueryRef::new("avg:disk{host=*}", "5m", "").unwrap();
        let backend = Arc::new(StaticBackend::new().with_response(
            &query,
            vec![
                Series::new("disk", "{host=db01}".parse().unwrap()).with_point(0, 97.0),
                Series::new("disk", "{host=db02}".parse().unwrap()).with_point(0, 40.0),
            ],
        ));
        let scheduler = Scheduler::new(backend, EngineConfig::default()).with_definitions(vec![
            AlertDefinition::new("disk.full")
                .with_crit(r#"avg(q("avg:disk{host=*}", "5m")) > 95"#)
                .with_warn(r#"avg(q("avg:disk{host=*}", "5m")) > 85"#),
        ]);
        let runner = Arc::new(Runner::new(Arc::new(scheduler)));
        let state = Arc::new(AppState {
            runner: Arc::clone(&runner),
        });
        (build_router(state), runner)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _) = create_test_app();

        let response = app.oneshot(get_request("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["alerts"], 1);
        assert!(body["last_pass"].is_null());
    }

    #[tokio::test]
    async fn test_state_unavailable_before_first_pass() {
        let (app, _) = create_test_app();

        let response = app.oneshot(get_request("/api/state")).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_trigger_then_read_state() {
        let (app, _) = create_test_app();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/cycle")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["instances"], 2);
        assert_eq!(body["firing"], 1);
        assert_eq!(body["cache"]["backend_calls"], 1);

        let response = app.clone().oneshot(get_request("/api/state")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["instances"]["disk.full{host=db01}"], "critical");
        assert_eq!(body["instances"]["disk.full{host=db02}"], "normal");
        assert_eq!(body["counts"]["critical"], 1);

        let response = app.oneshot(get_request("/api/state/disk.full")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["instances"][0]["id"], "disk.full{host=db01}");
        assert_eq!(body["instances"][0]["tags"]["host"], "db01");
    }

    #[tokio::test]
    async fn test_alert_not_found() {
        let (app, runner) = create_test_app();
        runner.run_once().await.unwrap();

        let response = app.oneshot(get_request("/api/state/nonexistent")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rejected_configuration() {
        let (app, runner) = create_test_app();
        runner.scheduler().register(
            AlertDefinition::new("loop")
                .with_crit("1")
                .with_depends(r#"alert("loop", "crit")"#),
        );

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/cycle")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.oneshot(get_request("/api/errors")).await.unwrap();
        let body = body_json(response).await;
        assert!(body["last_failure"]["error"]
            .as_str()
            .unwrap()
            .contains("loop -> loop"));
    }

    #[test]
    fn test_config_from_lookup() {
        let config = ServerConfig::from_lookup(|key| match key {
            "TRIPWIRE_PORT" => Some("9090".to_string()),
            "TRIPWIRE_ALERTS" => Some("/etc/tripwire/alerts.json".to_string()),
            "TRIPWIRE_MAX_CONCURRENCY" => Some("4".to_string()),
            "TRIPWIRE_CYCLE_TIMEOUT_SECS" => Some("0".to_string()),
            "TRIPWIRE_INTERVAL_SECS" => Some("abc".to_string()),
            "TRIPWIRE_CACHE_CAPACITY" => Some("50000".to_string()),
            _ => None,
        });

        assert_eq!(config.port, 9090);
        assert_eq!(config.alerts_path, Some(PathBuf::from("/etc/tripwire/alerts.json")));
        assert_eq!(config.engine.max_concurrency, 4);
        assert_eq!(config.engine.cycle_timeout, Duration::from_secs(60));
        assert_eq!(config.interval_secs, 60);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.engine.cache_capacity, Some(50_000));

        let config = ServerConfig::from_lookup(|key| match key {
            "TRIPWIRE_CACHE_CAPACITY" => Some("0".to_string()),
            _ => None,
        });
        assert_eq!(config.engine.cache_capacity, None);
    }
}
