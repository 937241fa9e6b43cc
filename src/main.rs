//! Tripwire Server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - TRIPWIRE_HOST: Bind address (default: 0.0.0.0)
//! - TRIPWIRE_PORT: Port number (default: 8080)
//! - TRIPWIRE_ALERTS: Path to a JSON array of alert definitions
//! - TRIPWIRE_BACKEND_URL: OpenTSDB-compatible backend (default: http://127.0.0.1:4242)
//! - TRIPWIRE_INTERVAL_SECS: Seconds between passes (default: 60)
//! - TRIPWIRE_CYCLE_TIMEOUT_SECS: Deadline for one pass (default: 60)
//! - TRIPWIRE_MAX_CONCURRENCY: Alerts evaluated at once per layer (default: 16)
//! - TRIPWIRE_CACHE_CAPACITY: Distinct queries cached per pass (default: unbounded)
//! - RUST_LOG: Log level (default: info)

use tripwire::api::{run_server, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tripwire=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();

    tracing::info!("Tripwire configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    tracing::info!("  Backend: {}", config.backend_url);
    match &config.alerts_path {
        Some(path) => tracing::info!("  Alerts: {}", path.display()),
        None => tracing::info!("  Alerts: none"),
    }
    tracing::info!("  Interval: {} seconds", config.interval_secs);
    tracing::info!("  Pass deadline: {:?}", config.engine.cycle_timeout);
    tracing::info!("  Max concurrency: {}", config.engine.max_concurrency);
    match config.engine.cache_capacity {
        Some(n) => tracing::info!("  Query cache: {} entries", n),
        None => tracing::info!("  Query cache: unbounded"),
    }

    run_server(config).await
}
