//! # Gatehouse Server
//!
//! Room relay with owner-controlled admission.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! gatehouse
//!
//! # Run with environment variables
//! RELAY_PORT=8080 RELAY_HOST=0.0.0.0 RELAY_ENVIRONMENT=production gatehouse
//! ```

mod config;
mod handlers;
mod ids;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first: it decides the log format
    let config = config::Config::load()?;

    init_tracing(config.is_production());

    tracing::info!(
        environment = %config.environment,
        "Starting Gatehouse server on {}:{}",
        config.host,
        config.port
    );

    // Initialize metrics
    if config.metrics.enabled {
        metrics::init_metrics();
    }

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

fn init_tracing(production: bool) {
    let default_filter = if production {
        "info"
    } else {
        "gatehouse=debug,gatehouse_core=debug,gatehouse_transport=debug,info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    let json = production.then(|| fmt::layer().json());
    let plain = (!production).then(fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .init();
}
