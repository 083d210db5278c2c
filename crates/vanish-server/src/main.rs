//! # Vanish Server
//!
//! Ephemeral two-party chat rooms over HTTP polling and WebSockets.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! vanish
//!
//! # Run with a specific config file
//! VANISH_CONFIG=/path/to/vanish.toml vanish
//!
//! # Override single settings
//! VANISH_PORT=8080 VANISH_BROKER__IDLE_TIMEOUT_MS=600000 vanish
//! ```

mod config;
mod handlers;
mod metrics;
mod socket;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vanish=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;
    tracing::debug!("Effective configuration:\n{}", config.to_toml()?);

    tracing::info!("Starting Vanish server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
