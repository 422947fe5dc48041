//! # Scribble Server
//!
//! Realtime server for the Scribble drawing and guessing game.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! scribble
//!
//! # Run with a config file in one of the default locations
//! cp scribble.toml ~/.config/scribble/scribble.toml && scribble
//!
//! # Run with environment variables
//! SCRIBBLE_PORT=8080 SCRIBBLE_HOST=0.0.0.0 scribble
//! ```

mod config;
mod handlers;
mod metrics;
mod rooms;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scribble=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Scribble server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
