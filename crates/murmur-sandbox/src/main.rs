//! # Murmur Sandbox
//!
//! Runs the presence and typing subsystem against an in-process relay and
//! exposes it over HTTP for poking at by hand.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! murmur
//!
//! # Run with environment overrides
//! MURMUR_PORT=8080 MURMUR_USER=alice murmur
//!
//! # Drive it
//! curl -X POST localhost:8080/presence/lobby/join/bob
//! curl -X POST localhost:8080/typing/lobby/bob/on
//! curl localhost:8080/occupancy
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!(
        "Starting murmur sandbox on {}:{} as {}",
        config.host,
        config.port,
        config.user_id
    );

    handlers::run_server(config).await?;

    Ok(())
}
