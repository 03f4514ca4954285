// =============================================================================
// Gap Scanner — Main Entry Point
// =============================================================================
//
// Loads config and the provider API key, builds the orchestrator, starts it,
// and serves the dashboard/control API until Ctrl+C.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod clock;
mod config;
mod dispatcher;
mod error;
mod ingestion;
mod market_data;
mod orchestrator;
mod patterns;
mod scheduler;
mod state;
mod types;
mod watchlist;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::clock::Clock;
use crate::config::ScannerConfig;
use crate::orchestrator::Orchestrator;

const DEFAULT_CONFIG_PATH: &str = "scanner_config.json";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8089";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("gap-scanner starting up");

    let api_key = std::env::var("MARKET_API_KEY").unwrap_or_default();
    if api_key.is_empty() {
        error!("MARKET_API_KEY is not set — the scanner cannot reach the market data provider");
        anyhow::bail!("missing MARKET_API_KEY");
    }

    let config_path = std::env::var("SCANNER_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = ScannerConfig::load(&config_path);

    if std::env::var("USE_EXTENDED_HOURS").map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false) {
        info!("USE_EXTENDED_HOURS set — widening session window to 04:00-20:00 ET");
        config.session.start = "04:00".to_string();
        config.session.end = "20:00".to_string();
    }

    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration, refusing to start");
        anyhow::bail!(e);
    }

    let clock = Clock::live();
    let orchestrator = Orchestrator::new(api_key, config.clone(), clock)?;

    orchestrator.start().await?;
    info!("scanner running");

    let bind_addr = std::env::var("SCANNER_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let router = api::rest::router(orchestrator.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "dashboard API listening");

    let serve_orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %e, "dashboard API server exited");
        }
        let _ = serve_orchestrator; // keeps the orchestrator alive for the life of the server
    });

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    orchestrator.stop().await;

    if let Err(e) = config.save(&config_path) {
        error!(error = %e, "failed to save scanner config on shutdown");
    }

    info!("gap-scanner shut down complete");
    Ok(())
}
