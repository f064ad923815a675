//! `tacmap-agent` -- headless operational map overlay client.
//!
//! Polls the targets and flights backends into the reconciliation store,
//! reads operator draw events as JSON lines on stdin and submits point
//! annotations. Configuration is read from the environment (see
//! [`AgentConfig::from_env`]). Stops on Ctrl-C.

use tacmap_agent::app;
use tacmap_agent::config::{AgentConfig, LogFormat};

use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(LogFormat::Text);
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };
    init_tracing(config.log_format);

    tracing::info!(
        targets_api = %config.targets_api_url,
        flights_api = %config.flights_api_url,
        max_in_flight = config.max_in_flight,
        "Starting tacmap-agent",
    );

    let agent = app::start(&config, BufReader::new(tokio::io::stdin()))
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to start agent");
            std::process::exit(1);
        });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
    }
    tracing::info!("Shutdown signal received");

    agent.shutdown().await;
    tracing::info!("tacmap-agent stopped");

    // The stdin reader may still be parked on a blocking read.
    std::process::exit(0);
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tacmap_agent=info,tacmap_sync=info".into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
