//! Rollup sequencer binary
//!
//! Hosts the sequencer actor against the HTTP anchor until ctrl-c. It exposes
//! no inbound transfer surface of its own; embedders drive the
//! [`sequencer_core::SequencerHandle`] in process.

use anyhow::Context;
use sequencer_core::{Config, HttpAnchorClient, Sequencer};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if std::env::var_os("SEQUENCER_LOG_JSON").is_some() {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting rollup sequencer");

    // Load configuration
    let config = match std::env::var("SEQUENCER_CONFIG") {
        Ok(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        Err(_) => Config::from_env().context("Failed to load configuration from environment")?,
    };
    if config.anchor.credential.is_none() {
        tracing::warn!("No anchor credential configured; anchor calls are unauthenticated");
    }

    let anchor = Arc::new(HttpAnchorClient::new(&config.anchor)?);
    tracing::info!(
        "Anchoring to {} at {}",
        config.anchor.contract_address,
        config.anchor.endpoint
    );

    let sequencer = Sequencer::start(config, anchor)
        .await
        .context("Failed to start sequencer")?;

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down rollup sequencer");
    let status = sequencer.handle().status().await?;
    if status.pending > 0 {
        tracing::info!("Committing {} pending transactions", status.pending);
    }
    sequencer.shutdown().await?;
    Ok(())
}
