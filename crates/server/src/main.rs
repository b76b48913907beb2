mod api;
mod bootstrap;
mod health;
mod sweep;

use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use proposal_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;

fn init_logging(config: &AppConfig) {
    use proposal_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = sweep::spawn(
        app.api.lifecycle.clone(),
        Duration::from_secs(app.config.quotes.expiry_sweep_secs),
        shutdown_rx.clone(),
    );

    let routes = Router::new()
        .merge(api::router(app.api.clone()))
        .merge(health::router(app.db_pool.clone(), app.config.storage.root.clone()));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        public_base_url = %app.config.storage.public_base_url,
        "proposal-server listening"
    );

    let mut server_shutdown = shutdown_rx;
    let server = axum::serve(listener, routes).with_graceful_shutdown(async move {
        while !*server_shutdown.borrow() {
            if server_shutdown.changed().await.is_err() {
                break;
            }
        }
    });
    let server = tokio::spawn(async move { server.await });

    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = app.config.server.graceful_shutdown_secs,
        "proposal-server stopping"
    );
    // Receivers are alive until both tasks exit.
    let _ = shutdown_tx.send(true);

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, server).await {
        Ok(joined) => joined.context("server task panicked")?.context("server terminated with an error")?,
        Err(_) => tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            "in-flight requests did not drain before the grace period ended"
        ),
    }
    if tokio::time::timeout(grace, sweeper).await.is_err() {
        tracing::warn!(
            event_name = "system.server.sweep_timeout",
            correlation_id = "shutdown",
            "expiry sweep did not stop before the grace period ended"
        );
    }

    app.db_pool.close().await;
    tracing::info!(event_name = "system.server.stopped", correlation_id = "shutdown", "proposal-server stopped");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
