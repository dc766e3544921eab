mod analysis;
mod bootstrap;
mod health;
mod webhook;

use std::time::Duration;

use anyhow::Result;
use stockbot_core::config::{AppConfig, LoadOptions};
use tokio::time::Instant;

fn init_logging(config: &AppConfig) {
    use stockbot_core::config::LogFormat::*;
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
    // Logging comes up before bootstrap so config failures are still reported.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config)?;

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        interactions_path = %app.config.server.interactions_path,
        commands = app.manifest.len(),
        "stockbot-server accepting interactions"
    );

    axum::serve(listener, app.http_router()).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        pending_followups = app.router.in_flight_followups(),
        "stockbot-server stopping"
    );
    drain_followups(&app, Duration::from_secs(app.config.server.graceful_shutdown_secs)).await;

    Ok(())
}

/// Gives detached follow-up tasks a bounded window to finish.
async fn drain_followups(app: &bootstrap::Application, grace: Duration) {
    let deadline = Instant::now() + grace;
    while app.router.in_flight_followups() > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let abandoned = app.router.in_flight_followups();
    if abandoned > 0 {
        tracing::warn!(
            event_name = "system.server.followups_abandoned",
            correlation_id = "shutdown",
            abandoned,
            "shutdown grace period elapsed with follow-ups still pending"
        );
    }
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "could not listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
}
