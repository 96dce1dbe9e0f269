use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use bridgeway_core::config::{AppConfig, LoadOptions};
use bridgeway_events::tasks::{spawn_pruner, PRUNE_INTERVAL, TASK_RETENTION_SECS};
use bridgeway_server::{bootstrap, load, router};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use bridgeway_core::config::LogFormat::*;

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let _sampler = app
        .load_policy
        .as_ref()
        .map(|policy| load::spawn_sampler(policy.clone(), load::SAMPLE_INTERVAL));
    let _pruner = spawn_pruner(
        app.state.background.registry().clone(),
        PRUNE_INTERVAL,
        chrono::Duration::seconds(TASK_RETENTION_SECS),
    );

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        adaptive_limits = app.load_policy.is_some(),
        "bridgeway-server listening"
    );

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let service = router(app.state.clone()).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, service)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = grace.as_secs(),
        "bridgeway-server stopping"
    );
    let _ = tokio::time::timeout(grace, app.db_pool.close()).await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            error = %error,
            "failed to listen for shutdown signal"
        );
    }
}
