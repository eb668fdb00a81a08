//! Docker stats agent
//!
//! Runs on a Docker host, polls every running container's stats over the
//! Docker socket and reports one aggregated host status per cycle.

use anyhow::Result;
use clap::Parser;
use docker_stats_agent::{api, config};
use monitor_core::{
    collector::{resolve_socket_path, DockerRuntime, PollCycleBuilder},
    health::HealthRegistry,
    observability::{AgentMetrics, StructuredLogger},
    reporting::build_driver,
    stats_log::StatsLog,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = config::Cli::parse();
    let config = config::AgentConfig::load(&cli)?;

    let hostname = config.resolved_hostname();
    let socket_path = resolve_socket_path(config.docker_socket.as_deref());
    info!(
        hostname = %hostname,
        socket = %socket_path.display(),
        log_path = %config.log_path.display(),
        delay_secs = config.delay_secs,
        "Agent configured"
    );

    let health_registry = HealthRegistry::for_poll_loop().await;

    let metrics = AgentMetrics::new();
    let logger = StructuredLogger::new(config.resolved_node_name());

    let driver = build_driver(config.reporter_config(&hostname)?);
    logger.log_startup(AGENT_VERSION, driver.name());

    let poll_cycle = PollCycleBuilder::new()
        .runtime(Arc::new(DockerRuntime::connect(
            socket_path,
            config.fetch_timeout(),
        )?))
        .driver(driver)
        .limits(config.limits()?)
        .stats_log(StatsLog::new(&config.log_path))
        .metrics(metrics.clone())
        .health(health_registry.clone())
        .logger(logger.clone())
        .log_container_env(config.log_container_env)
        .interval(config.delay())
        .build()?;

    let (shutdown_tx, _) = broadcast::channel(1);

    let api_handle = config.api_port.map(|port| {
        let state = Arc::new(api::AppState::new(health_registry.clone(), metrics.clone()));
        tokio::spawn(api::serve(port, state, shutdown_tx.subscribe()))
    });

    let poll_handle = tokio::spawn(poll_cycle.run(shutdown_tx.subscribe()));

    let reason = wait_for_signal().await?;
    logger.log_shutdown(reason);
    let _ = shutdown_tx.send(());

    if let Err(e) = poll_handle.await {
        warn!(error = %e, "Poll loop task failed");
    }
    if let Some(handle) = api_handle {
        match handle.await {
            Ok(Err(e)) => warn!(error = %e, "API server failed"),
            Err(e) => warn!(error = %e, "API server task failed"),
            Ok(Ok(())) => {}
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_signal() -> Result<&'static str> {
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            Ok("SIGINT received")
        }
        _ = sigterm.recv() => Ok("SIGTERM received"),
    }
}
