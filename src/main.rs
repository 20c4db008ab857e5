//! `backpressure-engine` server binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use backpressure_engine::builders::EngineBuilder;
use backpressure_engine::config::AppConfig;
use backpressure_engine::core::AppResult;
use backpressure_engine::observability::{PrometheusMetrics, SharedMetrics};
use backpressure_engine::runtime;
use backpressure_engine::util::{init_tracing, LogFormat};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Backpressure-aware admission and worker-pool engine.
#[derive(Debug, Parser)]
#[command(name = "backpressure-engine", version, about)]
struct Cli {
    /// TOML (or `.json`) configuration file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Listen address; overrides config and `ENGINE_BIND`.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Log format: `pretty` or `json`.
    #[arg(long)]
    log_format: Option<LogFormat>,
}

fn load_config(cli: &Cli) -> AppResult<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::default(),
    };
    config
        .apply_process_env()
        .context("applying environment overrides")?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(format) = cli.log_format {
        config.server.log_format = format;
    }
    config.validate().context("validating configuration")?;
    Ok(config)
}

fn metrics_sink() -> AppResult<SharedMetrics> {
    match PrometheusMetrics::install() {
        Ok(metrics) => Ok(Arc::new(metrics)),
        Err(err) => {
            warn!(error = %err, "Global recorder unavailable, using a private one");
            Ok(Arc::new(
                PrometheusMetrics::new().context("building metrics exporter")?,
            ))
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(config.server.log_format);

    info!(
        bind = %config.server.bind,
        queue_capacity = config.engine.queue_capacity,
        pool_size = config.engine.pool_size,
        demo_mode = config.engine.demo_mode,
        "Configuration loaded"
    );

    let engine = Arc::new(
        EngineBuilder::new(config.engine.clone())
            .with_metrics(metrics_sink()?)
            .build()
            .context("starting engine")?,
    );

    let listener = TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    let report = runtime::run(
        listener,
        engine,
        shutdown_signal(),
        config.server.drain_delay(),
    )
    .await
    .context("HTTP server error")?;
    info!(
        abandoned_queued = report.abandoned_queued,
        abandoned_in_flight = report.abandoned_in_flight,
        "Shutdown complete"
    );
    Ok(())
}
