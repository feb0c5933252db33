// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metrics Receiver - line-protocol ingestion service
//!
//! Accepts InfluxDB v1 style writes, enriches tags from the inventory
//! service and fans points out to the configured columnar and time-series
//! outputs.
//!
//! # Usage
//!
//! ```bash
//! # Start with ./config.json
//! metrics-receiver
//!
//! # Custom config, port override
//! metrics-receiver --config /etc/metrics-receiver/config.toml --port 8086
//!
//! # Generate / check a configuration file
//! metrics-receiver gen-config --output config.json
//! metrics-receiver validate --config config.json
//! ```
//!
//! # Endpoints
//!
//! - `POST /api/influx/v1/write` - Line protocol write (gzip accepted)
//! - `GET /api/influx/v1/query` - Not supported (403)
//! - `GET /api/health/check` - Health check
//! - `GET /api/enrichment/cacheinfo` - Enrichment cache status
//! - `GET /api/v1/info` - Service info

mod handlers;
mod routes;
mod tasks;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::Router;
use clap::{Parser, Subcommand};
use metrics_receiver::config::{
    ColumnarMeasurement, ColumnarOutput, EnrichmentConfig, EnrichmentSet, MeasurementConfig,
    ReceiverConfig, TimeSeriesOutput, WriteStrategy,
};
use metrics_receiver::enrichment::{EnrichmentCache, EnrichmentRefresher, OmnikeeperClient};
use metrics_receiver::sink::{InfluxClient, SqliteBackend};
use metrics_receiver::Receiver;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Metrics Receiver
#[derive(Parser, Debug)]
#[command(name = "metrics-receiver")]
#[command(about = "Line-protocol metrics receiver with tag enrichment and multi-output routing")]
#[command(version)]
struct Args {
    /// Configuration file path (.json or .toml)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// HTTP server port (overrides the configuration)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (overrides the configuration)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Receiver with the production backends.
pub type AppReceiver = Receiver<SqliteBackend, InfluxClient>;

/// Shared application state
pub struct AppState {
    receiver: AppReceiver,
    enrichment_enabled: bool,
    max_body_bytes: usize,
}

impl AppState {
    fn new(receiver: AppReceiver, enrichment_enabled: bool, max_body_bytes: usize) -> Self {
        Self {
            receiver,
            enrichment_enabled,
            max_body_bytes,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let mut config = ReceiverConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    // Initialize logging
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Metrics Receiver v{}", env!("CARGO_PKG_VERSION"));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cache = Arc::new(EnrichmentCache::new());
    let mut background = Vec::new();

    let enrichment_enabled = config.enrichment.is_enabled();
    if enrichment_enabled {
        let client = OmnikeeperClient::new(&config.enrichment)?;
        let refresher = EnrichmentRefresher::new(client, Arc::clone(&cache), &config.enrichment);
        refresher
            .refresh_once()
            .await
            .context("Initial enrichment refresh failed")?;
        background.push(tokio::spawn(refresher.run(shutdown_rx.clone())));
    } else {
        info!("No enrichment sets configured");
    }

    let receiver = Receiver::from_config(&config, cache).context("Failed to open outputs")?;
    let state = Arc::new(AppState::new(
        receiver,
        enrichment_enabled,
        config.max_body_bytes,
    ));

    let collect_every = Duration::from_secs(config.internal_metrics_collect_interval);
    let flush_every = Duration::from_secs(config.internal_metrics_flush_cycle);
    if !collect_every.is_zero() && !flush_every.is_zero() {
        background.extend(tasks::spawn_internal_metrics(
            Arc::clone(&state),
            collect_every,
            flush_every,
            shutdown_rx.clone(),
        ));
    } else {
        info!("Internal metrics disabled by configuration");
    }

    let app = build_router(Arc::clone(&state));
    let addr = format!("0.0.0.0:{}", config.port);
    info!("HTTP server: http://{}", addr);
    for name in state.receiver.output_names() {
        info!("Output: {}", name);
    }

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("Server error")?;

    for handle in background {
        if let Err(e) = handle.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }
    info!("Shut down");
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    let limit = state.max_body_bytes;
    Router::new()
        .merge(routes::api_routes())
        .layer(DefaultBodyLimit::max(limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolve on Ctrl+C or SIGTERM and tell background tasks to stop.
async fn shutdown_signal(shutdown: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down...");
    let _ = shutdown.send(true);
}

fn example_config() -> ReceiverConfig {
    let mut config = ReceiverConfig {
        port: 8080,
        ..Default::default()
    };

    config.enrichment = EnrichmentConfig {
        sets: vec![EnrichmentSet::new("hosts", "host_trait", "hostname", "host")
            .attributes(["os", "owner"])
            .layers(["1"])
            .case_insensitive(true)],
        retry_count: 3,
        collect_interval: 300,
        server_url: "http://omnikeeper.local".into(),
        ..Default::default()
    };

    config.columnar_outputs.push(
        ColumnarOutput::new("timescaledb[0]", "metrics.db")
            .strategy(WriteStrategy::Commit)
            .include("env", &["prod"])
            .measurement(
                "cpu",
                ColumnarMeasurement::new("cpu_metrics")
                    .fields(["usage_user", "usage_system"])
                    .tags(["host"])
                    .common(MeasurementConfig::default().with_enrichment("hosts")),
            )
            .measurement(
                "metrics_receiver",
                ColumnarMeasurement::new("receiver_metrics"),
            ),
    );

    config.timeseries_outputs.push(
        TimeSeriesOutput::new("influxdb[0]", "http://localhost:8086", "metrics")
            .strategy(WriteStrategy::BestEffort)
            .measurement(
                "cpu",
                MeasurementConfig::default().with_added_tag("source", "metrics-receiver"),
            )
            .measurement("debug", MeasurementConfig::ignored()),
    );

    config
}

fn cmd_gen_config(output: PathBuf) -> Result<()> {
    let config = example_config();
    let content = match output.extension().and_then(|e| e.to_str()) {
        Some("toml") => format!(
            "# Metrics Receiver Configuration\n# Generated by metrics-receiver gen-config\n\n{}",
            toml::to_string_pretty(&config)?
        ),
        _ => serde_json::to_string_pretty(&config)?,
    };

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<()> {
    match ReceiverConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Port: {}", config.port);
            println!("Enrichment sets: {}", config.enrichment.sets.len());
            for set in &config.enrichment.sets {
                println!(
                    "  {} (trait '{}', lookup tag '{}')",
                    set.name, set.trait_id, set.lookup_tag
                );
            }
            println!("Outputs: {}", config.outputs().count());
            for output in config.outputs() {
                println!(
                    "  {} [{:?}] {} measurements",
                    output.name(),
                    output.write_strategy(),
                    output.measurements().len()
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_round_trips() {
        let json = serde_json::to_string_pretty(&example_config()).unwrap();
        let config = ReceiverConfig::from_json_str(&json).unwrap();
        assert_eq!(config.columnar_outputs[0].write_strategy, WriteStrategy::Commit);
        assert_eq!(config.timeseries_outputs[0].name, "influxdb[0]");
        assert!(config.enrichment.is_enabled());
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from(["metrics-receiver", "--port", "9000", "--log-level", "debug"]);
        assert_eq!(args.port, Some(9000));
        assert_eq!(args.config, PathBuf::from("config.json"));
        assert!(args.command.is_none());

        let args = Args::parse_from(["metrics-receiver", "validate", "--config", "x.toml"]);
        assert!(matches!(args.command, Some(Commands::Validate { .. })));
    }
}
