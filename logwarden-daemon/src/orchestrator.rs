//! Daemon assembly and lifecycle management.
//!
//! The [`Orchestrator`] turns a validated [`LogwardenConfig`] into a running
//! aggregator: it opens the event store, loads the geolocation table, wires
//! the report publisher and notifier, and compiles every configured sensor.
//!
//! # Shutdown
//!
//! On `SIGTERM` or `SIGINT` the aggregator is stopped, which cancels all
//! sensors and performs a final flush of buffered events.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use logwarden_core::config::LogwardenConfig;
use logwarden_core::pipeline::{HealthStatus, Pipeline};
use logwarden_log_pipeline::{
    Aggregator, AggregatorBuilder, CsvReportPublisher, LogNotifier, PipelineConfig,
    RelocateSummary, SensorSpec, SqliteEventStore, TableGeoLocator,
};

use crate::metrics_server;

/// Interval between health log lines while the daemon is running.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Health snapshot of the running daemon.
#[derive(Debug, Clone)]
pub struct DaemonHealth {
    /// Aggregator health.
    pub status: HealthStatus,
    /// Daemon uptime in seconds since build.
    pub uptime_secs: u64,
    /// Sensors whose tasks are still alive.
    pub sensors_running: usize,
    /// Sensors enabled in configuration.
    pub sensors_enabled: usize,
}

/// The main daemon orchestrator.
pub struct Orchestrator {
    config: LogwardenConfig,
    aggregator: Aggregator<SqliteEventStore>,
    start_time: Instant,
}

impl Orchestrator {
    /// Load configuration from `config_path` and build the orchestrator.
    ///
    /// Environment overrides are applied before validation.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = LogwardenConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    ///
    /// # Errors
    ///
    /// - Configuration validation fails
    /// - A sensor expression or rule does not compile
    /// - The database or geolocation table cannot be opened
    pub async fn build_from_config(config: LogwardenConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        let specs = SensorSpec::compile_all(&config.sensors)
            .map_err(|e| anyhow::anyhow!("failed to compile sensors: {}", e))?;

        let store = open_store(&config.database.path)?;

        let pipeline_config = PipelineConfig::from_core(&config);
        let mut builder = AggregatorBuilder::new(Arc::new(store))
            .config(pipeline_config)
            .sensors(specs);

        if config.database.geoip_path.is_empty() {
            tracing::warn!("no geolocation table configured, events will carry no country");
        } else {
            let geo = TableGeoLocator::from_file(&config.database.geoip_path)
                .map_err(|e| anyhow::anyhow!("failed to load geolocation table: {}", e))?;
            builder = builder.geo_locator(geo);
        }

        if config.reports.enabled {
            builder = builder.report_publisher(CsvReportPublisher::new(
                &config.reports.output_dir,
                config.reports.base_url.as_str(),
            ));
        }

        if config.notify.enabled {
            builder = builder.notifier(LogNotifier);
        }

        let aggregator = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build aggregator: {}", e))?;

        tracing::info!(
            node_name = %config.general.node_name,
            sensors = config.sensors.len(),
            enabled = config.enabled_sensors().count(),
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            aggregator,
            start_time: Instant::now(),
        })
    }

    /// Start the aggregator and run until `SIGTERM` or `SIGINT`.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(async {
            match wait_for_shutdown_signal().await {
                Ok(signal) => tracing::info!(signal = signal, "shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "signal handling failed, shutting down"),
            }
        })
        .await
    }

    /// Start the aggregator and run until `shutdown` completes.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.aggregator
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start aggregator: {}", e))?;

        tracing::info!("entering main loop");
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(HEALTH_CHECK_INTERVAL);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => {
                    let health = self.health().await;
                    if health.status.is_healthy() {
                        tracing::debug!(
                            uptime_secs = health.uptime_secs,
                            sensors_running = health.sensors_running,
                            "health check"
                        );
                    } else {
                        tracing::warn!(
                            status = %health.status,
                            sensors_running = health.sensors_running,
                            sensors_enabled = health.sensors_enabled,
                            "health check"
                        );
                    }
                }
            }
        }

        self.shutdown().await
    }

    /// Re-run geolocation for every stored event without starting sensors.
    pub async fn relocate(&self) -> Result<RelocateSummary> {
        self.aggregator
            .relocate_all()
            .await
            .map_err(|e| anyhow::anyhow!("relocation failed: {}", e))
    }

    async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("stopping aggregator");
        self.aggregator
            .stop()
            .await
            .map_err(|e| anyhow::anyhow!("failed to stop aggregator: {}", e))
    }

    /// Get the current health snapshot.
    #[allow(clippy::cast_precision_loss)]
    pub async fn health(&self) -> DaemonHealth {
        let status = self.aggregator.health_check().await;
        let uptime_secs = self.start_time.elapsed().as_secs();
        let sensors_running = self.aggregator.running_sensors();

        if self.config.metrics.enabled {
            use logwarden_core::metrics as m;
            metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
            metrics::gauge!(m::DAEMON_SENSORS_RUNNING).set(sensors_running as f64);
        }

        DaemonHealth {
            status,
            uptime_secs,
            sensors_running,
            sensors_enabled: self.config.enabled_sensors().count(),
        }
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &LogwardenConfig {
        &self.config
    }

    /// Get a reference to the aggregator.
    pub fn aggregator(&self) -> &Aggregator<SqliteEventStore> {
        &self.aggregator
    }
}

/// Open the SQLite store, creating its parent directory if needed.
fn open_store(path: &str) -> Result<SqliteEventStore> {
    let path = Path::new(path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            anyhow::anyhow!(
                "failed to create database directory {}: {}",
                parent.display(),
                e
            )
        })?;
    }
    SqliteEventStore::open(path).map_err(|e| anyhow::anyhow!("failed to open database: {}", e))
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}
