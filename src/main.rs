//! syncdeck - headless host for the state sync core
//!
//! # Overview
//!
//! This binary wires the library components together against the configured
//! remote store:
//! - Configuration loading ([`ConfigManager`]: defaults, `syncdeck.yaml`, `SYNCDECK__*` env)
//! - Logging infrastructure (file rotation + console output)
//! - State bootstrap ([`StateStore::ensure_ready`])
//! - Debounced persistence ([`SyncWriter`])
//! - Recurring automation ([`AutomationScheduler`] running a shell command)
//!
//! # Execution Flow
//!
//! 1. Load configuration from the directory given as the first argument
//!    (default `.`)
//! 2. Initialize logging
//! 3. Create tokio runtime
//! 4. Bootstrap the store; a degraded bootstrap is logged and the process
//!    keeps running on defaults
//! 5. Start the sync writer, and the scheduler if `scheduler.command` is set
//! 6. Wait for Ctrl-C, then stop the scheduler, flush, and stop the writer

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use syncdeck::scheduler::{CommandTaskRunner, SchedulerOptions};
use syncdeck::{
    APP_NAME, AppConfig, AutomationScheduler, ConfigManager, Metrics, StateStore, StoreOptions,
    SyncWriter, VERSION,
};

const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(300);

fn main() -> Result<()> {
    let config_dir = std::env::args().nth(1).unwrap_or_else(|| ".".to_string());
    let config_manager = ConfigManager::new(&config_dir)?;
    let config = config_manager.load()?;

    // Held until exit to keep the file writer flushing
    let _log_guard = syncdeck::logging::setup_logging(&config.logging)?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("syncdeck-worker")
        .build()
        .context("Failed to build tokio runtime")?;

    let result = runtime.block_on(run(config));

    runtime.shutdown_timeout(Duration::from_secs(5));
    tracing::info!("Shutdown complete");

    result
}

async fn run(config: AppConfig) -> Result<()> {
    let metrics = Arc::new(Metrics::new());
    let remote = syncdeck::remote::from_config(&config.remote).context("Failed to configure remote store")?;

    let store = StateStore::new(remote.clone(), StoreOptions::from_config(&config, metrics.clone()));
    match store.ensure_ready().await {
        Ok(readiness) => {
            let health = store.health();
            tracing::info!(
                %readiness,
                source = ?health.source,
                revision = health.revision,
                "state store settled"
            );
            if let Some(error) = health.last_error {
                tracing::warn!("bootstrap reported: {}", error);
            }
        }
        Err(e) => {
            // Bootstrap keeps going in the background; reads will work once it settles
            tracing::error!("State store not ready: {}", e);
        }
    }

    let writer = SyncWriter::spawn(store.clone(), remote, config.sync.debounce());

    let scheduler = config.scheduler.command.as_ref().map(|command| {
        let runner = Arc::new(CommandTaskRunner::new(
            command.clone(),
            config.scheduler.command_timeout(),
        ));
        let options = SchedulerOptions {
            flush: Some(writer.handle()),
            ..SchedulerOptions::from_config(&config.scheduler)
        };
        let scheduler = AutomationScheduler::new(store.clone(), runner, options);
        scheduler.spawn();
        scheduler
    });
    if scheduler.is_none() {
        tracing::info!("No scheduler.command configured; automation is off");
    }

    let mut metrics_interval = tokio::time::interval(METRICS_LOG_INTERVAL);
    metrics_interval.tick().await;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                tracing::info!("Ctrl-C received, shutting down");
                break;
            }
            _ = metrics_interval.tick() => metrics.log_periodic(),
        }
    }

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }

    match writer.handle().flush_now().await {
        Ok(revision) => tracing::info!(revision, "final snapshot written"),
        Err(e) => tracing::warn!("final flush failed: {}", e),
    }
    writer.shutdown().await;

    metrics.log_summary();
    Ok(())
}
