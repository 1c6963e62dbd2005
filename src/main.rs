//! PADDOCK: race-card aggregation and trifecta qualification engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the configured sources and runs the fetch → merge → score cycle
//! on a fixed interval with graceful shutdown.

use anyhow::Result;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use paddock::config;
use paddock::engine::AggregationEngine;
use paddock::sources::SourceRegistry;
use paddock::storage;
use paddock::types::CycleReport;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML. A missing rule set fails here.
    let cfg = config::AppConfig::load_default()?;

    init_logging();

    info!(
        sources = cfg.sources.len(),
        interval_secs = cfg.engine.cycle_interval_secs,
        failure_threshold = cfg.resilience.failure_threshold,
        cache_ttl_secs = cfg.resilience.cache_ttl_secs,
        "PADDOCK starting up"
    );

    // -- Initialise components -------------------------------------------

    let registry = SourceRegistry::with_builtin();
    let sources = registry.build(&cfg.sources);
    let engine = AggregationEngine::from_config(&cfg, sources)?;

    if let Some(path) = cfg.engine.snapshot_path.as_deref() {
        match storage::load_report(Some(path)) {
            Ok(Some(previous)) => info!(cycle = %previous.cycle_id, "Previous snapshot found"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Ignoring unreadable snapshot"),
        }
    }

    // -- Main loop -------------------------------------------------------

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut interval = tokio::time::interval(Duration::from_secs(cfg.engine.cycle_interval_secs.max(1)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!(
        sources = engine.source_count(),
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut ctrl_c => {
                info!("Shutdown signal received.");
                break;
            }
        }

        let cycle = engine.run_cycle_with_shutdown(shutdown_rx.clone());
        tokio::pin!(cycle);

        let report = tokio::select! {
            report = &mut cycle => report,
            _ = &mut ctrl_c => {
                info!("Shutdown signal received, cancelling in-flight sources.");
                let _ = shutdown_tx.send(true);
                let report = cycle.await;
                log_cycle_report(&report);
                save_snapshot(&report, cfg.engine.snapshot_path.as_deref());
                break;
            }
        };

        log_cycle_report(&report);
        save_snapshot(&report, cfg.engine.snapshot_path.as_deref());
    }

    info!("PADDOCK shut down cleanly.");
    Ok(())
}

fn save_snapshot(report: &CycleReport, path: Option<&str>) {
    if path.is_none() {
        return;
    }
    if let Err(e) = storage::save_report(report, path) {
        error!(error = %e, "Failed to save snapshot");
    }
}

/// Log a human-readable cycle summary.
fn log_cycle_report(report: &CycleReport) {
    for status in &report.statuses {
        info!(status = %status, "Source status");
    }
    for health in &report.health {
        debug!(
            health = %health,
            failed = health.failed_requests,
            success_rate = health.success_rate().unwrap_or(0.0),
            "Source health"
        );
    }
    for scored in report.qualified() {
        info!(
            race = %scored.race,
            score = %scored.qualification.total_score,
            "Qualified: {}",
            scored.qualification
        );
    }
    info!(summary = %report, "Cycle report");
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("paddock=info"));

    let json_logging = std::env::var("PADDOCK_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
