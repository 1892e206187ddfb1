//! One monitored backup cycle: snapshot, alerts, health check and dashboard
//!
//! Configuration comes from an optional JSON file given as the first argument,
//! overridden by `RTM_BACKUP_*` environment variables:
//!
//! ```text
//! RTM_BACKUP_DATABASE_PATH=rtm.db RTM_BACKUP_DESTINATIONS=/mnt/a,/mnt/b \
//!     cargo run --example backup_cycle
//! ```

use anyhow::Context;
use rtm_backup::monitor::gather_metrics;
use rtm_backup::{BackupMonitor, BackupOrchestrator, EngineConfig, MonitorConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let base = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_json_file(&PathBuf::from(&path))
            .with_context(|| format!("loading config from {}", path))?,
        None => EngineConfig::default(),
    };
    let config = base.with_overrides(|key| std::env::var(key).ok())?;
    for destination in &config.destinations {
        std::fs::create_dir_all(destination)
            .with_context(|| format!("creating destination {}", destination.display()))?;
    }

    println!("RTM backup cycle");
    println!("  database:     {}", config.database_path.display());
    println!("  destinations: {}", config.destinations.len());
    println!("  retention:    {} days\n", config.retention_days);

    let orchestrator = BackupOrchestrator::new(config)?;
    let monitor = BackupMonitor::new(MonitorConfig::default());

    let report = monitor.run(|| orchestrator.create_backup()).await;
    match &report.run {
        Some(run) => {
            println!(
                "Run {}: {}/{} destinations, integrity validated: {}",
                run.run_id, run.successful_destination_count, run.total_destination_count, run.integrity_validated
            );
            for snapshot in &run.snapshots {
                match &snapshot.error {
                    None => println!("  ok   {} ({} bytes)", snapshot.file_path.display(), snapshot.file_size_bytes),
                    Some(error) => println!("  FAIL {}: {}", snapshot.destination_path.display(), error),
                }
            }
        }
        None => println!("Backup did not run: {}", report.error.as_deref().unwrap_or("unknown error")),
    }

    println!("\nAlerts raised: {}", report.alerts.len());
    for alert in &report.alerts {
        println!("  [{}] {}: {}", alert.level, alert.title, alert.message);
    }

    let health = monitor.health_check(&orchestrator).await;
    println!("\nHealth: {:?}", health.overall);
    for check in &health.checks {
        println!("  {:<14} {:?} {}", check.name, check.status, check.message);
    }

    println!("\nDashboard:\n{}", serde_json::to_string_pretty(&monitor.dashboard())?);

    if std::env::var("RTM_BACKUP_PRINT_METRICS").is_ok() {
        println!("\n{}", gather_metrics().map_err(anyhow::Error::msg)?);
    }

    Ok(())
}
