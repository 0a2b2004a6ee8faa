use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::relay::RelayStats;

/// Hourly, on the hour. Cron expressions carry a leading seconds field.
pub const HEARTBEAT_CRON: &str = "0 0 * * * *";

pub fn heartbeat_line(stats: &RelayStats) -> String {
    format!(
        "Heartbeat: relay alive ({} cycles, {} delivered, {} duplicates, {} failed deliveries)",
        stats.cycles.load(Ordering::Relaxed),
        stats.delivered.load(Ordering::Relaxed),
        stats.duplicates.load(Ordering::Relaxed),
        stats.failed_deliveries.load(Ordering::Relaxed),
    )
}

/// Logs the relay counters on a cron schedule while the relay runs
pub struct Heartbeat {
    scheduler: JobScheduler,
    stats: Arc<RelayStats>,
}

impl Heartbeat {
    pub async fn new(stats: Arc<RelayStats>, cron_expr: &str) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;

        let job_stats = stats.clone();
        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let stats = job_stats.clone();
            Box::pin(async move {
                info!("{}", heartbeat_line(&stats));
            })
        })
        .with_context(|| format!("Invalid heartbeat schedule: {}", cron_expr))?;

        scheduler
            .add(job)
            .await
            .context("Failed to add heartbeat job")?;

        info!("Heartbeat scheduled with cron: {}", cron_expr);
        Ok(Self { scheduler, stats })
    }

    /// Tick until `shutdown` is cancelled, then log the final counters.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        self.scheduler
            .start()
            .await
            .context("Failed to start heartbeat")?;

        shutdown.cancelled().await;

        self.scheduler
            .shutdown()
            .await
            .context("Failed to stop heartbeat")?;
        info!("Final counters: {}", heartbeat_line(&self.stats));
        Ok(())
    }
}
