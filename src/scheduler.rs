//! In-process cron trigger for the auto-pay job
//!
//! Optional: deployments that call `GET /cron/auto-pay` from outside leave
//! `AUTOPAY_CRON` unset.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::autopay::BatchProcessor;

/// Start a scheduler that runs the batch on `cron_expression` (six fields,
/// seconds first). A tick that fires while a run is still going is skipped.
pub async fn start_autopay_scheduler(
    cron_expression: &str,
    processor: Arc<BatchProcessor>,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;
    let running = Arc::new(Mutex::new(()));

    let job = Job::new_async(cron_expression, move |_id, _scheduler| {
        let processor = Arc::clone(&processor);
        let running = Arc::clone(&running);
        Box::pin(async move {
            let Ok(_guard) = running.try_lock() else {
                tracing::warn!("Previous auto-pay run still in progress, skipping tick");
                return;
            };

            match processor.run(Utc::now()).await {
                Ok(summary) => tracing::info!(
                    processed = summary.processed,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "Scheduled auto-pay run complete"
                ),
                Err(e) => tracing::error!("Scheduled auto-pay run failed: {}", e),
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    tracing::info!(cron = %cron_expression, "Auto-pay scheduler started");
    Ok(scheduler)
}
