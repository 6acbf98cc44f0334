//! Background job scheduler.
//!
//! Initialises a [`JobScheduler`] at server startup and registers the
//! recurring insight job.

mod insights;

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

pub use insights::{InsightRunner, RunOutcome};

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive
/// for the lifetime of the process. Dropping it shuts down all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// the cron expression is invalid, or the scheduler fails to start.
pub async fn build_scheduler(
    runner: Arc<InsightRunner>,
    insight_cron: &str,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    register_insight_job(&scheduler, runner, insight_cron).await?;

    scheduler.start().await?;
    Ok(scheduler)
}

/// Register the periodic insight job (every 5 minutes by default,
/// `0 */5 * * * *`).
async fn register_insight_job(
    scheduler: &JobScheduler,
    runner: Arc<InsightRunner>,
    cron: &str,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let runner = Arc::clone(&runner);

        Box::pin(async move {
            tracing::info!("scheduler: starting insight run");
            match runner.run_once().await {
                Ok(RunOutcome::Completed(insight)) => tracing::info!(
                    insight_id = %insight.insight_id,
                    source = ?insight.source,
                    detections = insight.detection_count,
                    "scheduler: insight run complete"
                ),
                Ok(RunOutcome::Skipped) => {}
                Err(e) => tracing::error!(error = %e, "scheduler: insight run failed"),
            }
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron = %cron, "scheduler: registered insight job");
    Ok(())
}
