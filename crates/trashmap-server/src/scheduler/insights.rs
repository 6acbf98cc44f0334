//! The insight job: summarise every retained detection and append one
//! insight record per run.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use trashmap_core::{empty_insight, fallback_insight, summarize, Insight};
use trashmap_store::{ResultStore, StoreError};
use trashmap_vision::GeminiClient;

#[derive(Debug)]
pub enum RunOutcome {
    Completed(Insight),
    /// Another run held the guard; nothing was written.
    Skipped,
}

/// Runs the insight job, at most one run at a time.
///
/// Shared by the cron job and the on-demand endpoint so both go through the
/// same overlap guard.
pub struct InsightRunner {
    store: Arc<ResultStore>,
    vision: Arc<GeminiClient>,
    running: Mutex<()>,
}

impl InsightRunner {
    #[must_use]
    pub fn new(store: Arc<ResultStore>, vision: Arc<GeminiClient>) -> Self {
        Self {
            store,
            vision,
            running: Mutex::new(()),
        }
    }

    /// Produces and stores one insight, or skips if a run is in progress.
    ///
    /// A failed model call degrades to a fallback insight; only a store
    /// failure is an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insight cannot be persisted.
    pub async fn run_once(&self) -> Result<RunOutcome, StoreError> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::warn!("insights: previous run still in progress; skipping");
            return Ok(RunOutcome::Skipped);
        };

        let generated_at = Utc::now();
        let detections = self.store.all_detections().await;

        let insight = if detections.is_empty() {
            empty_insight(generated_at)
        } else {
            let summary = summarize(&detections);
            match self.vision.generate_insight(&summary).await {
                Ok(draft) => Insight::from_draft(draft, &summary, generated_at),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        detections = summary.detection_count,
                        "insights: model unavailable; using fallback summary"
                    );
                    fallback_insight(&summary, generated_at)
                }
            }
        };

        self.store.insert_insight(insight.clone()).await?;
        Ok(RunOutcome::Completed(insight))
    }

    #[cfg(test)]
    pub(crate) async fn hold_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.running.lock().await
    }
}
