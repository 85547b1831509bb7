//! Cron scheduler for the periodic metric jobs.
//!
//! Runs:
//! - Retrieving, aggregating and storing yesterday's metrics
//! - Reloading the full spreadsheet history (optional)
//!
//! A job never overlaps with itself: a tick that finds the previous run of
//! the same job still in progress is skipped.

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::Result;
use log::{error, info, warn};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ScheduleSettings,
    retriever::{Retriever, SourceId},
};

use super::jobs::{self, MetricsPipeline};

/// Run `job` unless another run holding `guard` is still in progress.
///
/// Errors are logged and swallowed; the next tick is the retry. Returns
/// whether the job ran.
pub async fn run_guarded<F>(name: &str, guard: &Mutex<()>, job: F) -> bool
where
    F: Future<Output = Result<()>>,
{
    let Ok(_running) = guard.try_lock() else {
        warn!("Skipping {} tick, previous run still in progress", name);
        return false;
    };

    if let Err(e) = job.await {
        error!("Failed to run {}: {:#}", name, e);
    }
    true
}

/// Cron scheduler that manages the periodic metric jobs.
pub struct CronScheduler {
    pipeline: Arc<MetricsPipeline>,
    settings: ScheduleSettings,
    retrieve_guard: Arc<Mutex<()>>,
    sync_guard: Arc<Mutex<()>>,
}

impl CronScheduler {
    pub fn new(pipeline: Arc<MetricsPipeline>, settings: ScheduleSettings) -> Self {
        Self {
            pipeline,
            settings,
            retrieve_guard: Arc::new(Mutex::new(())),
            sync_guard: Arc::new(Mutex::new(())),
        }
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        let mut job_count = 1;
        self.register_retrieve_metrics_job(&scheduler).await?;
        if self.register_sync_spreadsheet_job(&scheduler).await? {
            job_count += 1;
        }

        scheduler.start().await?;
        info!("Cron scheduler started with {} jobs", job_count);

        if self.settings.run_on_start {
            let pipeline = self.pipeline.clone();
            let guard = self.retrieve_guard.clone();
            let token = cancellation_token.child_token();
            tokio::spawn(async move {
                tokio::select! {
                    _ = run_guarded(
                        "retrieve_metrics",
                        &guard,
                        jobs::retrieve_metrics::run(&pipeline),
                    ) => {},
                    _ = token.cancelled() => {
                        info!("Startup retrieve_metrics run cancelled");
                    },
                }
            });
        }

        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_retrieve_metrics_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let pipeline = self.pipeline.clone();
        let guard = self.retrieve_guard.clone();
        let interval = self.settings.retrieve_interval_secs;

        let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _lock| {
            let pipeline = pipeline.clone();
            let guard = guard.clone();
            Box::pin(async move {
                run_guarded(
                    "retrieve_metrics",
                    &guard,
                    jobs::retrieve_metrics::run(&pipeline),
                )
                .await;
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered retrieve_metrics job (every {}s)", interval);
        Ok(())
    }

    /// Returns false when the job is disabled or no spreadsheet is configured.
    async fn register_sync_spreadsheet_job(&self, scheduler: &JobScheduler) -> Result<bool> {
        let Some(interval) = self.settings.spreadsheet_sync_interval_secs else {
            return Ok(false);
        };
        let Some(retriever) = self.pipeline.retriever(SourceId::Spreadsheet) else {
            warn!("sync_spreadsheet is scheduled but no spreadsheet source is configured");
            return Ok(false);
        };

        let store = self.pipeline.store().clone();
        let guard = self.sync_guard.clone();

        let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _lock| {
            let retriever: Arc<dyn Retriever> = retriever.clone();
            let store = store.clone();
            let guard = guard.clone();
            Box::pin(async move {
                run_guarded("sync_spreadsheet", &guard, async {
                    jobs::sync_spreadsheet::run(retriever.as_ref(), &store)
                        .await
                        .map(|_| ())
                })
                .await;
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered sync_spreadsheet job (every {}s)", interval);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_run_guarded_swallows_errors() {
        let guard = Mutex::new(());
        let ran = run_guarded("failing", &guard, async {
            Err(anyhow::anyhow!("upstream down"))
        })
        .await;
        assert!(ran);
        assert!(guard.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_run_guarded_skips_overlapping_tick() {
        let guard = Mutex::new(());
        let executed = AtomicBool::new(false);
        let _in_progress = guard.lock().await;

        let ran = run_guarded("overlapping", &guard, async {
            executed.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(!ran);
        assert!(!executed.load(Ordering::SeqCst));
    }
}
