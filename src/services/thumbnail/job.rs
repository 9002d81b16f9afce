//! Recurring thumbnail job.
//!
//! The job is either Idle or Running, tracked by a single atomic flag. A
//! trigger that finds it Running is dropped, never queued. Runs are spaced
//! with a fixed delay measured from the end of the previous run.
//!
//! The outcome of the last completed run is published through a `watch`
//! channel as one immutable `Arc<JobRun>`, so readers see either the previous
//! run or the new one, never a partially filled list.

use super::{eligibility::is_eligible, generator::ThumbnailGenerator};
use crate::{
    models::{file_metadata::FileMetadata, job_run::JobRun},
    services::{
        listing_cache::ListingCache,
        storage_service::{ObjectStore, StorageError},
    },
};
use chrono::Utc;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub enum RunOutcome {
    /// The run finished and its result is now the published snapshot.
    Completed(Arc<JobRun>),
    /// Another run was in progress; this trigger did nothing.
    Skipped,
    /// The bucket could not be listed; the previous snapshot stays published.
    Failed(StorageError),
}

/// Clears the Running flag when dropped.
pub struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

pub struct ThumbnailJob {
    store: Arc<dyn ObjectStore>,
    generator: ThumbnailGenerator,
    cache: ListingCache,
    bucket: String,
    running: AtomicBool,
    last_run: watch::Sender<Arc<JobRun>>,
}

impl ThumbnailJob {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        generator: ThumbnailGenerator,
        cache: ListingCache,
        bucket: impl Into<String>,
    ) -> Self {
        let (last_run, _) = watch::channel(Arc::new(JobRun::empty()));
        Self {
            store,
            generator,
            cache,
            bucket: bucket.into(),
            running: AtomicBool::new(false),
            last_run,
        }
    }

    /// Enter Running, or `None` when a run is already in progress.
    pub fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                running: &self.running,
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Thumbnails created by the most recently completed run.
    pub fn last_run_results(&self) -> Vec<FileMetadata> {
        self.last_run.borrow().created_thumbnails.clone()
    }

    pub fn last_run(&self) -> Arc<JobRun> {
        self.last_run.borrow().clone()
    }

    /// Scan the bucket once and generate every missing thumbnail.
    ///
    /// Per-object failures are logged and skipped; only a failed listing
    /// aborts the run.
    pub async fn run_once(&self) -> RunOutcome {
        let Some(_guard) = self.try_begin() else {
            info!(bucket = %self.bucket, "Thumbnail job still running, skipping trigger");
            return RunOutcome::Skipped;
        };

        let started_at = Utc::now();
        info!(bucket = %self.bucket, "Starting thumbnail generation job");

        let objects = match self.store.list_objects(&self.bucket, None).await {
            Ok(objects) => objects,
            Err(err) => {
                error!(bucket = %self.bucket, error = %err, "Thumbnail job could not list bucket");
                return RunOutcome::Failed(err);
            }
        };

        let folder = &self.generator.config().folder;
        let mut created = Vec::new();
        for object in &objects {
            if !is_eligible(self.store.as_ref(), folder, object).await {
                continue;
            }
            match self.generator.process(&self.bucket, object).await {
                Ok(Some(thumbnail)) => created.push(thumbnail),
                Ok(None) => {}
                Err(err) => {
                    error!(object = %object.name, error = %err, "Failed processing object");
                }
            }
        }

        // Thumbnails are writes to the bucket too.
        if !created.is_empty() {
            self.cache.invalidate(&self.bucket).await;
        }

        let run = Arc::new(JobRun {
            started_at,
            finished_at: Utc::now(),
            created_thumbnails: created,
        });
        self.last_run.send_replace(run.clone());

        info!(
            bucket = %self.bucket,
            scanned = objects.len(),
            created = run.created_thumbnails.len(),
            elapsed_ms = (run.finished_at - run.started_at).num_milliseconds(),
            "Thumbnail generation job finished"
        );
        RunOutcome::Completed(run)
    }

    /// Run immediately, then again `interval` after each run completes,
    /// until `shutdown` is cancelled. An in-progress run is not interrupted.
    pub async fn run_forever(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        info!(interval_secs = interval.as_secs(), "Starting thumbnail job loop");
        loop {
            match self.run_once().await {
                RunOutcome::Completed(run) => debug!(
                    created = run.created_thumbnails.len(),
                    next_in_secs = interval.as_secs(),
                    "Thumbnail run published"
                ),
                RunOutcome::Skipped => {}
                RunOutcome::Failed(err) => warn!(
                    error = %err,
                    retry_in_secs = interval.as_secs(),
                    "Thumbnail run failed, keeping previous results"
                ),
            }
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Thumbnail job loop shutting down");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
