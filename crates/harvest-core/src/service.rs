//! Collector service: the entry point that turns collection requests into
//! tracked background jobs.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::collection_job::{CollectionJob, CollectionRequest};
use crate::config::CollectorConfig;
use crate::error::AppError;
use crate::id::JobIdGenerator;
use crate::job::{Job, JobStatus};
use crate::pool::{PoolMetrics, WorkerPool};
use crate::registry::ProviderRegistry;
use crate::tracker::{JobMetrics, JobStatusReport, JobTracker};
use crate::traits::RecordStore;

/// Pool and job metrics in one report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectorMetrics {
    pub pool: PoolMetrics,
    pub jobs: JobMetrics,
}

pub struct CollectorService<S: RecordStore> {
    registry: Arc<ProviderRegistry>,
    store: S,
    pool: WorkerPool,
    tracker: JobTracker,
    ids: JobIdGenerator,
    config: CollectorConfig,
}

impl<S: RecordStore> CollectorService<S> {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: S,
        config: CollectorConfig,
    ) -> Result<Self, AppError> {
        config.validate()?;
        let pool = WorkerPool::new(config.pool_config())?;
        Ok(Self {
            registry,
            store,
            pool,
            tracker: JobTracker::new(),
            ids: JobIdGenerator::new(),
            config,
        })
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn start(&self) -> Result<(), AppError> {
        tracing::info!(
            workers = self.config.worker_count,
            sources = self.registry.len(),
            "Starting collector service"
        );
        self.pool.start()
    }

    /// Stops accepting work and waits up to `timeout` for running jobs.
    pub async fn stop(&self, timeout: Duration) -> Result<(), AppError> {
        tracing::info!("Stopping collector service");
        self.pool.shutdown(timeout).await
    }

    /// Queues a collection job and returns its id.
    ///
    /// A rejected submission is still recorded in the tracker as failed, so
    /// it shows up in [`get_metrics`](Self::get_metrics).
    pub fn schedule_collection(&self, request: CollectionRequest) -> Result<String, AppError> {
        let id = self.ids.next_id();
        let source = request.source.clone();
        let max_retries = request.max_retries.unwrap_or(self.config.retry_attempts);

        let job = CollectionJob::new(
            id.clone(),
            request,
            max_retries,
            Arc::clone(&self.registry),
            self.store.clone(),
        );
        self.tracker.track_job(job.lifecycle().clone());

        if let Err(e) = self.pool.submit(job) {
            tracing::warn!(job_id = %id, %source, error = %e, "Failed to submit collection job");
            self.tracker.update_job(&id, JobStatus::Failed, Some(&e));
            return Err(e);
        }

        tracing::info!(job_id = %id, %source, max_retries, "Scheduled collection job");
        Ok(id)
    }

    pub fn get_job_status(&self, id: &str) -> Result<JobStatusReport, AppError> {
        self.tracker.get_job_status(id)
    }

    pub fn get_metrics(&self) -> CollectorMetrics {
        CollectorMetrics {
            pool: self.pool.metrics(),
            jobs: self.tracker.get_metrics(),
        }
    }

    /// Forgets finished jobs older than `max_age`. Returns how many were removed.
    pub fn evict_finished_jobs(&self, max_age: Duration) -> usize {
        self.tracker.evict_finished(max_age)
    }
}
