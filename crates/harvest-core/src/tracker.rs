use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AppError;
use crate::job::{JobLifecycle, JobStatus, JobType};

/// A job as seen from outside the worker pool.
///
/// `status` and `error` record what the scheduler observed (e.g. a rejected
/// submission) and are only authoritative while the job itself is still
/// pending.
#[derive(Debug, Clone)]
struct TrackedJob {
    lifecycle: JobLifecycle,
    status: JobStatus,
    error: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TrackedJob {
    fn effective_status(&self, own: JobStatus) -> JobStatus {
        if own == JobStatus::Pending {
            self.status
        } else {
            own
        }
    }
}

/// Status report for a single job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusReport {
    pub id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Wall-clock time between first start and completion.
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

/// Counts of tracked jobs by status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobMetrics {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub retrying: usize,
    pub last_job_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: RwLock<HashMap<String, TrackedJob>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_jobs(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, TrackedJob>> {
        self.jobs.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned job tracker lock");
            poisoned.into_inner()
        })
    }

    fn write_jobs(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, TrackedJob>> {
        self.jobs.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned job tracker lock");
            poisoned.into_inner()
        })
    }

    pub fn track_job(&self, lifecycle: JobLifecycle) {
        let id = lifecycle.id().to_string();
        self.write_jobs().insert(
            id,
            TrackedJob {
                lifecycle,
                status: JobStatus::Pending,
                error: None,
                updated_at: Utc::now(),
            },
        );
    }

    /// Records an externally observed status. Returns false for unknown ids.
    pub fn update_job(&self, id: &str, status: JobStatus, error: Option<&AppError>) -> bool {
        let mut jobs = self.write_jobs();
        let Some(tracked) = jobs.get_mut(id) else {
            return false;
        };
        tracked.status = status;
        tracked.error = error.map(ToString::to_string);
        tracked.updated_at = Utc::now();
        true
    }

    /// Clones the tracked entries out so lifecycle locks are never taken
    /// while the tracker map is locked.
    fn tracked_jobs(&self) -> Vec<(String, TrackedJob)> {
        self.read_jobs()
            .iter()
            .map(|(id, tracked)| (id.clone(), tracked.clone()))
            .collect()
    }

    pub fn get_job_status(&self, id: &str) -> Result<JobStatusReport, AppError> {
        let tracked = self
            .read_jobs()
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::JobNotFound(id.to_string()))?;

        let snap = tracked.lifecycle.snapshot();
        let duration_ms = match (snap.started_at, snap.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        };
        let status = tracked.effective_status(snap.status);
        let updated_at = [
            Some(tracked.updated_at),
            snap.started_at,
            snap.completed_at,
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(tracked.updated_at);

        Ok(JobStatusReport {
            id: snap.id,
            job_type: snap.job_type,
            status,
            retry_count: snap.retry_count,
            max_retries: snap.max_retries,
            created_at: snap.created_at,
            started_at: snap.started_at,
            completed_at: snap.completed_at,
            updated_at,
            duration_ms,
            error: snap.error.or_else(|| tracked.error.clone()),
        })
    }

    /// Aggregates counts across every tracked job.
    pub fn get_metrics(&self) -> JobMetrics {
        let jobs = self.tracked_jobs();
        let mut metrics = JobMetrics {
            total: jobs.len(),
            ..Default::default()
        };

        for (_, tracked) in &jobs {
            let snap = tracked.lifecycle.snapshot();
            match tracked.effective_status(snap.status) {
                JobStatus::Pending => metrics.pending += 1,
                JobStatus::Processing => metrics.processing += 1,
                JobStatus::Completed => metrics.completed += 1,
                JobStatus::Failed => metrics.failed += 1,
                JobStatus::Retrying => metrics.retrying += 1,
            }
            metrics.last_job_at = metrics.last_job_at.max(Some(snap.created_at));
        }
        metrics
    }

    /// Drops finished jobs whose last update is older than `max_age`.
    pub fn evict_finished(&self, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::TimeDelta::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };
        let expired: Vec<(String, DateTime<Utc>)> = self
            .tracked_jobs()
            .into_iter()
            .filter(|(_, tracked)| {
                let snap = tracked.lifecycle.snapshot();
                let finished_at = snap.completed_at.unwrap_or(tracked.updated_at);
                tracked.effective_status(snap.status).is_terminal() && finished_at <= cutoff
            })
            .map(|(id, tracked)| (id, tracked.updated_at))
            .collect();
        if expired.is_empty() {
            return 0;
        }

        // Entries updated since the scan are kept.
        let mut jobs = self.write_jobs();
        let mut evicted = 0;
        for (id, seen_update) in expired {
            if jobs.get(&id).is_some_and(|t| t.updated_at == seen_update) {
                jobs.remove(&id);
                evicted += 1;
            }
        }
        drop(jobs);

        if evicted > 0 {
            tracing::debug!(evicted, "Evicted finished jobs from tracker");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.read_jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_jobs().is_empty()
    }
}
