use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::AppError;

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Collection,
    Processing,
    Export,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Collection => "collection",
            JobType::Processing => "processing",
            JobType::Export => "export",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "collection" => Ok(JobType::Collection),
            "processing" => Ok(JobType::Processing),
            "export" => Ok(JobType::Export),
            _ => Err(format!("Unknown job type: {}", s)),
        }
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "retrying" => Ok(JobStatus::Retrying),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Point-in-time copy of a job's lifecycle fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error: Option<String>,
}

#[derive(Debug)]
pub(crate) struct LifecycleState {
    status: JobStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    retry_count: u32,
    error: Option<String>,
}

/// Shared lifecycle state embedded in every job.
///
/// Clones observe the same state, which lets the tracker report a job's
/// progress while a worker owns the job itself.
#[derive(Debug, Clone)]
pub struct JobLifecycle {
    id: Arc<str>,
    job_type: JobType,
    max_retries: u32,
    created_at: DateTime<Utc>,
    state: Arc<Mutex<LifecycleState>>,
}

impl JobLifecycle {
    pub fn new(id: impl Into<String>, job_type: JobType, max_retries: u32) -> Self {
        Self {
            id: Arc::from(id.into()),
            job_type,
            max_retries,
            created_at: Utc::now(),
            state: Arc::new(Mutex::new(LifecycleState {
                status: JobStatus::Pending,
                started_at: None,
                completed_at: None,
                retry_count: 0,
                error: None,
            })),
        }
    }

    pub(crate) fn lock_state(&self) -> std::sync::MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(job_id = %self.id, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn status(&self) -> JobStatus {
        self.lock_state().status
    }

    pub fn retry_count(&self) -> u32 {
        self.lock_state().retry_count
    }

    pub fn can_retry(&self) -> bool {
        self.lock_state().retry_count < self.max_retries
    }

    /// Marks the job as processing. The start time is kept from the first attempt.
    pub fn start(&self) {
        let mut state = self.lock_state();
        state.status = JobStatus::Processing;
        if state.started_at.is_none() {
            state.started_at = Some(Utc::now());
        }
    }

    pub fn complete(&self) {
        let mut state = self.lock_state();
        state.status = JobStatus::Completed;
        state.completed_at = Some(Utc::now());
        state.error = None;
    }

    /// Records a failed attempt, either scheduling a retry or failing for good.
    pub fn fail(&self, error: &AppError, retry: bool) {
        let mut state = self.lock_state();
        state.error = Some(error.to_string());
        if retry {
            state.retry_count += 1;
            state.status = JobStatus::Retrying;
        } else {
            state.status = JobStatus::Failed;
            state.completed_at = Some(Utc::now());
        }
    }

    /// Fails the job without counting an attempt, e.g. when it never got to run.
    pub fn abandon(&self, reason: &str) {
        let mut state = self.lock_state();
        state.status = JobStatus::Failed;
        state.completed_at = Some(Utc::now());
        state.error = Some(reason.to_string());
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.lock_state();
        JobSnapshot {
            id: self.id.to_string(),
            job_type: self.job_type,
            status: state.status,
            created_at: self.created_at,
            started_at: state.started_at,
            completed_at: state.completed_at,
            retry_count: state.retry_count,
            max_retries: self.max_retries,
            error: state.error.clone(),
        }
    }
}

/// A unit of asynchronous work executed by the worker pool.
///
/// Implementors embed a [`JobLifecycle`]; the default methods apply the
/// standard retry policy to it.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn lifecycle(&self) -> &JobLifecycle;

    async fn execute(&self, ctx: &Context) -> Result<(), AppError>;

    fn id(&self) -> &str {
        self.lifecycle().id()
    }

    fn job_type(&self) -> JobType {
        self.lifecycle().job_type()
    }

    fn should_retry(&self, error: &AppError) -> bool {
        error.is_retryable() && self.lifecycle().can_retry()
    }

    fn on_success(&self) {
        self.lifecycle().complete();
    }

    fn on_failure(&self, error: &AppError) {
        let retry = self.should_retry(error);
        self.lifecycle().fail(error, retry);
    }
}
