//! Fixed-size worker pool over a bounded FIFO job queue.
//!
//! `submit` never blocks: a full queue is reported to the caller rather
//! than applying backpressure. `shutdown` runs once, waits for in-flight
//! jobs up to a timeout, and fails any jobs still queued so none vanish
//! silently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::job::Job;
use crate::worker::{JobQueue, TracingWorkerReporter, Worker, WorkerEvent, WorkerReporter};

const DROPPED_AT_SHUTDOWN: &str = "worker pool shut down before execution";

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent executors.
    pub worker_count: usize,
    /// Capacity of the pending-job queue.
    pub queue_size: usize,
    /// Pause between a failed attempt and its retry.
    pub retry_delay: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_size: 100,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(worker_count: usize, queue_size: usize) -> Self {
        Self {
            worker_count,
            queue_size,
            ..Default::default()
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// Snapshot of pool activity.
///
/// `jobs_processed` counts execution attempts; `jobs_completed` and
/// `jobs_failed` split them by outcome. The average covers successful
/// attempts only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolMetrics {
    pub jobs_submitted: u64,
    pub jobs_processed: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub jobs_dropped: u64,
    pub active_workers: usize,
    pub queue_length: usize,
    pub average_exec_time_ms: f64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Metrics shared between the pool and its workers.
#[derive(Clone, Default)]
pub(crate) struct SharedMetrics(Arc<Mutex<PoolMetrics>>);

impl SharedMetrics {
    fn lock(&self) -> MutexGuard<'_, PoolMetrics> {
        self.0.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned pool metrics mutex");
            poisoned.into_inner()
        })
    }

    fn snapshot(&self) -> PoolMetrics {
        self.lock().clone()
    }

    fn job_submitted(&self) {
        let mut m = self.lock();
        m.jobs_submitted += 1;
        m.last_activity = Some(Utc::now());
    }

    pub(crate) fn job_started(&self) {
        let mut m = self.lock();
        m.active_workers += 1;
        m.last_activity = Some(Utc::now());
    }

    pub(crate) fn job_finished(&self, duration: Duration, succeeded: bool) {
        let mut m = self.lock();
        m.active_workers = m.active_workers.saturating_sub(1);
        m.jobs_processed += 1;
        if succeeded {
            let prev = m.jobs_completed as f64;
            let sample = duration.as_secs_f64() * 1000.0;
            m.average_exec_time_ms = (m.average_exec_time_ms * prev + sample) / (prev + 1.0);
            m.jobs_completed += 1;
        } else {
            m.jobs_failed += 1;
        }
        m.last_activity = Some(Utc::now());
    }

    pub(crate) fn job_retried(&self) {
        self.lock().jobs_retried += 1;
    }

    fn job_dropped(&self) {
        let mut m = self.lock();
        m.jobs_dropped += 1;
        m.last_activity = Some(Utc::now());
    }
}

pub struct WorkerPool<R: WorkerReporter + 'static = TracingWorkerReporter> {
    config: WorkerPoolConfig,
    sender: Mutex<Option<mpsc::Sender<Box<dyn Job>>>>,
    queue: JobQueue,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    shut_down: AtomicBool,
    metrics: SharedMetrics,
    reporter: Arc<R>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Result<Self, AppError> {
        Self::with_reporter(config, TracingWorkerReporter)
    }
}

impl<R: WorkerReporter + 'static> WorkerPool<R> {
    pub fn with_reporter(config: WorkerPoolConfig, reporter: R) -> Result<Self, AppError> {
        if config.queue_size == 0 {
            return Err(AppError::ConfigError(
                "queue_size must be greater than zero".into(),
            ));
        }

        let (tx, rx) = mpsc::channel(config.queue_size);
        Ok(Self {
            config,
            sender: Mutex::new(Some(tx)),
            queue: Arc::new(tokio::sync::Mutex::new(rx)),
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            metrics: SharedMetrics::default(),
            reporter: Arc::new(reporter),
        })
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    fn lock_sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<Box<dyn Job>>>> {
        self.sender.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned pool sender mutex");
            poisoned.into_inner()
        })
    }

    fn lock_handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned pool handles mutex");
            poisoned.into_inner()
        })
    }

    /// Spawns the configured number of workers. Must be called inside a Tokio runtime.
    pub fn start(&self) -> Result<(), AppError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(AppError::PoolShuttingDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AppError::InvalidState("worker pool already started".into()));
        }

        let mut handles = self.lock_handles();
        for id in 0..self.config.worker_count {
            let worker = Worker {
                id,
                queue: Arc::clone(&self.queue),
                metrics: self.metrics.clone(),
                cancel: self.cancel.clone(),
                retry_delay: self.config.retry_delay,
                reporter: Arc::clone(&self.reporter),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        tracing::info!(
            workers = self.config.worker_count,
            queue_size = self.config.queue_size,
            "Worker pool started"
        );
        Ok(())
    }

    pub fn submit<J: Job>(&self, job: J) -> Result<(), AppError> {
        self.submit_boxed(Box::new(job))
    }

    /// Enqueues a job without waiting for capacity.
    pub fn submit_boxed(&self, job: Box<dyn Job>) -> Result<(), AppError> {
        if self.cancel.is_cancelled() {
            return Err(AppError::PoolShuttingDown);
        }

        let sender = self.lock_sender();
        let Some(tx) = sender.as_ref() else {
            return Err(AppError::PoolShuttingDown);
        };

        match tx.try_send(job) {
            Ok(()) => {
                self.metrics.job_submitted();
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                tracing::warn!(job_id = %job.id(), "Job queue is full");
                Err(AppError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(AppError::PoolShuttingDown),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Stops the pool. Only the first call does anything.
    ///
    /// Waits up to `timeout` for in-flight jobs. Workers that do not finish
    /// in time are left running detached.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), AppError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!(timeout_ms = timeout.as_millis() as u64, "Shutting down worker pool");

        drop(self.lock_sender().take());
        self.cancel.cancel();

        let handles = std::mem::take(&mut *self.lock_handles());
        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Worker task terminated abnormally");
                    }
                }
                tracing::info!("All workers stopped");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Worker pool shutdown timed out with jobs still running"
                );
            }
        }

        let dropped = self.drain_queue().await;
        if dropped > 0 {
            tracing::warn!(dropped, "Failed queued jobs left at shutdown");
        }
        Ok(())
    }

    async fn drain_queue(&self) -> usize {
        let mut rx = self.queue.lock().await;
        rx.close();

        let mut dropped = 0;
        while let Ok(job) = rx.try_recv() {
            job.lifecycle().abandon(DROPPED_AT_SHUTDOWN);
            self.metrics.job_dropped();
            self.reporter.report(WorkerEvent::JobDropped { job_id: job.id() });
            dropped += 1;
        }
        dropped
    }

    pub fn metrics(&self) -> PoolMetrics {
        let mut snapshot = self.metrics.snapshot();
        snapshot.queue_length = self
            .lock_sender()
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0);
        snapshot
    }
}
