use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::AppError;
use crate::job::{Job, JobStatus};
use crate::pool::SharedMetrics;

pub(crate) type JobQueue = Arc<Mutex<mpsc::Receiver<Box<dyn Job>>>>;

/// Events emitted by pool workers for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: usize,
    },
    JobStarted {
        worker_id: usize,
        job_id: &'a str,
        attempt: u32,
    },
    JobCompleted {
        worker_id: usize,
        job_id: &'a str,
        duration: Duration,
    },
    JobFailed {
        worker_id: usize,
        job_id: &'a str,
        error: &'a str,
        will_retry: bool,
    },
    /// A retrying job was given up because the pool is shutting down.
    JobAbandoned {
        worker_id: usize,
        job_id: &'a str,
    },
    /// A queued job was never executed because the pool shut down.
    JobDropped {
        job_id: &'a str,
    },
    Stopped {
        worker_id: usize,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::debug!(%worker_id, "Worker started");
            }
            WorkerEvent::JobStarted {
                worker_id,
                job_id,
                attempt,
            } => {
                tracing::info!(%worker_id, %job_id, %attempt, "Processing job");
            }
            WorkerEvent::JobCompleted {
                worker_id,
                job_id,
                duration,
            } => {
                tracing::info!(
                    %worker_id,
                    %job_id,
                    duration_ms = duration.as_millis() as u64,
                    "Job completed"
                );
            }
            WorkerEvent::JobFailed {
                worker_id,
                job_id,
                error,
                will_retry,
            } => {
                tracing::warn!(%worker_id, %job_id, %error, %will_retry, "Job failed");
            }
            WorkerEvent::JobAbandoned { worker_id, job_id } => {
                tracing::warn!(%worker_id, %job_id, "Retry abandoned, worker pool shutting down");
            }
            WorkerEvent::JobDropped { job_id } => {
                tracing::warn!(%job_id, "Queued job dropped at shutdown");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::debug!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// One pool executor draining the shared queue.
pub(crate) struct Worker<R: WorkerReporter> {
    pub(crate) id: usize,
    pub(crate) queue: JobQueue,
    pub(crate) metrics: SharedMetrics,
    pub(crate) cancel: CancellationToken,
    pub(crate) retry_delay: Duration,
    pub(crate) reporter: Arc<R>,
}

impl<R: WorkerReporter> Worker<R> {
    /// Run until the pool is cancelled or the queue is closed and empty.
    pub(crate) async fn run(self) {
        self.reporter.report(WorkerEvent::Started { worker_id: self.id });

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                job = async { self.queue.lock().await.recv().await } => job,
            };

            match next {
                Some(job) => self.process(job).await,
                None => break,
            }
        }

        self.reporter.report(WorkerEvent::Stopped { worker_id: self.id });
    }

    async fn process(&self, job: Box<dyn Job>) {
        let lifecycle = job.lifecycle();

        loop {
            lifecycle.start();
            self.metrics.job_started();
            self.reporter.report(WorkerEvent::JobStarted {
                worker_id: self.id,
                job_id: job.id(),
                attempt: lifecycle.retry_count() + 1,
            });

            // Jobs run under their own context; pool cancellation only stops
            // workers between attempts.
            let ctx = Context::new();
            let started = Instant::now();
            let outcome = AssertUnwindSafe(job.execute(&ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(AppError::Generic(panic_message(panic.as_ref()))));
            let duration = started.elapsed();

            let error = match outcome {
                Ok(()) => {
                    self.metrics.job_finished(duration, true);
                    job.on_success();
                    self.reporter.report(WorkerEvent::JobCompleted {
                        worker_id: self.id,
                        job_id: job.id(),
                        duration,
                    });
                    return;
                }
                Err(e) => e,
            };

            self.metrics.job_finished(duration, false);
            job.on_failure(&error);
            let will_retry = lifecycle.status() == JobStatus::Retrying;
            let message = error.to_string();
            self.reporter.report(WorkerEvent::JobFailed {
                worker_id: self.id,
                job_id: job.id(),
                error: &message,
                will_retry,
            });

            if !will_retry {
                return;
            }
            self.metrics.job_retried();

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    lifecycle.abandon(&format!("worker pool shut down before retry: {message}"));
                    self.reporter.report(WorkerEvent::JobAbandoned {
                        worker_id: self.id,
                        job_id: job.id(),
                    });
                    return;
                }
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("job panicked: {detail}")
}
