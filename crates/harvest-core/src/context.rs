//! Caller context threaded through every blocking operation.
//!
//! A [`Context`] couples a [`CancellationToken`] with an optional deadline.
//! Rate-limit waits, provider requests and job executions race their work
//! against it, so a caller can bound or abort a collection at any point.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;

/// Why a context-bound operation stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Cancelled,
    DeadlineExceeded,
}

impl From<Interrupted> for AppError {
    fn from(reason: Interrupted) -> Self {
        match reason {
            Interrupted::Cancelled => AppError::Cancelled,
            Interrupted::DeadlineExceeded => AppError::DeadlineExceeded,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Derives a child context that also expires after `timeout`.
    ///
    /// The child keeps the earlier of the two deadlines and is cancelled
    /// whenever the parent is.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(current) if current <= candidate => current,
            _ => candidate,
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> Interrupted {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                () = self.cancel.cancelled() => Interrupted::Cancelled,
                () = tokio::time::sleep_until(deadline) => Interrupted::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                Interrupted::Cancelled
            }
        }
    }

    /// Runs `fut` to completion unless the context finishes first.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            reason = self.done() => Err(reason),
            output = fut => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes_without_deadline() {
        let ctx = Context::new();
        let out = ctx.run(async { 7 }).await;
        assert_eq!(out, Ok(7));
        assert!(!ctx.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_slow_future() {
        let ctx = Context::new().with_timeout(Duration::from_millis(50));
        let out = ctx
            .run(tokio::time::sleep(Duration::from_secs(10)))
            .await;
        assert_eq!(out, Err(Interrupted::DeadlineExceeded));
        assert!(ctx.is_done());
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_child() {
        let parent = Context::new();
        let child = parent.with_timeout(Duration::from_secs(60));
        parent.cancel();
        assert!(child.is_done());
        assert_eq!(child.done().await, Interrupted::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_keeps_earlier_deadline() {
        let parent = Context::new().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(30));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn test_interrupted_maps_to_app_error() {
        assert!(matches!(
            AppError::from(Interrupted::Cancelled),
            AppError::Cancelled
        ));
        assert!(matches!(
            AppError::from(Interrupted::DeadlineExceeded),
            AppError::DeadlineExceeded
        ));
    }
}
