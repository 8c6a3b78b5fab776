//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests. Shared state
//! sits behind `Arc` so tests can keep a handle and assert on it after the
//! mock has been moved into a registry or pool.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::context::Context;
use crate::error::AppError;
use crate::job::{Job, JobLifecycle, JobStatus, JobType};
use crate::models::{CollectionParams, RawRecord};
use crate::rate_limit::RateLimitConfig;
use crate::traits::{Provider, RecordStore};
use crate::worker::{WorkerEvent, WorkerReporter};

/// Builds a record with id `{source}_{key}`.
pub fn make_record(source: &str, key: &str) -> RawRecord {
    let mut data = Map::new();
    data.insert("name".into(), Value::from(format!("{source} company {key}")));
    RawRecord::new(format!("{source}_{key}"), source, data)
}

// ---------------------------------------------------------------------------
// MockProvider
// ---------------------------------------------------------------------------

/// Provider returning scripted responses. Once the script is exhausted
/// it keeps returning the default records, or the configured failure.
pub struct MockProvider {
    name: String,
    api_key: String,
    records: Vec<RawRecord>,
    responses: Mutex<Vec<Result<Vec<RawRecord>, AppError>>>,
    failure: Option<Box<dyn Fn() -> AppError + Send + Sync>>,
    delay: Option<Duration>,
    panics: bool,
    calls: Arc<AtomicU32>,
}

impl MockProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            api_key: "test-key".to_string(),
            records: Vec::new(),
            responses: Mutex::new(Vec::new()),
            failure: None,
            delay: None,
            panics: false,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn with_records(mut self, records: Vec<RawRecord>) -> Self {
        self.records = records;
        self
    }

    /// Fails every call with the error built by `make_error`.
    pub fn with_error<F>(mut self, make_error: F) -> Self
    where
        F: Fn() -> AppError + Send + Sync + 'static,
    {
        self.failure = Some(Box::new(make_error));
        self
    }

    /// Answers the first calls with `responses`, in order.
    pub fn with_responses(self, responses: Vec<Result<Vec<RawRecord>, AppError>>) -> Self {
        *self.responses.lock().unwrap() = responses;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn without_api_key(mut self) -> Self {
        self.api_key.clear();
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    /// Handle to the call counter; stays valid after the provider is registered.
    pub fn calls(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::default()
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.api_key.is_empty() {
            return Err(AppError::ApiKeyMissing(self.name.clone()));
        }
        Ok(())
    }

    async fn collect(
        &self,
        ctx: &Context,
        _params: &CollectionParams,
    ) -> Result<Vec<RawRecord>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("provider {} exploded", self.name);
        }
        if let Some(delay) = self.delay {
            ctx.run(tokio::time::sleep(delay)).await?;
        }
        if let Some(make_error) = &self.failure {
            return Err(make_error());
        }

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(self.records.clone())
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// Store that records writes and can be told to fail or stall them.
#[derive(Clone, Default)]
pub struct MockStore {
    pub saved: Arc<Mutex<Vec<RawRecord>>>,
    store_error: Arc<Mutex<Option<AppError>>>,
    delay: Option<Duration>,
}

impl MockStore {
    /// Store whose next write fails with `error`.
    pub fn with_store_error(error: AppError) -> Self {
        Self {
            store_error: Arc::new(Mutex::new(Some(error))),
            ..Self::default()
        }
    }

    /// Store where every write takes `delay` before succeeding.
    pub fn with_store_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }
}

impl RecordStore for MockStore {
    async fn store_raw_record(&self, record: &RawRecord) -> Result<(), AppError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = self.store_error.lock().unwrap().take() {
            return Err(e);
        }
        self.saved.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn get_raw_record(&self, id: &str) -> Result<RawRecord, AppError> {
        self.saved
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| AppError::RecordNotFound(id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// ScriptedJob
// ---------------------------------------------------------------------------

/// Job whose attempts follow a script; once exhausted, attempts succeed.
pub struct ScriptedJob {
    lifecycle: JobLifecycle,
    outcomes: Mutex<Vec<Result<(), AppError>>>,
    delay: Option<Duration>,
    panics: bool,
    pub attempts: Arc<AtomicU32>,
}

impl ScriptedJob {
    pub fn succeeding(id: &str) -> Self {
        Self::with_outcomes(id, 0, Vec::new())
    }

    /// Fails every attempt with a retryable error.
    pub fn always_failing(id: &str, max_retries: u32) -> Self {
        let outcomes = (0..=max_retries)
            .map(|_| Err(AppError::NetworkError("unreachable".into())))
            .collect();
        Self::with_outcomes(id, max_retries, outcomes)
    }

    pub fn with_outcomes(id: &str, max_retries: u32, outcomes: Vec<Result<(), AppError>>) -> Self {
        Self {
            lifecycle: JobLifecycle::new(id, JobType::Processing, max_retries),
            outcomes: Mutex::new(outcomes),
            delay: None,
            panics: false,
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }
}

#[async_trait]
impl Job for ScriptedJob {
    fn lifecycle(&self) -> &JobLifecycle {
        &self.lifecycle
    }

    async fn execute(&self, _ctx: &Context) -> Result<(), AppError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panics {
            panic!("job {} exploded", self.lifecycle.id());
        }
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            Ok(())
        } else {
            outcomes.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that records event labels for assertions.
#[derive(Clone, Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, label: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == label)
            .count()
    }
}

impl WorkerReporter for MockReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let label = match event {
            WorkerEvent::Started { .. } => "started",
            WorkerEvent::JobStarted { .. } => "job_started",
            WorkerEvent::JobCompleted { .. } => "job_completed",
            WorkerEvent::JobFailed { .. } => "job_failed",
            WorkerEvent::JobAbandoned { .. } => "job_abandoned",
            WorkerEvent::JobDropped { .. } => "job_dropped",
            WorkerEvent::Stopped { .. } => "stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Polls `status` until it reports a terminal state or `timeout` elapses.
pub async fn wait_for_terminal<F>(status: F, timeout: Duration) -> JobStatus
where
    F: Fn() -> JobStatus,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let current = status();
        if current.is_terminal() || tokio::time::Instant::now() >= deadline {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
