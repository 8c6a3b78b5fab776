use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::context::{Context, Interrupted};
use crate::error::AppError;
use crate::job::{Job, JobLifecycle, JobType};
use crate::models::CollectionParams;
use crate::registry::ProviderRegistry;
use crate::traits::RecordStore;

/// Request to collect from one provider in the background.
#[derive(Debug, Clone)]
pub struct CollectionRequest {
    pub source: String,
    pub params: CollectionParams,
    /// Falls back to the service's configured retry attempts.
    pub max_retries: Option<u32>,
    /// Per-attempt bound on provider and storage calls.
    pub timeout: Option<Duration>,
}

impl CollectionRequest {
    pub fn new(source: impl Into<String>, params: CollectionParams) -> Self {
        Self {
            source: source.into(),
            params,
            max_retries: None,
            timeout: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Collects from one provider and persists every returned record.
pub struct CollectionJob<S: RecordStore> {
    lifecycle: JobLifecycle,
    request: CollectionRequest,
    registry: Arc<ProviderRegistry>,
    store: S,
}

impl<S: RecordStore> CollectionJob<S> {
    pub fn new(
        id: impl Into<String>,
        request: CollectionRequest,
        max_retries: u32,
        registry: Arc<ProviderRegistry>,
        store: S,
    ) -> Self {
        Self {
            lifecycle: JobLifecycle::new(id, JobType::Collection, max_retries),
            request,
            registry,
            store,
        }
    }

}

#[async_trait]
impl<S: RecordStore> Job for CollectionJob<S> {
    fn lifecycle(&self) -> &JobLifecycle {
        &self.lifecycle
    }

    async fn execute(&self, ctx: &Context) -> Result<(), AppError> {
        let ctx = match self.request.timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.clone(),
        };

        // 1. Collect
        let records = self
            .registry
            .collect_from_source(&ctx, &self.request.source, &self.request.params)
            .await?;

        // 2. Persist. Records are already fetched, so a storage deadline is a
        // persistence failure; only cancellation is passed through.
        for record in &records {
            let stored = match ctx.run(self.store.store_raw_record(record)).await {
                Ok(result) => result,
                Err(Interrupted::Cancelled) => return Err(AppError::Cancelled),
                Err(Interrupted::DeadlineExceeded) => Err(AppError::DeadlineExceeded),
            };
            stored.map_err(|e| AppError::PersistenceError {
                record_id: record.id.clone(),
                message: e.to_string(),
            })?;
        }

        tracing::info!(
            job_id = %self.lifecycle.id(),
            source = %self.request.source,
            records = records.len(),
            "Collection job stored records"
        );
        Ok(())
    }
}
