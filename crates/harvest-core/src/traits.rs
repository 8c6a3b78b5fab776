use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::context::Context;
use crate::error::AppError;
use crate::models::{CollectionParams, RawRecord};
use crate::rate_limit::RateLimitConfig;

/// An external data provider that can be queried for records.
///
/// Object-safe so heterogeneous providers can share one registry.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique registry key, also used as the record `source`.
    fn name(&self) -> &str;

    fn rate_limit(&self) -> RateLimitConfig;

    /// Checks configuration (credentials in particular) before registration.
    fn validate(&self) -> Result<(), AppError>;

    async fn collect(
        &self,
        ctx: &Context,
        params: &CollectionParams,
    ) -> Result<Vec<RawRecord>, AppError>;
}

/// Persists collected records.
///
/// Writes are upserts keyed by record id, so replaying a job is harmless.
pub trait RecordStore: Send + Sync + Clone + 'static {
    fn store_raw_record(
        &self,
        record: &RawRecord,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Fails with [`AppError::RecordNotFound`] when no record has this id.
    fn get_raw_record(&self, id: &str) -> impl Future<Output = Result<RawRecord, AppError>> + Send;
}

/// Process-local store, used when no database is configured.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, RawRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All stored records for `source`, ordered by id.
    pub fn records_for(&self, source: &str) -> Vec<RawRecord> {
        let mut records: Vec<RawRecord> = self
            .read()
            .values()
            .filter(|r| r.source == source)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, RawRecord>> {
        self.records.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned record store lock");
            poisoned.into_inner()
        })
    }
}

impl RecordStore for MemoryStore {
    async fn store_raw_record(&self, record: &RawRecord) -> Result<(), AppError> {
        let mut records = self.records.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned record store lock");
            poisoned.into_inner()
        });
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_raw_record(&self, id: &str) -> Result<RawRecord, AppError> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::RecordNotFound(id.to_string()))
    }
}
