//! Named provider registry and concurrent fan-out collection.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::context::Context;
use crate::error::AppError;
use crate::models::{CollectionParams, RawRecord};
use crate::traits::Provider;

/// Outcome of querying every registered provider.
///
/// Each provider appears in exactly one of the two maps.
#[derive(Debug, Default)]
pub struct FanOutResult {
    pub results: HashMap<String, Vec<RawRecord>>,
    pub errors: HashMap<String, AppError>,
}

impl FanOutResult {
    pub fn total_records(&self) -> usize {
        self.results.values().map(Vec::len).sum()
    }
}

#[derive(Default)]
pub struct ProviderRegistry {
    sources: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_sources(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn Provider>>> {
        self.sources.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned provider registry lock");
            poisoned.into_inner()
        })
    }

    pub fn register_source<P>(&self, provider: P) -> Result<(), AppError>
    where
        P: Provider + 'static,
    {
        self.register_arc(Arc::new(provider))
    }

    /// Validates and registers a provider. The registry is left untouched on error.
    pub fn register_arc(&self, provider: Arc<dyn Provider>) -> Result<(), AppError> {
        provider.validate()?;

        let name = provider.name().to_string();
        let mut sources = self.sources.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned provider registry lock");
            poisoned.into_inner()
        });
        if sources.contains_key(&name) {
            return Err(AppError::DuplicateSource(name));
        }
        sources.insert(name.clone(), provider);
        drop(sources);

        tracing::info!(source = %name, "Registered data source");
        Ok(())
    }

    pub fn get_source(&self, name: &str) -> Result<Arc<dyn Provider>, AppError> {
        self.read_sources()
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::SourceNotFound(name.to_string()))
    }

    /// Registered provider names in lexical order.
    pub fn list_sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_sources().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read_sources().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_sources().is_empty()
    }

    pub async fn collect_from_source(
        &self,
        ctx: &Context,
        name: &str,
        params: &CollectionParams,
    ) -> Result<Vec<RawRecord>, AppError> {
        let provider = self.get_source(name)?;
        collect_timed(provider.as_ref(), ctx, params).await
    }

    /// Queries every registered provider concurrently.
    ///
    /// One provider failing (or panicking) never affects the others; the
    /// call returns once every provider has finished.
    pub async fn collect_from_all_sources(
        &self,
        ctx: &Context,
        params: &CollectionParams,
    ) -> FanOutResult {
        let snapshot: Vec<(String, Arc<dyn Provider>)> = self
            .read_sources()
            .iter()
            .map(|(name, provider)| (name.clone(), Arc::clone(provider)))
            .collect();

        let handles: Vec<_> = snapshot
            .into_iter()
            .map(|(name, provider)| {
                let ctx = ctx.clone();
                let params = params.clone();
                let handle = tokio::spawn(async move {
                    collect_timed(provider.as_ref(), &ctx, &params).await
                });
                (name, handle)
            })
            .collect();

        let mut outcome = FanOutResult::default();
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(records)) => {
                    outcome.results.insert(name, records);
                }
                Ok(Err(e)) => {
                    outcome.errors.insert(name, e);
                }
                Err(join_err) => {
                    tracing::error!(source = %name, error = %join_err, "Collection task aborted");
                    outcome.errors.insert(
                        name,
                        AppError::Generic(format!("collection task failed: {join_err}")),
                    );
                }
            }
        }

        tracing::info!(
            succeeded = outcome.results.len(),
            failed = outcome.errors.len(),
            records = outcome.total_records(),
            "Fan-out collection finished"
        );
        outcome
    }
}

async fn collect_timed(
    provider: &dyn Provider,
    ctx: &Context,
    params: &CollectionParams,
) -> Result<Vec<RawRecord>, AppError> {
    let started = Instant::now();
    let result = provider.collect(ctx, params).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match &result {
        Ok(records) => tracing::info!(
            source = %provider.name(),
            records = records.len(),
            elapsed_ms,
            "Collected records"
        ),
        Err(e) => tracing::warn!(
            source = %provider.name(),
            error = %e,
            elapsed_ms,
            "Collection failed"
        ),
    }
    result
}
