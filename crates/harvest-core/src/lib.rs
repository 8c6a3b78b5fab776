pub mod circuit_breaker;
pub mod collection_job;
pub mod config;
pub mod context;
pub mod error;
pub mod id;
pub mod job;
pub mod models;
pub mod pool;
pub mod rate_limit;
pub mod registry;
pub mod service;
pub mod tracker;
pub mod traits;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats, CircuitState,
};
pub use collection_job::{CollectionJob, CollectionRequest};
pub use config::CollectorConfig;
pub use context::{Context, Interrupted};
pub use error::AppError;
pub use id::JobIdGenerator;
pub use job::{Job, JobLifecycle, JobSnapshot, JobStatus, JobType};
pub use models::{CollectionParams, RawRecord};
pub use pool::{PoolMetrics, WorkerPool, WorkerPoolConfig};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use registry::{FanOutResult, ProviderRegistry};
pub use service::{CollectorMetrics, CollectorService};
pub use tracker::{JobMetrics, JobStatusReport, JobTracker};
pub use traits::{MemoryStore, Provider, RecordStore};
pub use worker::{TracingWorkerReporter, WorkerEvent, WorkerReporter};
