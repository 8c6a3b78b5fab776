use std::time::Duration;

use thiserror::Error;

/// Application-wide error types for Harvest.
#[derive(Error, Debug)]
pub enum AppError {
    /// A provider's circuit breaker rejected the call without contacting it.
    #[error("circuit breaker is open for {name}, retry after {}s", .retry_after.as_secs())]
    CircuitOpen { name: String, retry_after: Duration },

    /// Waiting for a rate-limit token outlived the caller's deadline or was cancelled.
    #[error("rate limit wait failed for {0}")]
    RateLimitTimeout(String),

    /// Provider is registered without a credential.
    #[error("API key missing for {0}")]
    ApiKeyMissing(String),

    /// Input or provider configuration is invalid.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// HTTP request could not be built or sent.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Provider answered with a non-success status.
    #[error("{source_name} returned HTTP {status}: {message}")]
    HttpStatus {
        source_name: String,
        status: u16,
        message: String,
    },

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The caller's deadline passed before the operation finished.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Provider payload could not be interpreted.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A collected record could not be written to storage.
    #[error("failed to store record {record_id}: {message}")]
    PersistenceError { record_id: String, message: String },

    /// The worker pool queue has no free capacity.
    #[error("job queue is full")]
    QueueFull,

    /// The worker pool no longer accepts jobs.
    #[error("worker pool is shutting down")]
    PoolShuttingDown,

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    #[error("source not found: {0}")]
    SourceNotFound(String),

    #[error("source already registered: {0}")]
    DuplicateSource(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Configuration could not be loaded or is out of range.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Operation is not valid in the component's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if a job failing with this error may be attempted again.
    ///
    /// Cancellation, missing credentials and validation failures are
    /// permanent; everything else is treated as transient.
    ///
    /// `ConfigError` and `SourceNotFound` are also permanent: a bad setting
    /// or an unregistered provider name fails the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AppError::Cancelled
                | AppError::ApiKeyMissing(_)
                | AppError::ValidationError(_)
                | AppError::ConfigError(_)
                | AppError::SourceNotFound(_)
        )
    }

    /// Returns true if this error counts as a provider fault for the circuit breaker.
    pub fn should_trip_circuit(&self) -> bool {
        !matches!(
            self,
            AppError::Cancelled
                | AppError::DeadlineExceeded
                | AppError::ApiKeyMissing(_)
                | AppError::ValidationError(_)
                | AppError::RateLimitTimeout(_)
                | AppError::CircuitOpen { .. }
        )
    }

    /// Returns true if the error was produced while handing a job to the pool.
    pub fn is_submission_error(&self) -> bool {
        matches!(self, AppError::QueueFull | AppError::PoolShuttingDown)
    }
}
