use std::time::Duration;

use crate::error::AppError;
use crate::pool::WorkerPoolConfig;

/// Configuration for the collector service.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    pub worker_count: usize,
    pub queue_size: usize,
    /// Default retry budget for jobs that do not set their own.
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_size: 100,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl CollectorConfig {
    /// Read configuration from environment variables, falling back to defaults.
    ///
    /// - `HARVEST_WORKER_COUNT`
    /// - `HARVEST_QUEUE_SIZE`
    /// - `HARVEST_RETRY_ATTEMPTS`
    /// - `HARVEST_RETRY_DELAY_MS`
    /// - `HARVEST_SHUTDOWN_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            worker_count: positive(&lookup, "HARVEST_WORKER_COUNT")?
                .unwrap_or(defaults.worker_count as u64) as usize,
            queue_size: positive(&lookup, "HARVEST_QUEUE_SIZE")?
                .unwrap_or(defaults.queue_size as u64) as usize,
            retry_attempts: match lookup("HARVEST_RETRY_ATTEMPTS") {
                None => defaults.retry_attempts,
                Some(raw) => raw.trim().parse().map_err(|_| {
                    AppError::ConfigError(format!(
                        "Invalid HARVEST_RETRY_ATTEMPTS '{raw}': must be a non-negative integer"
                    ))
                })?,
            },
            retry_delay: positive(&lookup, "HARVEST_RETRY_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            shutdown_timeout: positive(&lookup, "HARVEST_SHUTDOWN_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.worker_count == 0 {
            return Err(AppError::ConfigError("worker_count must be at least 1".into()));
        }
        if self.queue_size == 0 {
            return Err(AppError::ConfigError("queue_size must be at least 1".into()));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "shutdown_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.worker_count, self.queue_size).with_retry_delay(self.retry_delay)
    }
}

fn positive<F>(lookup: &F, key: &str) -> Result<Option<u64>, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(AppError::ConfigError(format!("{key} must be at least 1"))),
        Ok(value) => Ok(Some(value)),
        Err(_) => Err(AppError::ConfigError(format!(
            "Invalid {key} '{raw}': must be a positive integer"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = CollectorConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, CollectorConfig::default());
    }

    #[test]
    fn test_overrides_from_env() {
        let config = CollectorConfig::from_lookup(lookup_from(&[
            ("HARVEST_WORKER_COUNT", "8"),
            ("HARVEST_QUEUE_SIZE", "250"),
            ("HARVEST_RETRY_ATTEMPTS", "0"),
            ("HARVEST_RETRY_DELAY_MS", "1500"),
            ("HARVEST_SHUTDOWN_TIMEOUT_SECS", "10"),
        ]))
        .unwrap();

        assert_eq!(config.worker_count, 8);
        assert_eq!(config.queue_size, 250);
        assert_eq!(config.retry_attempts, 0);
        assert_eq!(config.retry_delay, Duration::from_millis(1500));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_zero_worker_count_rejected() {
        let err = CollectorConfig::from_lookup(lookup_from(&[("HARVEST_WORKER_COUNT", "0")]))
            .unwrap_err();
        assert!(matches!(err, AppError::ConfigError(msg) if msg.contains("HARVEST_WORKER_COUNT")));
    }

    #[test]
    fn test_garbage_value_rejected() {
        let err = CollectorConfig::from_lookup(lookup_from(&[("HARVEST_QUEUE_SIZE", "lots")]))
            .unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn test_pool_config_carries_retry_delay() {
        let config = CollectorConfig {
            retry_delay: Duration::from_millis(42),
            ..Default::default()
        };
        let pool = config.pool_config();
        assert_eq!(pool.worker_count, 4);
        assert_eq!(pool.retry_delay, Duration::from_millis(42));
    }
}
