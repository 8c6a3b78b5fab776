//! Token-bucket rate limiting for outbound provider requests.
//!
//! The bucket itself is [`governor`]; this module adds per-provider
//! configuration and waits that respect the caller's [`Context`].

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultDirectRateLimiter, Quota};

use crate::context::{Context, Interrupted};
use crate::error::AppError;

// ---------------------------------------------------------------------------
// RateLimitConfig
// ---------------------------------------------------------------------------

/// Sustained rate and burst allowance for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5,
            burst: 10,
        }
    }
}

impl RateLimitConfig {
    pub fn new(requests_per_second: u32, burst: u32) -> Self {
        Self {
            requests_per_second,
            burst,
        }
    }

    fn quota(&self) -> Result<Quota, AppError> {
        let rate = NonZeroU32::new(self.requests_per_second).ok_or_else(|| {
            AppError::ConfigError("requests_per_second must be greater than zero".into())
        })?;
        let burst = NonZeroU32::new(self.burst)
            .ok_or_else(|| AppError::ConfigError("burst must be greater than zero".into()))?;
        Ok(Quota::per_second(rate).allow_burst(burst))
    }
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Shared token bucket. Cloning shares the same bucket.
#[derive(Clone)]
pub struct RateLimiter {
    name: String,
    config: RateLimitConfig,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Result<Self, AppError> {
        let quota = config.quota()?;
        Ok(Self {
            name: name.into(),
            config,
            limiter: Arc::new(governor::RateLimiter::direct(quota)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Waits for a token, giving up when `ctx` is cancelled or its deadline passes.
    ///
    /// A deadline reached while waiting is [`AppError::RateLimitTimeout`];
    /// cancellation stays [`AppError::Cancelled`].
    pub async fn acquire(&self, ctx: &Context) -> Result<(), AppError> {
        match ctx.run(self.limiter.until_ready()).await {
            Ok(()) => Ok(()),
            Err(reason) => {
                tracing::debug!(
                    limiter = %self.name,
                    ?reason,
                    "Rate limit wait interrupted"
                );
                match reason {
                    Interrupted::DeadlineExceeded => {
                        Err(AppError::RateLimitTimeout(self.name.clone()))
                    }
                    Interrupted::Cancelled => Err(reason.into()),
                }
            }
        }
    }

    /// Takes a token only if one is immediately available.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}
