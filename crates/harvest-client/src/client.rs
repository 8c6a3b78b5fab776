use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use harvest_core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use harvest_core::context::Context;
use harvest_core::error::AppError;
use harvest_core::rate_limit::{RateLimitConfig, RateLimiter};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;

const USER_AGENT: &str = "Harvest/0.1 (data collector)";

/// Settings for one provider's HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub rate_limit: RateLimitConfig,
    pub timeout: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl ClientConfig {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            rate_limit: RateLimitConfig::default(),
            timeout: Duration::from_secs(30),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }
}

/// HTTP client for one provider.
///
/// Every request waits for a rate-limit token, is refused while the
/// provider's circuit is open, and reports its outcome to the breaker.
pub struct ProviderClient {
    http: Client,
    name: String,
    base_url: String,
    api_key: String,
    timeout: Duration,
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
    request_count: AtomicU64,
}

impl ProviderClient {
    pub fn new(config: ClientConfig) -> Result<Self, AppError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;
        let rate_limiter = RateLimiter::new(config.name.clone(), config.rate_limit)?;
        let circuit_breaker = CircuitBreaker::new(config.name.clone(), config.circuit_breaker);

        Ok(Self {
            http,
            name: config.name,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            timeout: config.timeout,
            rate_limiter,
            circuit_breaker,
            request_count: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        self.rate_limiter.config()
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    /// Requests that reached the network, whatever their outcome.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Sends `method base_url+endpoint` through the rate limiter and circuit breaker.
    ///
    /// `headers` are applied after the bearer credential, so a caller can
    /// override `Authorization`. Non-2xx responses are returned as
    /// [`AppError::HttpStatus`] and count as provider failures.
    pub async fn make_request(
        &self,
        ctx: &Context,
        method: Method,
        endpoint: &str,
        headers: &[(&str, &str)],
    ) -> Result<Response, AppError> {
        // 1. Rate limit
        self.rate_limiter.acquire(ctx).await?;

        // 2. Circuit check
        if !self.circuit_breaker.can_execute() {
            let retry_after = self
                .circuit_breaker
                .stats()
                .time_until_half_open
                .unwrap_or_default();
            return Err(AppError::CircuitOpen {
                name: self.name.clone(),
                retry_after,
            });
        }

        // 3. Build request
        let url = format!("{}{}", self.base_url, endpoint);
        let request = self
            .http
            .request(method.clone(), &url)
            .headers(self.build_headers(headers)?)
            .build()
            .map_err(|e| AppError::HttpError(format!("failed to create request: {e}")))?;

        // 4. Send under the breaker
        let response = self
            .circuit_breaker
            .execute(|| async {
                self.request_count.fetch_add(1, Ordering::Relaxed);
                let response = ctx
                    .run(self.http.execute(request))
                    .await?
                    .map_err(|e| self.classify(e))?;

                let status = response.status();
                if !status.is_success() {
                    tracing::warn!(
                        source = %self.name,
                        %method,
                        endpoint,
                        status_code = status.as_u16(),
                        "HTTP request returned error status"
                    );
                    return Err(AppError::HttpStatus {
                        source_name: self.name.clone(),
                        status: status.as_u16(),
                        message: status.canonical_reason().unwrap_or("unknown").to_string(),
                    });
                }
                Ok(response)
            })
            .await?;

        tracing::debug!(
            source = %self.name,
            %method,
            endpoint,
            status_code = response.status().as_u16(),
            "HTTP request successful"
        );
        Ok(response)
    }

    /// GETs `endpoint` and decodes the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        endpoint: &str,
    ) -> Result<T, AppError> {
        let response = self
            .make_request(ctx, Method::GET, endpoint, &[("Accept", "application/json")])
            .await?;

        let body = ctx
            .run(response.bytes())
            .await?
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))?;
        serde_json::from_slice(&body).map_err(|e| {
            AppError::InvalidResponse(format!("{}: failed to parse JSON response: {e}", self.name))
        })
    }

    fn build_headers(&self, extra: &[(&str, &str)]) -> Result<HeaderMap, AppError> {
        let mut headers = HeaderMap::new();
        if !self.api_key.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| AppError::ValidationError(format!("invalid API key: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        for (key, value) in extra {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| AppError::ValidationError(format!("invalid header name {key}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| AppError::ValidationError(format!("invalid header {key}: {e}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn classify(&self, e: reqwest::Error) -> AppError {
        tracing::error!(source = %self.name, error = %e, "HTTP request failed");
        if e.is_timeout() {
            AppError::Timeout(self.timeout)
        } else if e.is_connect() {
            AppError::NetworkError(format!("Connection failed: {e}"))
        } else {
            AppError::HttpError(e.to_string())
        }
    }
}
