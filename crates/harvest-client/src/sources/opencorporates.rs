use async_trait::async_trait;
use harvest_core::circuit_breaker::CircuitBreakerConfig;
use harvest_core::context::Context;
use harvest_core::error::AppError;
use harvest_core::models::{CollectionParams, RawRecord};
use harvest_core::rate_limit::RateLimitConfig;
use harvest_core::traits::Provider;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::client::{ClientConfig, ProviderClient};

pub const NAME: &str = "opencorporates";
const BASE_URL: &str = "https://api.opencorporates.com/v0.4";
const DEFAULT_PAGE_SIZE: u32 = 30;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: SearchResults,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchResults {
    companies: Vec<CompanyEnvelope>,
}

#[derive(Debug, Deserialize)]
struct CompanyEnvelope {
    company: Company,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Company {
    name: String,
    company_number: String,
    jurisdiction_code: String,
    company_type: Option<String>,
    current_status: Option<String>,
    incorporation_date: Option<String>,
    #[serde(rename = "registered_address_in_full")]
    registered_address: Option<String>,
    inactive_date: Option<String>,
}

impl Company {
    fn into_record(self) -> RawRecord {
        let id = format!("oc_{}_{}", self.jurisdiction_code, self.company_number);
        let data = json!({
            "name": self.name,
            "company_number": self.company_number,
            "jurisdiction_code": self.jurisdiction_code,
            "company_type": self.company_type.unwrap_or_default(),
            "current_status": self.current_status.unwrap_or_default(),
            "incorporation_date": self.incorporation_date.unwrap_or_default(),
            "registered_address": self.registered_address.unwrap_or_default(),
            "inactive_date": self.inactive_date.unwrap_or_default(),
        });
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        RawRecord::new(id, NAME, data)
    }
}

/// Page request derived from an offset/limit window.
///
/// The API pages by number, so an offset that is not a multiple of the
/// page size lands mid-page; `skip` drops the leading items before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageWindow {
    page: u32,
    per_page: u32,
    skip: usize,
}

impl PageWindow {
    fn for_params(params: &CollectionParams) -> Self {
        let per_page = match params.limit {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        Self {
            page: params.offset / per_page + 1,
            per_page,
            skip: (params.offset % per_page) as usize,
        }
    }
}

/// OpenCorporates company search.
pub struct OpenCorporatesSource {
    client: ProviderClient,
}

impl OpenCorporatesSource {
    pub fn new(api_key: impl Into<String>) -> Result<Self, AppError> {
        Self::with_base_url(api_key, BASE_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, AppError> {
        Self::with_config(ClientConfig::new(NAME, base_url, api_key))
    }

    pub fn with_config(config: ClientConfig) -> Result<Self, AppError> {
        let config = config
            .with_rate_limit(RateLimitConfig::new(5, 10))
            .with_circuit_breaker(CircuitBreakerConfig::default().with_failure_threshold(5));
        Ok(Self {
            client: ProviderClient::new(config)?,
        })
    }

    pub fn client(&self) -> &ProviderClient {
        &self.client
    }

    fn search_endpoint(params: &CollectionParams, window: PageWindow) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query
            .append_pair("q", &params.query)
            .append_pair("format", "json")
            .append_pair("per_page", &window.per_page.to_string())
            .append_pair("page", &window.page.to_string());
        if let Some(location) = params.location.as_deref().filter(|l| !l.is_empty()) {
            query.append_pair("jurisdiction_code", location);
        }
        format!("/companies/search?{}", query.finish())
    }
}

#[async_trait]
impl Provider for OpenCorporatesSource {
    fn name(&self) -> &str {
        NAME
    }

    fn rate_limit(&self) -> RateLimitConfig {
        self.client.rate_limit()
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.client.api_key().is_empty() {
            return Err(AppError::ApiKeyMissing(NAME.into()));
        }
        Ok(())
    }

    async fn collect(
        &self,
        ctx: &Context,
        params: &CollectionParams,
    ) -> Result<Vec<RawRecord>, AppError> {
        self.validate()?;

        let window = PageWindow::for_params(params);
        let endpoint = Self::search_endpoint(params, window);
        let response: SearchResponse = self.client.get_json(ctx, &endpoint).await?;

        Ok(response
            .results
            .companies
            .into_iter()
            .skip(window.skip)
            .map(|envelope| envelope.company.into_record())
            .collect())
    }
}
