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

pub const NAME: &str = "companies_house";
const BASE_URL: &str = "https://api.company-information.service.gov.uk";
const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<CompanyItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CompanyItem {
    company_number: String,
    company_type: String,
    title: String,
    company_status: String,
    date_of_creation: String,
    date_of_cessation: String,
    address: Address,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Address {
    address_line_1: String,
    address_line_2: String,
    locality: String,
    postal_code: String,
    country: String,
}

impl CompanyItem {
    fn into_record(self) -> RawRecord {
        let data = json!({
            "name": self.title,
            "company_number": self.company_number,
            "company_type": self.company_type,
            "company_status": self.company_status,
            "date_of_creation": self.date_of_creation,
            "date_of_cessation": self.date_of_cessation,
            "address": {
                "address_line_1": self.address.address_line_1,
                "address_line_2": self.address.address_line_2,
                "locality": self.address.locality,
                "postal_code": self.address.postal_code,
                "country": self.address.country,
            },
        });
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        RawRecord::new(format!("ch_{}", self.company_number), NAME, data)
    }
}

/// UK Companies House company search.
pub struct CompaniesHouseSource {
    client: ProviderClient,
}

impl CompaniesHouseSource {
    pub fn new(api_key: impl Into<String>) -> Result<Self, AppError> {
        Self::with_base_url(api_key, BASE_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, AppError> {
        Self::with_config(ClientConfig::new(NAME, base_url, api_key))
    }

    /// Builds the source from a client configuration, applying this
    /// provider's rate limit and breaker threshold.
    pub fn with_config(config: ClientConfig) -> Result<Self, AppError> {
        let config = config
            .with_rate_limit(RateLimitConfig::new(10, 20))
            .with_circuit_breaker(CircuitBreakerConfig::default().with_failure_threshold(5));
        Ok(Self {
            client: ProviderClient::new(config)?,
        })
    }

    pub fn client(&self) -> &ProviderClient {
        &self.client
    }

    fn search_endpoint(params: &CollectionParams) -> String {
        let page_size = match params.limit {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("q", &params.query)
            .append_pair("items_per_page", &page_size.to_string())
            .append_pair("start_index", &params.offset.to_string())
            .finish();
        format!("/search/companies?{query}")
    }
}

#[async_trait]
impl Provider for CompaniesHouseSource {
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

        let endpoint = Self::search_endpoint(params);
        let response: SearchResponse = self.client.get_json(ctx, &endpoint).await?;

        Ok(response
            .items
            .into_iter()
            .map(CompanyItem::into_record)
            .collect())
    }
}
