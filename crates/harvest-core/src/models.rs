use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single record collected from a provider, persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Provider-qualified identifier, e.g. `ch_01234567`.
    pub id: String,
    pub source: String,
    pub data: Map<String, Value>,
    pub collected_at: DateTime<Utc>,
}

impl RawRecord {
    pub fn new(id: impl Into<String>, source: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            data,
            collected_at: Utc::now(),
        }
    }
}

/// Query parameters handed to a provider's collection call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionParams {
    pub query: String,
    pub location: Option<String>,
    pub limit: u32,
    pub offset: u32,
    #[serde(default)]
    pub filters: HashMap<String, Value>,
}

impl CollectionParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.filters.insert(key.into(), value);
        self
    }
}
