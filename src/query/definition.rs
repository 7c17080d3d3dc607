//! Named query definitions and the response shapes they expect.
//!
//! A [`QueryDefinition`] describes one paginated collection on the backend:
//! the alias it is cached under, the endpoint, the HTTP method, static query
//! parameters, and an optional extractor that turns a raw response body into
//! the records stored in the cache.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A cached record: an open mapping of field name to arbitrary JSON value.
pub type Record = serde_json::Map<String, Value>;

/// Errors raised while building or validating configuration-time objects.
///
/// These are fatal for the operation that triggered them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("query definition requires a non-empty key")]
    MissingKey,

    #[error("query definition {key:?} requires an endpoint")]
    MissingEndpoint { key: String },

    #[error("invalid HTTP method {method:?} for query {key:?}")]
    InvalidMethod { key: String, method: String },

    #[error("\"{0}\" parameter required")]
    MissingParameter(&'static str),

    #[error("chunk size must be at least 1")]
    InvalidChunkSize,
}

/// Turns a raw response body into the sequence of records for one page.
#[derive(Clone)]
pub struct ResponseExtractor(Arc<dyn Fn(&Value) -> Vec<Record> + Send + Sync>);

impl ResponseExtractor {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Vec<Record> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Reads records from the named top-level field of the response.
    ///
    /// Falls back to the body itself when it is an array and the field is absent.
    pub fn field(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(move |response| match response.get(&name) {
            Some(value) => records_of(value),
            None => records_of(response),
        })
    }

    /// Apply the extractor to a raw response.
    pub fn extract(&self, response: &Value) -> Vec<Record> {
        (self.0)(response)
    }
}

impl Default for ResponseExtractor {
    /// Reads `response.data`.
    fn default() -> Self {
        Self::field("data")
    }
}

impl fmt::Debug for ResponseExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseExtractor(..)")
    }
}

/// Collect the object elements of a JSON array; anything else yields no records.
fn records_of(value: &Value) -> Vec<Record> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect(),
        _ => Vec::new(),
    }
}

/// Refetch period of queries that do not configure their own (5 minutes).
pub const DEFAULT_REFETCH_INTERVAL: Duration = Duration::from_millis(300_000);

/// Per-query cache behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Re-run the query this many milliseconds after each completed load.
    /// Unset means [`DEFAULT_REFETCH_INTERVAL`]; `0` disables refetching.
    #[serde(default)]
    pub refetch_interval_ms: Option<u64>,
}

impl CacheOptions {
    /// Options that never refetch.
    pub fn no_refetch() -> Self {
        Self {
            refetch_interval_ms: Some(0),
        }
    }
}

/// Read `total` from a raw page response, accepting numbers and numeric strings.
///
/// Missing or malformed totals count as 0.
pub fn response_total(response: &Value) -> u64 {
    match response.get("total") {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn default_method() -> String {
    "GET".to_string()
}

/// A named query against one backend collection.
///
/// Identity is [`key`](Self::key). Definitions are immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDefinition {
    /// Unique alias, also the cache key.
    pub key: String,

    /// Endpoint path or absolute URL.
    pub endpoint: String,

    /// HTTP method (default GET).
    #[serde(default = "default_method")]
    pub method: String,

    /// Static query-string parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Per-query cache options.
    #[serde(default)]
    pub cache: Option<CacheOptions>,

    /// Per-query response extractor, overriding the engine default.
    #[serde(skip)]
    pub extractor: Option<ResponseExtractor>,
}

impl QueryDefinition {
    pub fn new(
        key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Result<Self, ConfigurationError> {
        let definition = Self {
            key: key.into(),
            endpoint: endpoint.into(),
            method: default_method(),
            params: BTreeMap::new(),
            cache: None,
            extractor: None,
        };
        definition.validate()?;
        Ok(definition)
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_extractor(mut self, extractor: ResponseExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_cache_options(mut self, options: CacheOptions) -> Self {
        self.cache = Some(options);
        self
    }

    /// Check the invariants a definition must hold before it can be registered or fetched.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.key.trim().is_empty() {
            return Err(ConfigurationError::MissingKey);
        }
        if self.endpoint.trim().is_empty() {
            return Err(ConfigurationError::MissingEndpoint {
                key: self.key.clone(),
            });
        }
        let method_ok = !self.method.is_empty()
            && self.method.bytes().all(|b| b.is_ascii_alphabetic());
        if !method_ok {
            return Err(ConfigurationError::InvalidMethod {
                key: self.key.clone(),
                method: self.method.clone(),
            });
        }
        Ok(())
    }

    /// Refetch period, if this query refreshes itself.
    pub fn refetch_interval(&self) -> Option<Duration> {
        let ms = self
            .cache
            .as_ref()
            .and_then(|c| c.refetch_interval_ms)
            .unwrap_or(DEFAULT_REFETCH_INTERVAL.as_millis() as u64);
        (ms > 0).then(|| Duration::from_millis(ms))
    }
}
