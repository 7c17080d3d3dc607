//! Runtime configuration for slice-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Every section falls back to its defaults when omitted. Options that are
//! functions (the global response extractor, a slices factory) are supplied
//! on the [`SliceCache`](crate::engine::SliceCache) builder instead.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::fetch::paginated::{FetchSettings, DEFAULT_PAGE_INTERVAL};
use crate::fetch::pagination::effective_per_page;
use crate::prefetch::route::SliceMap;
use crate::query::definition::{ConfigurationError, QueryDefinition, ResponseExtractor};
use crate::schedule::slice::{SchedulerSettings, DEFAULT_SLICE_CHUNK_SIZE};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "slice-cache", about = "Background slice cache for paginated REST collections")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Backend base URL (overrides the config file).
    #[arg(long)]
    pub base_url: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Inspection server settings.
    pub server: ServerConfig,

    /// Backend connection settings.
    pub backend: BackendConfig,

    /// Log every cache state transition.
    pub debug: bool,

    /// Queries per slice chunk and pages per page chunk.
    pub chunk_size: usize,

    /// Milliseconds between staggered chunk starts.
    pub query_interval_ms: Option<u64>,

    /// Pagination settings.
    pub pagination: PaginationConfig,

    /// Route prefetching.
    pub router: RouterConfig,

    /// Query definitions registered at startup.
    pub requests: Vec<QueryDefinition>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            backend: BackendConfig::default(),
            debug: false,
            chunk_size: DEFAULT_SLICE_CHUNK_SIZE,
            query_interval_ms: None,
            pagination: PaginationConfig::default(),
            router: RouterConfig::default(),
            requests: Vec::new(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Backend API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL that relative endpoints are joined onto.
    pub base_url: Option<String>,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: 30,
        }
    }
}

/// Pagination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Requested page size, clamped to 100..=1000 (100 when unset).
    pub per_page: Option<u64>,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            per_page: Some(500),
        }
    }
}

/// Route prefetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Start the route prefetcher together with the cache.
    pub autoload: bool,

    /// Quiet period before a navigation is acted on.
    pub debounce_ms: u64,

    /// Path prefix -> slice entries.
    pub slices: SliceMap,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            autoload: false,
            debounce_ms: 500,
            slices: SliceMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.chunk_size == 0 {
            return Err(ConfigurationError::InvalidChunkSize);
        }
        for request in &self.requests {
            request.validate()?;
        }
        Ok(())
    }

    pub fn query_interval(&self) -> Option<Duration> {
        self.query_interval_ms.map(Duration::from_millis)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.router.debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs)
    }

    /// Fetcher settings derived from this configuration.
    pub fn fetch_settings(&self, extractor: ResponseExtractor) -> FetchSettings {
        FetchSettings {
            per_page: effective_per_page(self.pagination.per_page),
            chunk_size: self.chunk_size.max(1),
            query_interval: self.query_interval().unwrap_or(DEFAULT_PAGE_INTERVAL),
            extractor,
        }
    }

    /// Scheduler settings derived from this configuration.
    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            chunk_size: self.chunk_size,
            query_interval: self.query_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.chunk_size, 5);
        assert_eq!(cfg.pagination.per_page, Some(500));
        assert!(!cfg.router.autoload);
        assert_eq!(cfg.debounce(), Duration::from_millis(500));
    }

    #[test]
    fn test_derived_settings() {
        let cfg = Config::default();
        let fetch = cfg.fetch_settings(ResponseExtractor::default());
        assert_eq!(fetch.per_page, 500);
        assert_eq!(fetch.query_interval, Duration::from_millis(300_000));

        let scheduler = cfg.scheduler_settings();
        assert_eq!(scheduler.chunk_spacing(), Duration::from_millis(2500));
    }

    #[test]
    fn test_null_per_page_means_unspecified() {
        let cfg: Config = serde_json::from_str(r#"{"pagination": {"per_page": null}}"#).unwrap();
        let fetch = cfg.fetch_settings(ResponseExtractor::default());
        assert_eq!(fetch.per_page, 100);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "chunk_size": 20,
                "query_interval_ms": 1000,
                "requests": [{{"key": "users", "endpoint": "/api/users"}}],
                "router": {{"autoload": true, "slices": {{"admin": ["users"]}}}}
            }}"#
        )
        .unwrap();

        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.chunk_size, 20);
        assert_eq!(cfg.scheduler_settings().effective_chunk_size(), 15);
        assert_eq!(cfg.requests.len(), 1);
        assert!(cfg.router.autoload);
        assert_eq!(cfg.router.debounce_ms, 500);
        assert_eq!(cfg.server.listen, "0.0.0.0:8080");
    }

    #[test]
    fn test_load_rejects_keyless_request() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"requests": [{{"key": "", "endpoint": "/api/users"}}]}}"#).unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = Config::load(std::path::Path::new("/nonexistent/slice-cache.json")).unwrap();
        assert_eq!(cfg.chunk_size, 5);
    }
}
