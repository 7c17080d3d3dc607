//! In-memory paginated backend shared by the integration tests.
//!
//! Serves `{total, data, page}` responses for registered collections,
//! simulates latency on the tokio clock, and logs every request with the
//! (virtual) time it arrived.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};

use slice_cache::cache::store::{new_shared_store, SharedCacheStore};
use slice_cache::fetch::paginated::{FetchSettings, PaginatedFetcher};
use slice_cache::schedule::slice::SchedulerSettings;
use slice_cache::{HttpTransport, QueryDefinition, RequestRegistry, SliceScheduler, TransportError};

#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub total: u64,
    pub latency: Duration,
    /// Per-page latency overrides.
    pub page_latency: HashMap<u64, Duration>,
    pub failing_pages: HashSet<u64>,
}

impl Collection {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn page_latency(mut self, page: u64, latency: Duration) -> Self {
        self.page_latency.insert(page, latency);
        self
    }

    pub fn failing_page(mut self, page: u64) -> Self {
        self.failing_pages.insert(page);
        self
    }
}

#[derive(Debug, Clone)]
pub struct LoggedRequest {
    pub path: String,
    pub url: String,
    pub page: u64,
    /// Time since the backend was created.
    pub at: Duration,
}

pub struct MockBackend {
    collections: Mutex<HashMap<String, Collection>>,
    log: Mutex<Vec<LoggedRequest>>,
    created: Instant,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            collections: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            created: Instant::now(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn with(self: Arc<Self>, path: &str, collection: Collection) -> Arc<Self> {
        self.collections.lock().insert(path.to_string(), collection);
        self
    }

    pub fn requests(&self) -> Vec<LoggedRequest> {
        self.log.lock().clone()
    }

    pub fn requests_for(&self, path: &str) -> Vec<LoggedRequest> {
        self.log
            .lock()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.log.lock().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

fn query_param(query: &str, name: &str) -> Option<u64> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(n, _)| *n == name)
        .and_then(|(_, v)| v.parse().ok())
}

/// Records `[start, end)` of a collection, each `{id, label}`.
pub fn records(path: &str, start: u64, end: u64) -> Vec<Value> {
    (start..end)
        .map(|id| json!({"id": id, "label": format!("{path} #{id}")}))
        .collect()
}

#[async_trait]
impl HttpTransport for MockBackend {
    async fn request(
        &self,
        _method: &str,
        url: &str,
        _params: &BTreeMap<String, String>,
    ) -> Result<Value, TransportError> {
        let (path, query) = url.split_once('?').unwrap_or((url, ""));
        let page = query_param(query, "page").unwrap_or(1);
        let per_page = query_param(query, "per_page").unwrap_or(100);

        self.log.lock().push(LoggedRequest {
            path: path.to_string(),
            url: url.to_string(),
            page,
            at: self.created.elapsed(),
        });

        let collection = self.collections.lock().get(path).cloned();
        let Some(collection) = collection else {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: 404,
            });
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let latency = collection
            .page_latency
            .get(&page)
            .copied()
            .unwrap_or(collection.latency);
        if !latency.is_zero() {
            sleep(latency).await;
        }

        if collection.failing_pages.contains(&page) {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: 500,
            });
        }

        let start = ((page - 1) * per_page).min(collection.total);
        let end = (page * per_page).min(collection.total);
        Ok(json!({
            "total": collection.total,
            "page": page,
            "data": records(path, start, end),
        }))
    }
}

pub fn query(key: &str, endpoint: &str) -> QueryDefinition {
    QueryDefinition::new(key, endpoint).unwrap()
}

pub fn fetch_settings(per_page: u64, chunk_size: usize, interval: Duration) -> FetchSettings {
    FetchSettings {
        per_page,
        chunk_size,
        query_interval: interval,
        ..Default::default()
    }
}

/// Scheduler wired to `backend` with single-request pages.
pub struct Harness {
    pub backend: Arc<MockBackend>,
    pub store: SharedCacheStore,
    pub registry: Arc<RequestRegistry>,
    pub scheduler: Arc<SliceScheduler>,
}

impl Harness {
    pub fn new(backend: Arc<MockBackend>, settings: SchedulerSettings) -> Self {
        Self::with_fetch(
            backend,
            settings,
            fetch_settings(500, 5, Duration::from_millis(100)),
        )
    }

    pub fn with_fetch(
        backend: Arc<MockBackend>,
        settings: SchedulerSettings,
        fetch: FetchSettings,
    ) -> Self {
        let store = new_shared_store();
        let registry = Arc::new(RequestRegistry::new());
        let fetcher = Arc::new(PaginatedFetcher::new(backend.clone(), fetch));
        let scheduler = Arc::new(SliceScheduler::new(
            fetcher,
            store.clone(),
            registry.clone(),
            settings,
        ));
        Self {
            backend,
            store,
            registry,
            scheduler,
        }
    }
}
