//! The slice cache facade: wires store, registry, fetcher, scheduler and
//! route prefetcher from one [`Config`].
//!
//! This is the surface consumers use: observe the store, load slices, and
//! manage query definitions. Navigation events are fed through
//! [`SliceCache::navigate`] and reach the route prefetcher once it is started,
//! either automatically (`router.autoload`) or via [`SliceCache::start_router`].

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::cache::snapshot::CacheSnapshot;
use crate::cache::store::{new_shared_store, SharedCacheStore, Subscription};
use crate::config::Config;
use crate::fetch::paginated::PaginatedFetcher;
use crate::fetch::transport::HttpTransport;
use crate::prefetch::route::{NavigationEvent, RoutePrefetcher, SlicesSource};
use crate::query::definition::{ConfigurationError, QueryDefinition, ResponseExtractor};
use crate::query::registry::{RequestRegistry, SliceEntry};
use crate::schedule::slice::{SchedulerStatsSnapshot, SliceScheduler, SliceTicket};

const NAVIGATION_BUFFER: usize = 64;

/// Builder for [`SliceCache`].
pub struct SliceCacheBuilder {
    config: Arc<Config>,
    transport: Arc<dyn HttpTransport>,
    extractor: ResponseExtractor,
    slices: Option<SlicesSource>,
}

impl SliceCacheBuilder {
    /// Global default extractor for queries without their own.
    pub fn response_extractor(mut self, extractor: ResponseExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Path mappings for the route prefetcher, replacing `router.slices`.
    pub fn slices(mut self, slices: SlicesSource) -> Self {
        self.slices = Some(slices);
        self
    }

    /// Build the cache. Starts the route prefetcher when `router.autoload`
    /// is set, which requires a tokio runtime.
    pub fn build(self) -> Result<SliceCache, ConfigurationError> {
        let config = self.config;
        config.validate()?;

        let store = new_shared_store();
        let registry = Arc::new(RequestRegistry::with_definitions(
            config.requests.iter().cloned(),
        )?);
        let fetcher = Arc::new(PaginatedFetcher::new(
            self.transport,
            config.fetch_settings(self.extractor),
        ));
        let scheduler = Arc::new(SliceScheduler::new(
            fetcher,
            store.clone(),
            registry.clone(),
            config.scheduler_settings(),
        ));

        let slices = self
            .slices
            .unwrap_or_else(|| SlicesSource::Static(config.router.slices.clone()));
        let router = RoutePrefetcher::new(scheduler.clone(), &slices, config.debounce());

        let debug_subscription = config.debug.then(|| store.log_transitions());

        let (navigation_tx, navigation_rx) = mpsc::channel(NAVIGATION_BUFFER);

        let cache = SliceCache {
            config,
            store,
            registry,
            scheduler,
            router,
            navigation_tx,
            navigation_rx: Mutex::new(Some(navigation_rx)),
            _debug_subscription: debug_subscription,
        };

        info!(
            requests = cache.registry.len(),
            mappings = cache.router.mappings().count(),
            "Slice cache ready"
        );

        if cache.config.router.autoload {
            cache.start_router();
        }

        Ok(cache)
    }
}

pub struct SliceCache {
    config: Arc<Config>,
    store: SharedCacheStore,
    registry: Arc<RequestRegistry>,
    scheduler: Arc<SliceScheduler>,
    router: RoutePrefetcher,
    navigation_tx: mpsc::Sender<NavigationEvent>,
    navigation_rx: Mutex<Option<mpsc::Receiver<NavigationEvent>>>,
    _debug_subscription: Option<Subscription>,
}

impl SliceCache {
    pub fn builder(config: Arc<Config>, transport: Arc<dyn HttpTransport>) -> SliceCacheBuilder {
        SliceCacheBuilder {
            config,
            transport,
            extractor: ResponseExtractor::default(),
            slices: None,
        }
    }

    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ConfigurationError> {
        Self::builder(config, transport).build()
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn store(&self) -> &SharedCacheStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<SliceScheduler> {
        &self.scheduler
    }

    pub fn router(&self) -> &RoutePrefetcher {
        &self.router
    }

    /// Current cache state.
    pub fn state(&self) -> CacheSnapshot {
        self.store.get()
    }

    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&CacheSnapshot) + Send + Sync + 'static,
    {
        self.store.subscribe(observer)
    }

    pub fn watch(&self) -> watch::Receiver<CacheSnapshot> {
        self.store.watch()
    }

    pub fn load_slice<I>(&self, requests: I) -> SliceTicket
    where
        I: IntoIterator<Item = Arc<QueryDefinition>>,
    {
        self.scheduler.load_slice(requests)
    }

    pub fn load_aliases<S: AsRef<str>>(&self, keys: &[S]) -> SliceTicket {
        self.scheduler.load_aliases(keys)
    }

    pub fn load_entries(&self, entries: &[SliceEntry]) -> SliceTicket {
        self.scheduler.load_entries(entries)
    }

    pub fn add_request_config(&self, definition: QueryDefinition) -> Result<bool, ConfigurationError> {
        self.registry.add(definition)
    }

    pub fn request_configs(&self) -> Vec<Arc<QueryDefinition>> {
        self.registry.all()
    }

    pub fn stats(&self) -> SchedulerStatsSnapshot {
        self.scheduler.stats()
    }

    /// Start the route prefetcher on the internal navigation channel.
    ///
    /// Returns `false` if it was already started.
    pub fn start_router(&self) -> bool {
        match self.navigation_rx.lock().take() {
            Some(rx) => self.router.start(ReceiverStream::new(rx)),
            None => false,
        }
    }

    pub fn stop_router(&self) {
        self.router.stop();
    }

    /// Report a navigation. Dropped when the route prefetcher is not listening.
    pub async fn navigate(&self, path: impl Into<String>) {
        let event = NavigationEvent::new(path);
        if !self.router.is_running() {
            debug!(path = %event.path, "Route prefetcher not running, ignoring navigation");
            return;
        }
        if self.navigation_tx.send(event).await.is_err() {
            debug!("Navigation channel closed");
        }
    }

    /// Stop the route prefetcher and cancel all scheduled and in-flight work.
    pub fn shutdown(&self) {
        self.router.stop();
        self.scheduler.shutdown();
    }
}

impl Drop for SliceCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}
