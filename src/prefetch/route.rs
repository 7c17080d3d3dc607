//! Route-driven prefetching: load a slice the first time a matching path is visited.
//!
//! Navigation events are debounced (only the last event of a burst survives).
//! A settled path triggers every configured mapping whose prefix it starts
//! with, at most once per mapping for the lifetime of the coordinator.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::query::registry::{RequestRegistry, SliceEntry};
use crate::schedule::slice::{SliceScheduler, SliceTicket};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Path prefix -> slice entries.
pub type SliceMap = BTreeMap<String, Vec<SliceEntry>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationEvent {
    pub path: String,
}

impl NavigationEvent {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

type SlicesFactory = Arc<dyn Fn(&RequestRegistry) -> SliceMap + Send + Sync>;

/// Where the path mappings come from: a fixed map, or a factory evaluated
/// against the registry when the coordinator is built.
#[derive(Clone)]
pub enum SlicesSource {
    Static(SliceMap),
    Factory(SlicesFactory),
}

impl SlicesSource {
    pub fn factory<F>(f: F) -> Self
    where
        F: Fn(&RequestRegistry) -> SliceMap + Send + Sync + 'static,
    {
        SlicesSource::Factory(Arc::new(f))
    }

    pub fn resolve(&self, registry: &RequestRegistry) -> SliceMap {
        match self {
            SlicesSource::Static(map) => map.clone(),
            SlicesSource::Factory(f) => f(registry),
        }
    }
}

impl Default for SlicesSource {
    fn default() -> Self {
        SlicesSource::Static(SliceMap::new())
    }
}

impl fmt::Debug for SlicesSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlicesSource::Static(map) => f.debug_tuple("Static").field(map).finish(),
            SlicesSource::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

fn normalize_prefix(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

struct Inner {
    scheduler: Arc<SliceScheduler>,
    slices: SliceMap,
    debounce: Duration,
    loaded: Mutex<HashSet<String>>,
}

impl Inner {
    fn settle(&self, path: &str) -> Vec<SliceTicket> {
        let mut tickets = Vec::new();
        for (mapping, entries) in &self.slices {
            if !path.starts_with(&normalize_prefix(mapping)) {
                continue;
            }
            // Claim the mapping before loading so concurrent settles submit it once.
            if !self.loaded.lock().insert(mapping.clone()) {
                continue;
            }
            let ticket = self.scheduler.load_entries(entries);
            info!(
                path,
                mapping = %mapping,
                slice = %ticket.id,
                queries = ticket.queries,
                "Prefetching slice for route"
            );
            tickets.push(ticket);
        }
        tickets
    }

    async fn run<S>(self: Arc<Self>, events: S, token: CancellationToken)
    where
        S: Stream<Item = NavigationEvent>,
    {
        let mut events = std::pin::pin!(events);
        let mut pending: Option<NavigationEvent> = None;
        let timer = sleep(self.debounce);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = &mut timer, if pending.is_some() => {
                    if let Some(event) = pending.take() {
                        self.settle(&event.path);
                    }
                }
                next = events.next() => match next {
                    Some(event) => {
                        debug!(path = %event.path, "Navigation");
                        pending = Some(event);
                        timer.as_mut().reset(Instant::now() + self.debounce);
                    }
                    None => {
                        if let Some(event) = pending.take() {
                            self.settle(&event.path);
                        }
                        break;
                    }
                },
            }
        }
        debug!("Route prefetcher stopped");
    }
}

/// Watches navigation and loads configured slices on first visit.
pub struct RoutePrefetcher {
    inner: Arc<Inner>,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl RoutePrefetcher {
    pub fn new(scheduler: Arc<SliceScheduler>, slices: &SlicesSource, debounce: Duration) -> Self {
        let slices = slices.resolve(scheduler.registry());
        Self {
            inner: Arc::new(Inner {
                scheduler,
                slices,
                debounce,
                loaded: Mutex::new(HashSet::new()),
            }),
            running: Mutex::new(None),
        }
    }

    /// Start consuming navigation events in the background.
    ///
    /// Returns `false` if already running. Must be called within a tokio runtime.
    pub fn start<S>(&self, events: S) -> bool
    where
        S: Stream<Item = NavigationEvent> + Send + 'static,
    {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            return false;
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(self.inner.clone().run(events, token.clone()));
        *running = Some((token, handle));
        info!(mappings = self.inner.slices.len(), "Route prefetcher started");
        true
    }

    /// Stop consuming events. Paths already loaded stay loaded.
    pub fn stop(&self) {
        if let Some((token, handle)) = self.running.lock().take() {
            token.cancel();
            handle.abort();
            info!("Route prefetcher stopping");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Handle one already-settled navigation, bypassing the debounce.
    pub fn navigate(&self, path: &str) -> Vec<SliceTicket> {
        self.inner.settle(path)
    }

    /// Mappings that have already triggered, sorted.
    pub fn loaded_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.inner.loaded.lock().iter().cloned().collect();
        paths.sort();
        paths
    }

    pub fn mappings(&self) -> impl Iterator<Item = &str> {
        self.inner.slices.keys().map(String::as_str)
    }
}

impl Drop for RoutePrefetcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("posts"), "/posts");
        assert_eq!(normalize_prefix("/posts"), "/posts");
    }

    #[test]
    fn test_factory_sees_registry() {
        let registry = RequestRegistry::new();
        registry
            .add(crate::query::definition::QueryDefinition::new("users", "/api/users").unwrap())
            .unwrap();

        let source = SlicesSource::factory(|registry| {
            let entries = registry
                .all()
                .iter()
                .map(|d| SliceEntry::Alias(d.key.clone()))
                .collect();
            SliceMap::from([("admin".to_string(), entries)])
        });

        let map = source.resolve(&registry);
        assert_eq!(map["admin"].len(), 1);
    }
}
