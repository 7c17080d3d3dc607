//! The cache store: owns the `key -> records` state and its merge invariant.
//!
//! State is replaced wholesale on every accepted update and published to
//! observers in the order updates were accepted. Merges are serialized, so
//! the partial-suppression check and the replacement happen atomically.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::cache::snapshot::CacheSnapshot;
use crate::query::definition::Record;

type Observer = Arc<dyn Fn(&CacheSnapshot) + Send + Sync>;

/// Result of a [`CacheStore::merge`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The entry was replaced and the new state published.
    Applied,
    /// A partial result arrived for a key that already holds records.
    Dropped,
}

#[derive(Default)]
struct Observers {
    next_id: u64,
    entries: BTreeMap<u64, Observer>,
}

/// Handle returned by [`CacheStore::subscribe`]. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    observers: Weak<Mutex<Observers>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            observers.lock().entries.remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

pub struct CacheStore {
    state: RwLock<CacheSnapshot>,
    merge_lock: Mutex<()>,
    observers: Arc<Mutex<Observers>>,
    watch_tx: watch::Sender<CacheSnapshot>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        let (watch_tx, _) = watch::channel(CacheSnapshot::default());
        Self {
            state: RwLock::new(CacheSnapshot::default()),
            merge_lock: Mutex::new(()),
            observers: Arc::new(Mutex::new(Observers::default())),
            watch_tx,
        }
    }

    /// Current state.
    pub fn get(&self) -> CacheSnapshot {
        self.state.read().clone()
    }

    /// Register an observer for every accepted state replacement.
    ///
    /// Observers run on the merging task, in acceptance order. They may read
    /// the store but must not call [`merge`](Self::merge) themselves.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&CacheSnapshot) + Send + Sync + 'static,
    {
        let mut observers = self.observers.lock();
        let id = observers.next_id;
        observers.next_id += 1;
        observers.entries.insert(id, Arc::new(observer));
        Subscription {
            id,
            observers: Arc::downgrade(&self.observers),
        }
    }

    /// Async view of the state. Intermediate states may be coalesced.
    pub fn watch(&self) -> watch::Receiver<CacheSnapshot> {
        self.watch_tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().entries.len()
    }

    /// Merge a fetched batch for `key`.
    ///
    /// A partial batch is dropped when the store already holds a non-empty
    /// entry for `key`, whether that entry is itself partial or final.
    /// Anything else replaces the entry.
    pub fn merge(&self, key: &str, items: Vec<Record>, partial: bool) -> MergeOutcome {
        let _guard = self.merge_lock.lock();

        let current = self.get();
        if partial && current.has_records(key) {
            debug!(key, incoming = items.len(), "Dropped stale partial result");
            return MergeOutcome::Dropped;
        }

        let count = items.len();
        let next = current.with_entry(key, items);
        *self.state.write() = next.clone();
        self.watch_tx.send_replace(next.clone());

        debug!(key, records = count, partial, "Cache entry replaced");

        let observers: Vec<Observer> = self.observers.lock().entries.values().cloned().collect();
        for observer in observers {
            observer(&next);
        }

        MergeOutcome::Applied
    }

    /// Subscribe an observer that logs every state transition.
    pub fn log_transitions(&self) -> Subscription {
        self.subscribe(|state| {
            let keys: Vec<&str> = state.keys().collect();
            info!(
                entries = state.len(),
                records = state.record_count(),
                ?keys,
                "Cache state"
            );
        })
    }
}

/// Shared handle to the store.
pub type SharedCacheStore = Arc<CacheStore>;

pub fn new_shared_store() -> SharedCacheStore {
    Arc::new(CacheStore::new())
}
