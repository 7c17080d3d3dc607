//! Slice scheduler: runs batches of named queries without flooding the backend.
//!
//! A slice is split into chunks of at most [`MAX_SLICE_CHUNK_SIZE`] queries.
//! The first chunk fans out immediately; chunk `i` starts at a cumulative
//! offset of `i * spacing` from submission, where the spacing is the larger of
//! the configured interval and `chunk_size * 500ms`. Chunks never wait for one
//! another, only for their own timer. Every batch a fetch reports is merged
//! straight into the cache store.
//!
//! All work runs in background tasks. Their handles are retained so that
//! [`SliceScheduler::shutdown`] can cancel everything at once; no store update
//! happens after shutdown.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::store::SharedCacheStore;
use crate::fetch::paginated::PaginatedFetcher;
use crate::fetch::pagination::chunk;
use crate::query::definition::QueryDefinition;
use crate::query::registry::{RequestRegistry, SliceEntry};

/// Hard ceiling on queries per chunk, whatever the configuration says.
pub const MAX_SLICE_CHUNK_SIZE: usize = 15;

pub const DEFAULT_SLICE_CHUNK_SIZE: usize = 5;

/// Finished slices whose chunk states stay inspectable.
pub const RECENT_SLICES: usize = 32;

/// Assumed upper bound of one request, halved per query in a chunk.
const PER_QUERY_SPACING_MS: u64 = 500;

/// Lifecycle of one scheduled chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Pending,
    Running,
    Completed,
    Cancelled,
}

impl ChunkState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkState::Completed | ChunkState::Cancelled)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Requested queries per chunk, capped at [`MAX_SLICE_CHUNK_SIZE`].
    pub chunk_size: usize,

    /// Explicit spacing between chunk starts.
    pub query_interval: Option<Duration>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_SLICE_CHUNK_SIZE,
            query_interval: None,
        }
    }
}

impl SchedulerSettings {
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.clamp(1, MAX_SLICE_CHUNK_SIZE)
    }

    /// Spacing between consecutive chunk starts.
    pub fn chunk_spacing(&self) -> Duration {
        let heuristic = Duration::from_millis(self.effective_chunk_size() as u64 * PER_QUERY_SPACING_MS);
        self.query_interval
            .map_or(heuristic, |configured| configured.max(heuristic))
    }

    /// Start offsets of `chunks` chunks, relative to submission.
    pub fn chunk_delays(&self, chunks: usize) -> Vec<Duration> {
        let spacing = self.chunk_spacing();
        (0..chunks).map(|i| spacing * i as u32).collect()
    }
}

/// Receipt for a submitted slice.
#[derive(Debug, Clone, Serialize)]
pub struct SliceTicket {
    pub id: Uuid,
    pub queries: usize,
    pub chunks: usize,
    pub chunk_size: usize,
}

#[derive(Debug, Default)]
pub struct SchedulerStats {
    slices_submitted: AtomicU64,
    chunks_scheduled: AtomicU64,
    chunks_completed: AtomicU64,
    chunks_cancelled: AtomicU64,
    queries_completed: AtomicU64,
    queries_failed: AtomicU64,
    refetches: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStatsSnapshot {
    pub slices_submitted: u64,
    pub chunks_scheduled: u64,
    pub chunks_completed: u64,
    pub chunks_cancelled: u64,
    pub queries_completed: u64,
    pub queries_failed: u64,
    pub refetches: u64,
}

impl SchedulerStats {
    pub fn snapshot(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            slices_submitted: self.slices_submitted.load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            chunks_completed: self.chunks_completed.load(Ordering::Relaxed),
            chunks_cancelled: self.chunks_cancelled.load(Ordering::Relaxed),
            queries_completed: self.queries_completed.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            refetches: self.refetches.load(Ordering::Relaxed),
        }
    }
}

/// Chunk states of slices still running, plus a short history of finished ones.
#[derive(Default)]
struct SliceStates {
    active: HashMap<Uuid, Vec<ChunkState>>,
    finished: VecDeque<(Uuid, Vec<ChunkState>)>,
}

impl SliceStates {
    fn get(&self, slice: Uuid) -> Option<Vec<ChunkState>> {
        self.active.get(&slice).cloned().or_else(|| {
            self.finished
                .iter()
                .find(|(id, _)| *id == slice)
                .map(|(_, states)| states.clone())
        })
    }

    fn retire(&mut self, slice: Uuid) {
        if let Some(states) = self.active.remove(&slice) {
            self.finished.push_back((slice, states));
            while self.finished.len() > RECENT_SLICES {
                self.finished.pop_front();
            }
        }
    }
}

struct Inner {
    fetcher: Arc<PaginatedFetcher>,
    store: SharedCacheStore,
    registry: Arc<RequestRegistry>,
    settings: SchedulerSettings,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    /// One refetch loop per query key.
    refetchers: Mutex<HashMap<String, JoinHandle<()>>>,
    chunk_states: Mutex<SliceStates>,
    stats: SchedulerStats,
}

pub struct SliceScheduler {
    inner: Arc<Inner>,
}

impl SliceScheduler {
    pub fn new(
        fetcher: Arc<PaginatedFetcher>,
        store: SharedCacheStore,
        registry: Arc<RequestRegistry>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                store,
                registry,
                settings,
                shutdown: CancellationToken::new(),
                handles: Mutex::new(Vec::new()),
                refetchers: Mutex::new(HashMap::new()),
                chunk_states: Mutex::new(SliceStates::default()),
                stats: SchedulerStats::default(),
            }),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.inner.settings
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.inner.registry
    }

    /// Submit a slice. Returns immediately; fetching happens in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn load_slice<I>(&self, requests: I) -> SliceTicket
    where
        I: IntoIterator<Item = Arc<QueryDefinition>>,
    {
        let requests: Vec<Arc<QueryDefinition>> = requests.into_iter().collect();
        let chunk_size = self.inner.settings.effective_chunk_size();
        let mut ticket = SliceTicket {
            id: Uuid::new_v4(),
            queries: requests.len(),
            chunks: 0,
            chunk_size,
        };

        if self.inner.shutdown.is_cancelled() {
            warn!(slice = %ticket.id, "Scheduler is shut down, ignoring slice");
            return ticket;
        }
        if requests.is_empty() {
            debug!(slice = %ticket.id, "Empty slice, nothing to load");
            return ticket;
        }

        let chunks = chunk(&requests, chunk_size);
        let delays = self.inner.settings.chunk_delays(chunks.len());
        let submitted = Instant::now();
        ticket.chunks = chunks.len();

        self.inner
            .chunk_states
            .lock()
            .active
            .insert(ticket.id, vec![ChunkState::Pending; chunks.len()]);
        self.inner.stats.slices_submitted.fetch_add(1, Ordering::Relaxed);
        self.inner
            .stats
            .chunks_scheduled
            .fetch_add(chunks.len() as u64, Ordering::Relaxed);

        info!(
            slice = %ticket.id,
            queries = ticket.queries,
            chunks = ticket.chunks,
            chunk_size,
            "Slice submitted"
        );

        for (index, (queries, delay)) in chunks.into_iter().zip(delays).enumerate() {
            let inner = self.inner.clone();
            let handle = tokio::spawn(inner.run_chunk(ticket.id, index, queries, submitted + delay));
            self.inner.track(handle);
        }

        ticket
    }

    /// Submit the registered queries named by `keys`. Unknown keys are skipped.
    pub fn load_aliases<S: AsRef<str>>(&self, keys: &[S]) -> SliceTicket {
        let entries: Vec<SliceEntry> = keys
            .iter()
            .map(|key| SliceEntry::Alias(key.as_ref().to_string()))
            .collect();
        self.load_entries(&entries)
    }

    /// Resolve mixed slice entries through the registry and submit them.
    pub fn load_entries(&self, entries: &[SliceEntry]) -> SliceTicket {
        let resolved = self.inner.registry.resolve_entries(entries);
        self.load_slice(resolved)
    }

    /// Chunk states of a running or recently finished slice, in chunk order.
    pub fn chunk_states(&self, slice: Uuid) -> Option<Vec<ChunkState>> {
        self.inner.chunk_states.lock().get(slice)
    }

    /// Slices with at least one chunk not yet completed or cancelled.
    pub fn active_slices(&self) -> usize {
        self.inner.chunk_states.lock().active.len()
    }

    /// Slices whose chunk states are still held, active or finished.
    pub fn tracked_slices(&self) -> usize {
        let states = self.inner.chunk_states.lock();
        states.active.len() + states.finished.len()
    }

    /// Keys with a live refetch loop.
    pub fn refetching_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .refetchers
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> SchedulerStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Cancel every pending timer and in-flight fetch.
    pub fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();

        let mut cancelled = 0u64;
        {
            let mut slices = self.inner.chunk_states.lock();
            for states in slices.active.values_mut() {
                for state in states.iter_mut().filter(|s| !s.is_terminal()) {
                    *state = ChunkState::Cancelled;
                    cancelled += 1;
                }
            }
            let ids: Vec<Uuid> = slices.active.keys().copied().collect();
            for id in ids {
                slices.retire(id);
            }
        }
        self.inner
            .stats
            .chunks_cancelled
            .fetch_add(cancelled, Ordering::Relaxed);

        let mut handles: Vec<JoinHandle<()>> = self.inner.handles.lock().drain(..).collect();
        handles.extend(self.inner.refetchers.lock().drain().map(|(_, handle)| handle));
        for handle in &handles {
            handle.abort();
        }

        info!(cancelled_chunks = cancelled, tasks = handles.len(), "Scheduler shut down");
    }
}

impl Drop for SliceScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn track(&self, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Move a chunk to `to` unless it already reached a terminal state.
    ///
    /// A slice whose chunks are all terminal is retired from the active set.
    fn transition(&self, slice: Uuid, index: usize, to: ChunkState) -> bool {
        let mut slices = self.chunk_states.lock();
        let Some(chunks) = slices.active.get_mut(&slice) else {
            return false;
        };
        match chunks.get_mut(index) {
            Some(state) if !state.is_terminal() => *state = to,
            _ => return false,
        }
        if chunks.iter().all(ChunkState::is_terminal) {
            slices.retire(slice);
        }
        true
    }

    /// Start the refetch loop for `query` unless its key already has a live one.
    fn ensure_refetch(self: &Arc<Self>, query: &Arc<QueryDefinition>, period: Duration) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let mut refetchers = self.refetchers.lock();
        if refetchers
            .get(&query.key)
            .is_some_and(|handle| !handle.is_finished())
        {
            return;
        }
        debug!(key = %query.key, ?period, "Starting refetch loop");
        let handle = tokio::spawn(self.clone().refetch_loop(query.clone(), period));
        refetchers.insert(query.key.clone(), handle);
    }

    async fn run_chunk(
        self: Arc<Self>,
        slice: Uuid,
        index: usize,
        queries: Vec<Arc<QueryDefinition>>,
        start_at: Instant,
    ) {
        if index > 0 {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = sleep_until(start_at) => {}
            }
        }
        if !self.transition(slice, index, ChunkState::Running) {
            return;
        }
        debug!(slice = %slice, chunk = index, queries = queries.len(), "Chunk running");

        let runs = queries.iter().map(|query| async {
            self.fetch_into_store(query).await;
            if let Some(period) = query.refetch_interval() {
                self.ensure_refetch(query, period);
            }
        });

        tokio::select! {
            _ = self.shutdown.cancelled() => return,
            _ = join_all(runs) => {}
        }

        if self.transition(slice, index, ChunkState::Completed) {
            self.stats.chunks_completed.fetch_add(1, Ordering::Relaxed);
            debug!(slice = %slice, chunk = index, "Chunk completed");
        }
    }

    async fn fetch_into_store(&self, query: &QueryDefinition) {
        let store = self.store.clone();
        let token = self.shutdown.clone();
        let key = query.key.as_str();

        let result = self
            .fetcher
            .fetch(query, |items, partial| {
                if token.is_cancelled() {
                    return;
                }
                store.merge(key, items, partial);
            })
            .await;

        match result {
            Ok(summary) => {
                self.stats.queries_completed.fetch_add(1, Ordering::Relaxed);
                if summary.is_complete() {
                    debug!(key, records = summary.records, pages = summary.pages_requested, "Query loaded");
                } else {
                    warn!(
                        key,
                        records = summary.records,
                        total = summary.total,
                        failed_chunks = summary.failed_chunks.len(),
                        "Query loaded with missing pages"
                    );
                }
            }
            Err(e) => {
                self.stats.queries_failed.fetch_add(1, Ordering::Relaxed);
                warn!(key, "Query failed: {e}");
            }
        }
    }

    async fn refetch_loop(self: Arc<Self>, query: Arc<QueryDefinition>, period: Duration) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(period) => {}
            }
            debug!(key = %query.key, "Refetching");
            self.stats.refetches.fetch_add(1, Ordering::Relaxed);
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.fetch_into_store(&query) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size_is_capped() {
        let settings = SchedulerSettings {
            chunk_size: 40,
            query_interval: None,
        };
        assert_eq!(settings.effective_chunk_size(), 15);

        let settings = SchedulerSettings {
            chunk_size: 0,
            query_interval: None,
        };
        assert_eq!(settings.effective_chunk_size(), 1);
    }

    #[test]
    fn test_spacing_defaults_to_chunk_heuristic() {
        let settings = SchedulerSettings::default();
        assert_eq!(settings.chunk_spacing(), Duration::from_millis(2500));
    }

    #[test]
    fn test_spacing_never_below_heuristic() {
        let settings = SchedulerSettings {
            chunk_size: 10,
            query_interval: Some(Duration::from_millis(1000)),
        };
        assert_eq!(settings.chunk_spacing(), Duration::from_millis(5000));

        let settings = SchedulerSettings {
            chunk_size: 10,
            query_interval: Some(Duration::from_millis(7000)),
        };
        assert_eq!(settings.chunk_spacing(), Duration::from_millis(7000));
    }

    #[test]
    fn test_chunk_delays_are_cumulative() {
        let settings = SchedulerSettings {
            chunk_size: 2,
            query_interval: None,
        };
        assert_eq!(
            settings.chunk_delays(3),
            vec![
                Duration::ZERO,
                Duration::from_millis(1000),
                Duration::from_millis(2000)
            ]
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(ChunkState::Completed.is_terminal());
        assert!(ChunkState::Cancelled.is_terminal());
        assert!(!ChunkState::Pending.is_terminal());
        assert!(!ChunkState::Running.is_terminal());
    }
}
