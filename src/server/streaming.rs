//! SSE (Server-Sent Events) stream of cache state transitions.
//!
//! Each event carries a summary of the new state. Transitions that happen
//! faster than the client reads are coalesced into the latest one.

use std::collections::BTreeMap;

use axum::response::sse::Event;
use futures::stream::Stream;
use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

use crate::cache::snapshot::CacheSnapshot;

/// One state transition as sent to clients.
#[derive(Debug, Serialize)]
pub struct CacheStateEvent {
    pub entries: usize,
    pub records: usize,
    /// Record count per key.
    pub keys: BTreeMap<String, usize>,
}

impl From<&CacheSnapshot> for CacheStateEvent {
    fn from(state: &CacheSnapshot) -> Self {
        Self {
            entries: state.len(),
            records: state.record_count(),
            keys: state
                .keys()
                .map(|key| (key.to_string(), state.get(key).map_or(0, <[_]>::len)))
                .collect(),
        }
    }
}

/// Convert a state watch into an SSE stream, starting with the current state.
pub fn state_to_sse_stream(
    rx: watch::Receiver<CacheSnapshot>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    WatchStream::new(rx).map(|state| {
        let data = serde_json::to_string(&CacheStateEvent::from(&state)).unwrap_or_default();
        Ok(Event::default().event("state").data(data))
    })
}
