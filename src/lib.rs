//! slice-cache: background slice cache for paginated REST collections.
//!
//! Fetches paginated collections in the background, merges partial and
//! complete results into a keyed in-memory store, and notifies observers as
//! data arrives, while bounding request concurrency and spreading load over
//! time:
//!   route/consumer → SliceScheduler → PaginatedFetcher → CacheStore → observers

pub mod cache;
pub mod config;
pub mod engine;
pub mod fetch;
pub mod prefetch;
pub mod query;
pub mod schedule;
pub mod server;

pub use cache::snapshot::CacheSnapshot;
pub use cache::store::{CacheStore, MergeOutcome, Subscription};
pub use config::Config;
pub use engine::SliceCache;
pub use fetch::paginated::PaginatedFetcher;
pub use fetch::transport::{HttpTransport, ReqwestTransport, TransportError};
pub use prefetch::route::{NavigationEvent, RoutePrefetcher, SlicesSource};
pub use query::definition::{ConfigurationError, QueryDefinition, Record, ResponseExtractor};
pub use query::registry::{RegistryError, RequestRegistry, SliceEntry};
pub use schedule::slice::{SliceScheduler, SliceTicket};
