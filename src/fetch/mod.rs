//! Fetching paginated collections from the backend.
//!
//! - [`transport`]: the HTTP request boundary and its reqwest implementation
//! - [`pagination`]: page size clamping, URL pagination, page plans
//! - [`paginated`]: PaginatedFetcher, the multi-page retrieval protocol

pub mod paginated;
pub mod pagination;
pub mod transport;
