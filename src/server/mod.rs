//! HTTP server for inspecting and driving the cache.
//!
//! - [`api`]: REST routes over the cache, registry and scheduler
//! - [`streaming`]: SSE stream of cache state transitions

pub mod api;
pub mod streaming;
