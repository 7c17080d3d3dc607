//! The in-memory slice cache.
//!
//! - [`snapshot`]: CacheSnapshot, the immutable `key -> records` state, and record lookup
//! - [`store`]: CacheStore, the merge invariant and state observers

pub mod snapshot;
pub mod store;
