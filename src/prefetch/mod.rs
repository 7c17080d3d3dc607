//! Prefetching slices ahead of use.
//!
//! - [`route`]: RoutePrefetcher, debounced path-to-slice triggering

pub mod route;
