//! Slice scheduling.
//!
//! - [`slice`]: SliceScheduler, chunked and time-staggered slice loading

pub mod slice;
