//! Query definitions and the alias registry.
//!
//! - [`definition`]: QueryDefinition, ResponseExtractor, CacheOptions, response_total
//! - [`registry`]: RequestRegistry and slice entry resolution

pub mod definition;
pub mod registry;
