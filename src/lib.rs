//! Refuge - assistance resource resolution with a geospatial cache
//!
//! This library provides the resolution pipeline and caches used by the
//! server binary.

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod providers;
pub mod resolve;
pub mod service;
pub mod spatial;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{CacheError, ProviderError, ResolveError};
pub use models::{Coordinate, RawProviderRecord, Resource, ResourceType};
pub use service::{ResolveRequest, ResolveResponse, ResourceService};
