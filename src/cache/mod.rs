//! Persistent resource and viewport caches backed by sled.
//!
//! Both caches share one `sled::Db`. Expiry indexes are keyed by
//! `expires_at` in big-endian milliseconds followed by the entry key, so a
//! range scan up to "now" yields exactly the expired rows.

pub mod geo_cache;
pub mod identity;
pub mod query_cache;

use chrono::{DateTime, Utc};

use crate::error::CacheError;

pub use geo_cache::{GeoCache, GeoCacheEntry, UpsertSummary};
pub use identity::{normalize_text, resource_id};
pub use query_cache::{cache_key, CachedResult, QueryCache, QueryCacheEntry};

pub(crate) const EMPTY: &[u8] = &[];

fn millis(at: DateTime<Utc>) -> u64 {
    at.timestamp_millis().max(0) as u64
}

/// Expiry index row: `expires_at_ms (u64 BE) ‖ key`
pub(crate) fn expiry_key(expires_at: DateTime<Utc>, key: &str) -> Vec<u8> {
    let mut row = Vec::with_capacity(8 + key.len());
    row.extend_from_slice(&millis(expires_at).to_be_bytes());
    row.extend_from_slice(key.as_bytes());
    row
}

/// Exclusive upper bound covering every row that expired at or before `now`
pub(crate) fn expired_upper_bound(now: DateTime<Utc>) -> [u8; 8] {
    (millis(now) + 1).to_be_bytes()
}

/// Entry key carried by an expiry row
pub(crate) fn key_of_expiry_row(row: &[u8]) -> Option<String> {
    row.get(8..)
        .and_then(|key| std::str::from_utf8(key).ok())
        .map(String::from)
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, CacheError> {
    Ok(serde_json::from_slice(bytes)?)
}
