//! Viewport-level cache of complete search results.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::ConflictableTransactionError;
use sled::{Db, Transactional, Tree};
use tracing::{debug, info};

use super::{decode, expired_upper_bound, expiry_key, key_of_expiry_row, EMPTY};
use crate::error::CacheError;
use crate::models::{Resource, ResourceType};

const ENTRIES_TREE: &str = "queries";
const BY_EXPIRY_TREE: &str = "queries_by_expiry";

/// Halves round toward +inf
fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

fn round3(value: f64) -> f64 {
    // + 0.0 turns -0.0 into 0.0 so keys never read "-0"
    round_half_up(value * 1000.0) / 1000.0 + 0.0
}

/// `{type}_{lat:3dp}_{lon:3dp}_{zoom}`; nearby viewports share a key
pub fn cache_key(lat: f64, lon: f64, zoom: f64, resource_type: ResourceType) -> String {
    format!(
        "{}_{}_{}_{}",
        resource_type.as_str(),
        round3(lat),
        round3(lon),
        round_half_up(zoom) as i64
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCacheEntry {
    pub cache_key: String,
    pub resources: Vec<Resource>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A cache hit
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResult {
    pub resources: Vec<Resource>,
    pub age_ms: i64,
}

pub struct QueryCache {
    entries: Tree,
    by_expiry: Tree,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(db: &Db, ttl: Duration) -> Result<Self, CacheError> {
        Ok(Self {
            entries: db.open_tree(ENTRIES_TREE)?,
            by_expiry: db.open_tree(BY_EXPIRY_TREE)?,
            ttl,
        })
    }

    pub fn get(
        &self,
        lat: f64,
        lon: f64,
        zoom: f64,
        resource_type: ResourceType,
    ) -> Result<Option<CachedResult>, CacheError> {
        self.get_at(lat, lon, zoom, resource_type, Utc::now())
    }

    /// Expired entries read as a miss and are left for the sweep
    pub fn get_at(
        &self,
        lat: f64,
        lon: f64,
        zoom: f64,
        resource_type: ResourceType,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedResult>, CacheError> {
        let key = cache_key(lat, lon, zoom, resource_type);

        let Some(bytes) = self.entries.get(key.as_bytes())? else {
            return Ok(None);
        };
        let entry: QueryCacheEntry = decode(&bytes)?;

        if entry.expires_at <= now {
            debug!("Query cache entry {} expired", key);
            return Ok(None);
        }

        Ok(Some(CachedResult {
            age_ms: (now - entry.created_at).num_milliseconds().max(0),
            resources: entry.resources,
        }))
    }

    pub fn put(
        &self,
        lat: f64,
        lon: f64,
        zoom: f64,
        resource_type: ResourceType,
        resources: &[Resource],
    ) -> Result<(), CacheError> {
        self.put_at(lat, lon, zoom, resource_type, resources, Utc::now())
    }

    /// Overwrite-or-insert with a fresh TTL
    pub fn put_at(
        &self,
        lat: f64,
        lon: f64,
        zoom: f64,
        resource_type: ResourceType,
        resources: &[Resource],
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let key = cache_key(lat, lon, zoom, resource_type);
        let entry = QueryCacheEntry {
            cache_key: key.clone(),
            resources: resources.to_vec(),
            created_at: now,
            expires_at: now + self.ttl,
        };
        let bytes = serde_json::to_vec(&entry)?;

        (&self.entries, &self.by_expiry).transaction(|(entries, by_expiry)| {
            if let Some(previous) = entries.get(key.as_bytes())? {
                let previous: QueryCacheEntry =
                    decode(&previous).map_err(ConflictableTransactionError::Abort)?;
                by_expiry.remove(expiry_key(previous.expires_at, &key))?;
            }

            entries.insert(key.as_bytes(), bytes.clone())?;
            by_expiry.insert(expiry_key(entry.expires_at, &key), EMPTY)?;
            Ok(())
        })?;

        debug!("Cached {} resources under {}", resources.len(), key);
        Ok(())
    }

    /// Drop the entry for a viewport. Returns whether one existed.
    pub fn invalidate(
        &self,
        lat: f64,
        lon: f64,
        zoom: f64,
        resource_type: ResourceType,
    ) -> Result<bool, CacheError> {
        let key = cache_key(lat, lon, zoom, resource_type);

        let cleared = (&self.entries, &self.by_expiry).transaction(|(entries, by_expiry)| {
            let Some(previous) = entries.remove(key.as_bytes())? else {
                return Ok(false);
            };
            let previous: QueryCacheEntry =
                decode(&previous).map_err(ConflictableTransactionError::Abort)?;
            by_expiry.remove(expiry_key(previous.expires_at, &key))?;
            Ok(true)
        })?;

        if cleared {
            info!("Invalidated query cache entry {}", key);
        }
        Ok(cleared)
    }

    pub fn sweep_expired(&self) -> Result<usize, CacheError> {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<usize, CacheError> {
        let expired_rows: Vec<sled::IVec> = self
            .by_expiry
            .range(..expired_upper_bound(now))
            .keys()
            .collect::<Result<_, _>>()?;

        let mut removed = 0;
        for row in expired_rows {
            let Some(key) = key_of_expiry_row(&row) else {
                self.by_expiry.remove(&row)?;
                continue;
            };

            let deleted = (&self.entries, &self.by_expiry).transaction(|(entries, by_expiry)| {
                let Some(bytes) = entries.get(key.as_bytes())? else {
                    by_expiry.remove(row.clone())?;
                    return Ok(false);
                };
                let entry: QueryCacheEntry =
                    decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
                if entry.expires_at > now {
                    if row[..] != expiry_key(entry.expires_at, &key)[..] {
                        by_expiry.remove(row.clone())?;
                    }
                    return Ok(false);
                }

                by_expiry.remove(row.clone())?;
                entries.remove(key.as_bytes())?;
                Ok(true)
            })?;

            if deleted {
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Swept {} expired query cache entries", removed);
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
