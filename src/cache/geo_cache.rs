//! Resource-level cache: upsert by identity, radius lookup, expiry.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::ConflictableTransactionError;
use sled::{Db, Transactional, Tree};
use tracing::{debug, info};

use super::{decode, expired_upper_bound, expiry_key, key_of_expiry_row, resource_id, EMPTY};
use crate::error::CacheError;
use crate::models::{Coordinate, Resource, ResourceType};
use crate::spatial::haversine_km;

const ENTRIES_TREE: &str = "resources";
const BY_TYPE_TREE: &str = "resources_by_type";
const BY_EXPIRY_TREE: &str = "resources_by_expiry";

/// Stored resource with its bookkeeping timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoCacheEntry {
    pub resource_id: String,
    #[serde(flatten)]
    pub resource: Resource,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl GeoCacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub new_count: usize,
    pub updated_count: usize,
}

fn type_key(resource_type: ResourceType, id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(resource_type.as_str().len() + 1 + id.len());
    key.extend_from_slice(resource_type.as_str().as_bytes());
    key.push(0);
    key.extend_from_slice(id.as_bytes());
    key
}

fn type_prefix(resource_type: ResourceType) -> Vec<u8> {
    let mut prefix = resource_type.as_str().as_bytes().to_vec();
    prefix.push(0);
    prefix
}

pub struct GeoCache {
    entries: Tree,
    by_type: Tree,
    by_expiry: Tree,
    ttl: Duration,
}

impl GeoCache {
    pub fn new(db: &Db, ttl: Duration) -> Result<Self, CacheError> {
        Ok(Self {
            entries: db.open_tree(ENTRIES_TREE)?,
            by_type: db.open_tree(BY_TYPE_TREE)?,
            by_expiry: db.open_tree(BY_EXPIRY_TREE)?,
            ttl,
        })
    }

    pub fn upsert(&self, resources: &[Resource]) -> Result<UpsertSummary, CacheError> {
        self.upsert_at(resources, Utc::now())
    }

    /// Insert or refresh each resource. Refreshing keeps `first_seen`.
    pub fn upsert_at(
        &self,
        resources: &[Resource],
        now: DateTime<Utc>,
    ) -> Result<UpsertSummary, CacheError> {
        let mut summary = UpsertSummary::default();
        let expires_at = now + self.ttl;

        for resource in resources {
            let id = resource_id(resource);

            let existed = (&self.entries, &self.by_type, &self.by_expiry).transaction(
                |(entries, by_type, by_expiry)| {
                    let previous = match entries.get(id.as_bytes())? {
                        Some(bytes) => Some(
                            decode::<GeoCacheEntry>(&bytes)
                                .map_err(ConflictableTransactionError::Abort)?,
                        ),
                        None => None,
                    };

                    if let Some(ref previous) = previous {
                        by_expiry.remove(expiry_key(previous.expires_at, &id))?;
                    }

                    let entry = GeoCacheEntry {
                        resource_id: id.clone(),
                        resource: resource.clone(),
                        first_seen: previous.as_ref().map_or(now, |p| p.first_seen),
                        last_updated: now,
                        expires_at,
                    };
                    let bytes = serde_json::to_vec(&entry)
                        .map_err(|e| ConflictableTransactionError::Abort(CacheError::from(e)))?;

                    entries.insert(id.as_bytes(), bytes)?;
                    by_type.insert(type_key(resource.resource_type, &id), EMPTY)?;
                    by_expiry.insert(expiry_key(expires_at, &id), EMPTY)?;

                    Ok(previous.is_some())
                },
            )?;

            if existed {
                summary.updated_count += 1;
            } else {
                summary.new_count += 1;
            }
        }

        debug!(
            "GeoCache upsert: {} new, {} updated",
            summary.new_count, summary.updated_count
        );
        Ok(summary)
    }

    pub fn query_near(
        &self,
        center: Coordinate,
        radius_km: f64,
        resource_type: ResourceType,
    ) -> Result<Vec<GeoCacheEntry>, CacheError> {
        self.query_near_at(center, radius_km, resource_type, Utc::now())
    }

    /// Live entries of `resource_type` within `radius_km`, nearest first
    pub fn query_near_at(
        &self,
        center: Coordinate,
        radius_km: f64,
        resource_type: ResourceType,
        now: DateTime<Utc>,
    ) -> Result<Vec<GeoCacheEntry>, CacheError> {
        let mut hits = Vec::new();

        for row in self.by_type.scan_prefix(type_prefix(resource_type)) {
            let (key, _) = row?;
            let id = &key[resource_type.as_str().len() + 1..];

            // Index row outlived its entry (swept concurrently)
            let Some(bytes) = self.entries.get(id)? else {
                continue;
            };
            let entry: GeoCacheEntry = decode(&bytes)?;
            if entry.is_expired(now) {
                continue;
            }

            let distance = haversine_km(center, entry.resource.coordinate);
            if distance <= radius_km {
                hits.push((distance, entry));
            }
        }

        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(hits.into_iter().map(|(_, entry)| entry).collect())
    }

    pub fn sweep_expired(&self) -> Result<usize, CacheError> {
        self.sweep_expired_at(Utc::now())
    }

    /// Delete every entry with `expires_at <= now`
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<usize, CacheError> {
        let expired_rows: Vec<sled::IVec> = self
            .by_expiry
            .range(..expired_upper_bound(now))
            .keys()
            .collect::<Result<_, _>>()?;

        let mut removed = 0;
        for row in expired_rows {
            let Some(id) = key_of_expiry_row(&row) else {
                self.by_expiry.remove(&row)?;
                continue;
            };

            let deleted = (&self.entries, &self.by_type, &self.by_expiry).transaction(
                |(entries, by_type, by_expiry)| {
                    let Some(bytes) = entries.get(id.as_bytes())? else {
                        by_expiry.remove(row.clone())?;
                        return Ok(false);
                    };
                    let entry: GeoCacheEntry =
                        decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
                    // Refreshed since the row was read; keep its live row
                    if !entry.is_expired(now) {
                        if row[..] != expiry_key(entry.expires_at, &id)[..] {
                            by_expiry.remove(row.clone())?;
                        }
                        return Ok(false);
                    }

                    by_expiry.remove(row.clone())?;
                    entries.remove(id.as_bytes())?;
                    by_type.remove(type_key(entry.resource.resource_type, &id))?;
                    Ok(true)
                },
            )?;

            if deleted {
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Swept {} expired resources", removed);
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
