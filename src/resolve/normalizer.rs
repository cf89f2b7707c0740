//! Raw provider record -> canonical `Resource`.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::address::{
    extract_address_from_osm, generate_basic_address, AddressResolver, BASIC_ADDRESS_CONFIDENCE,
};
use super::confidence::ConfidenceScorer;
use crate::config::{Config, StyleTable};
use crate::models::{
    AddressResolution, Coordinate, OsmTagSet, RawProviderRecord, Resource, ResourceType, TagMap,
};
use crate::providers::Geocoder;

/// Tunables held by the normalizer
#[derive(Debug, Clone)]
pub struct NormalizerPolicy {
    /// Records scoring below this are dropped
    pub min_confidence: f64,
    pub reverse_timeout: Duration,
    pub forward_timeout: Duration,
    pub styles: StyleTable,
}

impl NormalizerPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_confidence: config.search.min_confidence,
            reverse_timeout: config.providers.reverse_timeout(),
            forward_timeout: config.providers.forward_timeout(),
            styles: config.styling.clone(),
        }
    }
}

pub struct ResourceNormalizer {
    geocoder: Arc<dyn Geocoder>,
    resolver: AddressResolver,
    scorer: ConfidenceScorer,
    policy: NormalizerPolicy,
}

impl ResourceNormalizer {
    pub fn new(geocoder: Arc<dyn Geocoder>, policy: NormalizerPolicy) -> Self {
        Self {
            resolver: AddressResolver::new(geocoder.clone(), policy.reverse_timeout),
            geocoder,
            scorer: ConfidenceScorer::new(),
            policy,
        }
    }

    /// Whether a score passes the acceptance threshold
    pub fn accepts(&self, confidence: f64) -> bool {
        confidence >= self.policy.min_confidence
    }

    /// Normalize one record. `None` means the record was dropped.
    pub async fn normalize(
        &self,
        record: &RawProviderRecord,
        resource_type: ResourceType,
    ) -> Option<Resource> {
        let tags = record.tags();

        if let RawProviderRecord::Osm(el) = record {
            if el.has_partial_point() {
                debug!("Dropping {}: partial position", record.source_id());
                return None;
            }
        }

        let coordinate = match record.coordinate() {
            Some(c) => c,
            None => self.locate_by_address(record, &tags).await?,
        };

        if !coordinate.is_valid() {
            debug!(
                "Dropping {}: invalid coordinate ({}, {})",
                record.source_id(),
                coordinate.lat,
                coordinate.lon
            );
            return None;
        }

        let tag_set = OsmTagSet::from_tags(&tags);
        let name = record.name();

        let resolution = match AssertUnwindSafe(self.resolver.resolve(coordinate, Some(&tags)))
            .catch_unwind()
            .await
        {
            Ok(resolution) => resolution,
            Err(_) => {
                warn!(
                    "Address resolution panicked for {}, using basic address",
                    record.source_id()
                );
                AddressResolution {
                    address: generate_basic_address(Some(coordinate), &tag_set, name),
                    confidence: BASIC_ADDRESS_CONFIDENCE,
                    verified: false,
                }
            }
        };

        let confidence = self.scorer.score(record, &resolution, &tag_set);
        if !self.accepts(confidence) {
            debug!(
                "Dropping {}: confidence {:.2} below {:.2}",
                record.source_id(),
                confidence,
                self.policy.min_confidence
            );
            return None;
        }

        let style = self.policy.styles.style_for(resource_type);
        let name = match name {
            Some(name) => name.to_string(),
            None => format!("{} Service", resource_type.label()),
        };

        Some(Resource {
            resource_type,
            name,
            color: style.color.clone(),
            icon: style.icon.clone(),
            coordinate,
            address: Some(resolution.address),
            verified: resolution.verified,
            confidence,
            osm_tags: tag_set,
        })
    }

    /// Forward geocode the tag address of a record with no position
    async fn locate_by_address(
        &self,
        record: &RawProviderRecord,
        tags: &TagMap,
    ) -> Option<Coordinate> {
        let Some(address) = extract_address_from_osm(tags) else {
            debug!("Dropping {}: no coordinates and no address", record.source_id());
            return None;
        };

        self.geocoder.wait_for_slot().await;
        match tokio::time::timeout(
            self.policy.forward_timeout,
            self.geocoder.forward_geocode(&address),
        )
        .await
        {
            Ok(Ok(Some(coordinate))) => Some(coordinate),
            Ok(Ok(None)) => {
                debug!("Dropping {}: '{}' did not geocode", record.source_id(), address);
                None
            }
            Ok(Err(e)) => {
                warn!("Forward geocoding failed for {}: {}", record.source_id(), e);
                None
            }
            Err(_) => {
                warn!("Forward geocoding timed out for {}", record.source_id());
                None
            }
        }
    }
}
