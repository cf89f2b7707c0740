//! Address resolution fallback chain.
//!
//! Tiers, first success wins:
//! 1. address assembled from OSM `addr:*` tags (needs at least two parts)
//! 2. reverse geocoding, scored by how specific the answer is
//! 3. a synthetic "Near lat, lon" label

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::error::ProviderError;
use crate::models::{AddressResolution, Coordinate, OsmTagSet, TagMap};
use crate::providers::{Geocoder, ReverseGeocode};

pub const TAG_CONFIDENCE: f64 = 0.8;
pub const REVERSE_BASE_CONFIDENCE: f64 = 0.5;
pub const NO_DISPLAY_NAME_CONFIDENCE: f64 = 0.3;
pub const SYNTHETIC_CONFIDENCE: f64 = 0.2;
pub const BASIC_ADDRESS_CONFIDENCE: f64 = 0.4;

/// Why the reverse-geocoding tier produced nothing
#[derive(Debug, Error)]
pub enum LookupFailure {
    #[error("reverse geocoding timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Join house number, street, city and postcode when at least two are present
pub fn extract_address_from_osm(tags: &TagMap) -> Option<String> {
    let parts: Vec<&str> = ["addr:housenumber", "addr:street", "addr:city", "addr:postcode"]
        .iter()
        .filter_map(|key| tags.get(*key))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect();

    if parts.len() >= 2 {
        Some(parts.join(", "))
    } else {
        None
    }
}

/// Last-resort address label. Pure formatting, never fails.
pub fn generate_basic_address(
    at: Option<Coordinate>,
    tags: &OsmTagSet,
    name: Option<&str>,
) -> String {
    let parts: Vec<&str> = [tags.addr_street.as_deref(), tags.addr_city.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    if !parts.is_empty() {
        return parts.join(", ");
    }

    match (name, at) {
        (Some(name), Some(at)) => format!("{} ({})", name, at.literal()),
        (Some(name), None) => name.to_string(),
        (None, Some(at)) => at.literal(),
        (None, None) => "Unknown Location".to_string(),
    }
}

/// Score a reverse-geocoding answer by the detail it carries
pub fn score_reverse(at: Coordinate, answer: &ReverseGeocode) -> AddressResolution {
    let Some(display_name) = answer.display_name.as_deref().filter(|n| !n.trim().is_empty())
    else {
        return AddressResolution {
            address: format!("Coordinates: {}", at.literal()),
            confidence: NO_DISPLAY_NAME_CONFIDENCE,
            verified: false,
        };
    };

    let mut confidence = REVERSE_BASE_CONFIDENCE;

    if let Some(ref address) = answer.address {
        if address.house_number.is_some() {
            confidence += 0.2;
        }
        if address.road.is_some() {
            confidence += 0.2;
        }
        if address.has_settlement() {
            confidence += 0.1;
        }
    }

    if matches!(answer.place_type.as_deref(), Some("building") | Some("house")) {
        confidence += 0.1;
    }
    if matches!(answer.class.as_deref(), Some("amenity") | Some("office")) {
        confidence += 0.1;
    }

    let confidence = confidence.min(1.0);

    AddressResolution {
        address: display_name.to_string(),
        confidence,
        verified: confidence > 0.7,
    }
}

fn synthetic(at: Coordinate) -> AddressResolution {
    AddressResolution {
        address: format!("Near {}", at.literal()),
        confidence: SYNTHETIC_CONFIDENCE,
        verified: false,
    }
}

/// Resolves a point (plus optional tags) to an address
pub struct AddressResolver {
    geocoder: Arc<dyn Geocoder>,
    reverse_timeout: Duration,
}

impl AddressResolver {
    pub fn new(geocoder: Arc<dyn Geocoder>, reverse_timeout: Duration) -> Self {
        Self {
            geocoder,
            reverse_timeout,
        }
    }

    /// Run the fallback chain. Failures degrade to lower confidence.
    pub async fn resolve(&self, at: Coordinate, tags: Option<&TagMap>) -> AddressResolution {
        if let Some(address) = tags.and_then(extract_address_from_osm) {
            return AddressResolution {
                address,
                confidence: TAG_CONFIDENCE,
                verified: true,
            };
        }

        match self.reverse_lookup(at).await {
            Ok(resolution) => resolution,
            Err(failure) => {
                debug!("Reverse geocoding failed at {}: {}", at.literal(), failure);
                synthetic(at)
            }
        }
    }

    async fn reverse_lookup(&self, at: Coordinate) -> Result<AddressResolution, LookupFailure> {
        // Throttle wait does not count against the lookup timeout
        self.geocoder.wait_for_slot().await;
        let answer = tokio::time::timeout(self.reverse_timeout, self.geocoder.reverse_geocode(at))
            .await
            .map_err(|_| LookupFailure::Timeout(self.reverse_timeout))??;

        Ok(score_reverse(at, &answer))
    }
}
