//! Upstream geodata providers.
//!
//! The pipeline only talks to providers through the traits below, so the
//! reqwest-backed clients can be swapped for in-memory fakes in tests.

mod nominatim;
mod overpass;
mod places;
mod retry;

use async_trait::async_trait;
use geo::Rect;
use serde::Deserialize;

use crate::error::ProviderError;
use crate::models::{Coordinate, RawOsmElement, RawPlace};

pub use nominatim::NominatimClient;
pub use overpass::{build_query, tag_filters, OverpassClient};
pub use places::{category_for, clamp_radius, is_commercial_lodging, PlaceCategory, PlacesClient};
pub use retry::retry_on_rate_limit;

/// Structured address block of a reverse-geocoding answer
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReverseAddress {
    #[serde(default)]
    pub house_number: Option<String>,
    #[serde(default)]
    pub road: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub town: Option<String>,
    #[serde(default)]
    pub village: Option<String>,
}

impl ReverseAddress {
    pub fn has_settlement(&self) -> bool {
        self.city.is_some() || self.town.is_some() || self.village.is_some()
    }
}

/// Reverse-geocoding answer
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReverseGeocode {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub address: Option<ReverseAddress>,
    #[serde(default, rename = "type")]
    pub place_type: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
}

/// Tag-filtered element search over a bounding box
#[async_trait]
pub trait OverpassSource: Send + Sync {
    async fn query_overpass(
        &self,
        tag_filters: &[&str],
        bbox: Rect<f64>,
    ) -> Result<Vec<RawOsmElement>, ProviderError>;
}

/// Commercial places search around a point
#[async_trait]
pub trait PlacesSource: Send + Sync {
    async fn query_places(
        &self,
        center: Coordinate,
        radius_m: f64,
        category: &PlaceCategory,
    ) -> Result<Vec<RawPlace>, ProviderError>;
}

/// Address <-> coordinate lookups.
///
/// Callers await `wait_for_slot` once before each lookup and keep that wait
/// outside any lookup timeout.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolves when the backend's usage policy allows one more request
    async fn wait_for_slot(&self) {}

    async fn reverse_geocode(&self, at: Coordinate) -> Result<ReverseGeocode, ProviderError>;

    async fn forward_geocode(&self, address: &str) -> Result<Option<Coordinate>, ProviderError>;
}
