//! Google Places nearby-search client.

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::PlacesSource;
use crate::error::ProviderError;
use crate::models::{Coordinate, RawPlace, ResourceType};

const PROVIDER: &str = "places";

static LODGING_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(hotel|motel|inn|resort|hostel|suites|bed\s+(and|&)\s+breakfast)\b")
        .expect("lodging pattern is valid")
});

static SHELTER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(shelter|mission|refuge)\b").expect("shelter pattern is valid")
});

/// Places search parameters for a resource type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceCategory {
    pub place_type: Option<&'static str>,
    pub keyword: &'static str,
    /// Drop hotels and similar false positives from the results
    pub exclude_lodging: bool,
}

pub fn category_for(resource_type: ResourceType) -> PlaceCategory {
    match resource_type {
        ResourceType::Legal => PlaceCategory {
            place_type: Some("lawyer"),
            keyword: "legal aid",
            exclude_lodging: false,
        },
        ResourceType::Shelter => PlaceCategory {
            place_type: None,
            keyword: "homeless shelter",
            exclude_lodging: true,
        },
        ResourceType::Healthcare => PlaceCategory {
            place_type: Some("doctor"),
            keyword: "clinic",
            exclude_lodging: false,
        },
        ResourceType::Food => PlaceCategory {
            place_type: None,
            keyword: "food bank",
            exclude_lodging: false,
        },
    }
}

/// Clamp a search radius to the provider's accepted range
pub fn clamp_radius(radius_m: f64, min_m: f64, max_m: f64) -> f64 {
    radius_m.clamp(min_m, max_m)
}

/// Commercial lodging that a shelter search should not return.
///
/// A name mentioning shelter, mission or refuge always passes.
pub fn is_commercial_lodging(place: &RawPlace) -> bool {
    let name = place.name.as_deref().unwrap_or("");
    if SHELTER_NAME.is_match(name) {
        return false;
    }

    LODGING_NAME.is_match(name) || place.types.iter().any(|t| t == "lodging")
}

#[derive(Debug, Deserialize)]
struct NearbySearchResponse {
    #[serde(default)]
    results: Vec<RawPlace>,
    status: String,
}

pub struct PlacesClient {
    client: Client,
    url: String,
    api_key: String,
    min_radius_m: f64,
    max_radius_m: f64,
}

impl PlacesClient {
    pub fn new(
        url: &str,
        api_key: &str,
        user_agent: &str,
        timeout_secs: u64,
        min_radius_m: f64,
        max_radius_m: f64,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            api_key: api_key.to_string(),
            min_radius_m,
            max_radius_m,
        })
    }

    fn request_url(
        &self,
        center: Coordinate,
        radius_m: f64,
        category: &PlaceCategory,
    ) -> Result<Url, ProviderError> {
        let location = format!("{},{}", center.lat, center.lon);
        let radius = format!("{:.0}", clamp_radius(radius_m, self.min_radius_m, self.max_radius_m));

        let mut params = vec![
            ("location", location.as_str()),
            ("radius", radius.as_str()),
            ("keyword", category.keyword),
            ("key", self.api_key.as_str()),
        ];
        if let Some(place_type) = category.place_type {
            params.push(("type", place_type));
        }

        Url::parse_with_params(&self.url, &params)
            .map_err(|e| ProviderError::Malformed(format!("invalid places url: {}", e)))
    }
}

#[async_trait]
impl PlacesSource for PlacesClient {
    async fn query_places(
        &self,
        center: Coordinate,
        radius_m: f64,
        category: &PlaceCategory,
    ) -> Result<Vec<RawPlace>, ProviderError> {
        let url = self.request_url(center, radius_m, category)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::from_request(PROVIDER, e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited { provider: PROVIDER });
        }
        if !status.is_success() {
            return Err(ProviderError::Status {
                provider: PROVIDER,
                status: status.to_string(),
            });
        }

        let body: NearbySearchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        match body.status.as_str() {
            "OK" | "ZERO_RESULTS" => {}
            "OVER_QUERY_LIMIT" => return Err(ProviderError::RateLimited { provider: PROVIDER }),
            other => {
                return Err(ProviderError::Status {
                    provider: PROVIDER,
                    status: other.to_string(),
                })
            }
        }

        let total = body.results.len();
        let results: Vec<RawPlace> = body
            .results
            .into_iter()
            .filter(|place| !(category.exclude_lodging && is_commercial_lodging(place)))
            .collect();

        debug!(
            "Places returned {} results ({} kept after filtering)",
            total,
            results.len()
        );
        Ok(results)
    }
}
