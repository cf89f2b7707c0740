//! Overpass API client.

use async_trait::async_trait;
use geo::Rect;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use super::OverpassSource;
use crate::error::ProviderError;
use crate::models::{RawOsmElement, ResourceType};

const PROVIDER: &str = "overpass";

const LEGAL_FILTERS: &[&str] = &[
    r#"["office"="lawyer"]"#,
    r#"["office"="legal"]"#,
    r#"["amenity"="courthouse"]"#,
    r#"["office"="notary"]"#,
    r#"["amenity"="legal_aid"]"#,
    r#"["office"="solicitor"]"#,
    r#"["office"="barrister"]"#,
    r#"["amenity"="public_building"]["public_building"="legal"]"#,
    r#"["shop"="legal"]"#,
];

const SHELTER_FILTERS: &[&str] = &[r#"["amenity"~"^(shelter|social_facility)$"]"#];

const HEALTHCARE_FILTERS: &[&str] = &[r#"["amenity"~"^(hospital|clinic|doctors|pharmacy)$"]"#];

const FOOD_FILTERS: &[&str] = &[
    r#"["amenity"="food_bank"]"#,
    r#"["amenity"="soup_kitchen"]"#,
    r#"["amenity"="community_centre"]["community_centre:for"~"food"]"#,
    r#"["social_facility"="food_bank"]"#,
    r#"["social_facility"="soup_kitchen"]"#,
    r#"["amenity"="restaurant"]["cuisine"="free"]"#,
    r#"["amenity"="social_facility"]["social_facility:for"~"food"]"#,
];

/// Overpass predicate sets for a resource type (any one predicate matches)
pub fn tag_filters(resource_type: ResourceType) -> &'static [&'static str] {
    match resource_type {
        ResourceType::Legal => LEGAL_FILTERS,
        ResourceType::Shelter => SHELTER_FILTERS,
        ResourceType::Healthcare => HEALTHCARE_FILTERS,
        ResourceType::Food => FOOD_FILTERS,
    }
}

/// Build an Overpass QL union over nodes, ways and relations.
///
/// `out center` makes Overpass emit a centroid for ways and relations.
pub fn build_query(tag_filters: &[&str], bbox: Rect<f64>, timeout_secs: u64) -> String {
    let area = format!(
        "({},{},{},{})",
        bbox.min().y,
        bbox.min().x,
        bbox.max().y,
        bbox.max().x
    );

    let statements: String = tag_filters
        .iter()
        .map(|filter| format!("nwr{}{};", filter, area))
        .collect();

    format!(
        "[out:json][timeout:{}];({});out center tags;",
        timeout_secs, statements
    )
}

/// Overpass client with its own request timeout
pub struct OverpassClient {
    client: Client,
    url: String,
    timeout_secs: u64,
}

impl OverpassClient {
    pub fn new(url: &str, user_agent: &str, timeout_secs: u64) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            timeout_secs,
        })
    }
}

#[async_trait]
impl OverpassSource for OverpassClient {
    async fn query_overpass(
        &self,
        tag_filters: &[&str],
        bbox: Rect<f64>,
    ) -> Result<Vec<RawOsmElement>, ProviderError> {
        let query = build_query(tag_filters, bbox, self.timeout_secs);
        debug!("Overpass query: {}", query);

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "text/plain")
            .body(query)
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

        let body = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let elements = body["elements"]
            .as_array()
            .ok_or_else(|| ProviderError::Malformed("missing elements array".to_string()))?;

        // Skip individual elements that don't parse rather than failing the batch
        let parsed: Vec<RawOsmElement> = elements
            .iter()
            .filter_map(|el| match serde_json::from_value(el.clone()) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!("Skipping unparseable Overpass element: {}", e);
                    None
                }
            })
            .collect();

        debug!("Overpass returned {} elements", parsed.len());
        Ok(parsed)
    }
}
