//! Nominatim reverse and forward geocoding.

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{Geocoder, ReverseGeocode};
use crate::error::ProviderError;
use crate::models::Coordinate;

const PROVIDER: &str = "nominatim";

type Limiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
}

/// Client for a Nominatim instance. Throttling to the instance's usage policy
/// happens in `wait_for_slot`, not inside the lookups.
pub struct NominatimClient {
    client: Client,
    base_url: String,
    limiter: Limiter,
}

impl NominatimClient {
    pub fn new(
        base_url: &str,
        user_agent: &str,
        timeout: Duration,
        requests_per_second: u32,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, ProviderError> {
        Url::parse_with_params(&format!("{}/{}", self.base_url, path), params)
            .map_err(|e| ProviderError::Malformed(format!("invalid nominatim url: {}", e)))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, ProviderError> {
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

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl Geocoder for NominatimClient {
    async fn wait_for_slot(&self) {
        self.limiter.until_ready().await;
    }

    async fn reverse_geocode(&self, at: Coordinate) -> Result<ReverseGeocode, ProviderError> {
        let lat = at.lat.to_string();
        let lon = at.lon.to_string();
        let url = self.endpoint(
            "reverse",
            &[
                ("format", "json"),
                ("lat", &lat),
                ("lon", &lon),
                ("zoom", "16"),
                ("addressdetails", "1"),
            ],
        )?;

        self.get_json(url).await
    }

    async fn forward_geocode(&self, address: &str) -> Result<Option<Coordinate>, ProviderError> {
        let url = self.endpoint("search", &[("format", "json"), ("q", address), ("limit", "1")])?;
        let hits: Vec<SearchHit> = self.get_json(url).await?;

        let Some(hit) = hits.first() else {
            debug!("No forward geocoding match for '{}'", address);
            return Ok(None);
        };

        let lat = hit
            .lat
            .parse::<f64>()
            .map_err(|e| ProviderError::Malformed(format!("bad latitude: {}", e)))?;
        let lon = hit
            .lon
            .parse::<f64>()
            .map_err(|e| ProviderError::Malformed(format!("bad longitude: {}", e)))?;

        Ok(Some(Coordinate::new(lat, lon)))
    }
}
