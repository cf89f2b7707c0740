//! Viewport query pipeline.
//!
//! QueryCache probe, then GeoCache radius probe, then provider search,
//! normalization and write-back to both caches.

use anyhow::Context;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::{cache_key, GeoCache, QueryCache};
use crate::config::{Config, RetryPolicy, SearchConfig};
use crate::error::{CacheError, ResolveError};
use crate::models::{Coordinate, RawProviderRecord, Resource, ResourceType};
use crate::providers::{
    category_for, retry_on_rate_limit, tag_filters, Geocoder, NominatimClient, OverpassClient,
    OverpassSource, PlacesClient, PlacesSource,
};
use crate::resolve::{NormalizerPolicy, ResourceNormalizer};
use crate::spatial::{radius_degrees, radius_km, viewport_bounds};

/// Inbound viewport query. Fields are optional so absence can be reported.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub lat: Option<f64>,
    #[serde(alias = "lng")]
    pub lon: Option<f64>,
    pub zoom: Option<f64>,
    pub resource_type: Option<String>,
}

/// A request that passed validation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportQuery {
    pub center: Coordinate,
    pub zoom: f64,
    pub resource_type: ResourceType,
}

impl ResolveRequest {
    pub fn new(lat: f64, lon: f64, zoom: f64, resource_type: &str) -> Self {
        Self {
            lat: Some(lat),
            lon: Some(lon),
            zoom: Some(zoom),
            resource_type: Some(resource_type.to_string()),
        }
    }

    pub fn validate(&self, search: &SearchConfig) -> Result<ViewportQuery, ResolveError> {
        let mut missing = Vec::new();
        if self.lat.is_none() {
            missing.push("lat");
        }
        if self.lon.is_none() {
            missing.push("lon");
        }
        if self.zoom.is_none() {
            missing.push("zoom");
        }
        if self.resource_type.is_none() {
            missing.push("resourceType");
        }

        let (Some(lat), Some(lon), Some(zoom), Some(resource_type)) =
            (self.lat, self.lon, self.zoom, self.resource_type.as_deref())
        else {
            return Err(ResolveError::InvalidParameters(format!(
                "missing {}",
                missing.join(", ")
            )));
        };

        let center = Coordinate::new(lat, lon);
        if !center.is_valid() {
            return Err(ResolveError::InvalidParameters(format!(
                "coordinate out of range: {}, {}",
                lat, lon
            )));
        }

        if !zoom.is_finite() || zoom < search.min_zoom || zoom > search.max_zoom {
            return Err(ResolveError::InvalidParameters(format!(
                "zoom must be between {} and {}",
                search.min_zoom, search.max_zoom
            )));
        }

        let resource_type = resource_type
            .parse::<ResourceType>()
            .map_err(|e| ResolveError::InvalidParameters(e.to_string()))?;

        Ok(ViewportQuery {
            center,
            zoom,
            resource_type,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    pub resources: Vec<Resource>,
    pub from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateOutcome {
    pub cleared: bool,
    pub cache_key: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub resources: usize,
    pub queries: usize,
}

/// Entry counts of both caches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub resources: usize,
    pub queries: usize,
}

/// Upstream capabilities used by the service
pub struct Providers {
    pub overpass: Arc<dyn OverpassSource>,
    /// Consulted only when Overpass comes back empty or fails
    pub places: Option<Arc<dyn PlacesSource>>,
    pub geocoder: Arc<dyn Geocoder>,
}

/// Records gathered from the providers for one query
struct ProviderSearch {
    records: Vec<RawProviderRecord>,
    /// False when a provider failed, so the result must not be cached
    complete: bool,
}

pub struct ResourceService {
    db: sled::Db,
    geo_cache: GeoCache,
    query_cache: QueryCache,
    normalizer: ResourceNormalizer,
    overpass: Arc<dyn OverpassSource>,
    places: Option<Arc<dyn PlacesSource>>,
    search: SearchConfig,
    retry: RetryPolicy,
}

impl ResourceService {
    pub fn new(db: sled::Db, config: &Config, providers: Providers) -> Result<Self, CacheError> {
        Ok(Self {
            geo_cache: GeoCache::new(&db, config.cache.resource_ttl())?,
            query_cache: QueryCache::new(&db, config.cache.query_ttl())?,
            normalizer: ResourceNormalizer::new(
                providers.geocoder,
                NormalizerPolicy::from_config(config),
            ),
            overpass: providers.overpass,
            places: providers.places,
            search: config.search.clone(),
            retry: config.retry.clone(),
            db,
        })
    }

    /// Open the cache database and build the HTTP-backed providers
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let db = sled::open(&config.cache.data_dir).with_context(|| {
            format!(
                "Failed to open cache database at {}",
                config.cache.data_dir.display()
            )
        })?;

        let p = &config.providers;
        let overpass = Arc::new(OverpassClient::new(
            &p.overpass_url,
            &p.user_agent,
            p.overpass_timeout_secs,
        )?);
        let geocoder = Arc::new(NominatimClient::new(
            &p.nominatim_url,
            &p.user_agent,
            p.reverse_timeout().max(p.forward_timeout()),
            p.nominatim_requests_per_second,
        )?);

        let places: Option<Arc<dyn PlacesSource>> = match p.places_api_key {
            Some(ref key) => Some(Arc::new(PlacesClient::new(
                &p.places_url,
                key,
                &p.user_agent,
                p.places_timeout_secs,
                p.places_min_radius_m,
                p.places_max_radius_m,
            )?)),
            None => {
                info!("No Places API key configured, Places fallback disabled");
                None
            }
        };

        let service = Self::new(
            db,
            config,
            Providers {
                overpass,
                places,
                geocoder,
            },
        )?;
        Ok(service)
    }

    pub async fn resolve_resources(
        &self,
        request: &ResolveRequest,
    ) -> Result<ResolveResponse, ResolveError> {
        let query = request.validate(&self.search)?;
        let ViewportQuery {
            center,
            zoom,
            resource_type,
        } = query;

        if let Some(hit) = self
            .query_cache
            .get(center.lat, center.lon, zoom, resource_type)?
        {
            info!(
                "Query cache hit for {} ({} resources, {} ms old)",
                cache_key(center.lat, center.lon, zoom, resource_type),
                hit.resources.len(),
                hit.age_ms
            );
            return Ok(ResolveResponse {
                resources: hit.resources,
                from_cache: true,
                cache_age_ms: Some(hit.age_ms),
            });
        }

        let radius = radius_km(zoom, self.search.base_radius_degrees, self.search.km_per_degree);
        let nearby = self.geo_cache.query_near(center, radius, resource_type)?;
        if !nearby.is_empty() && nearby.len() >= self.search.geo_cache_min_hits {
            let now = Utc::now();
            let age_ms = nearby
                .iter()
                .map(|entry| (now - entry.last_updated).num_milliseconds().max(0))
                .max()
                .unwrap_or(0);
            let resources: Vec<Resource> = nearby.into_iter().map(|entry| entry.resource).collect();

            self.query_cache
                .put(center.lat, center.lon, zoom, resource_type, &resources)?;

            info!(
                "Served {} {} resources from the resource cache within {:.2} km",
                resources.len(),
                resource_type,
                radius
            );
            return Ok(ResolveResponse {
                resources,
                from_cache: true,
                cache_age_ms: Some(age_ms),
            });
        }

        let found = self.search_providers(&query).await?;
        let resources = self.normalize_all(&found.records, resource_type).await;

        if found.complete {
            let summary = self.geo_cache.upsert(&resources)?;
            self.query_cache
                .put(center.lat, center.lon, zoom, resource_type, &resources)?;
            debug!(
                "Cached search: {} new, {} updated resources",
                summary.new_count, summary.updated_count
            );
        }

        info!(
            "Resolved {} of {} {} records near {}",
            resources.len(),
            found.records.len(),
            resource_type,
            center.literal()
        );

        Ok(ResolveResponse {
            resources,
            from_cache: false,
            cache_age_ms: None,
        })
    }

    async fn search_providers(&self, query: &ViewportQuery) -> Result<ProviderSearch, ResolveError> {
        let radius_deg = radius_degrees(query.zoom, self.search.base_radius_degrees);
        let bbox = viewport_bounds(query.center, radius_deg);
        let filters = tag_filters(query.resource_type);

        let mut rate_limited = None;
        let mut overpass_succeeded = false;

        match retry_on_rate_limit("overpass", &self.retry, || {
            self.overpass.query_overpass(filters, bbox)
        })
        .await
        {
            Ok(elements) if !elements.is_empty() => {
                return Ok(ProviderSearch {
                    records: elements.into_iter().map(RawProviderRecord::Osm).collect(),
                    complete: true,
                });
            }
            Ok(_) => overpass_succeeded = true,
            Err(e) => {
                warn!("Overpass search failed: {}", e);
                if e.is_rate_limited() {
                    rate_limited = Some("overpass");
                }
            }
        }

        let mut places_attempted = false;
        if let Some(ref places) = self.places {
            places_attempted = true;
            let category = category_for(query.resource_type);
            let radius_m = radius_deg * self.search.km_per_degree * 1000.0;

            match retry_on_rate_limit("places", &self.retry, || {
                places.query_places(query.center, radius_m, &category)
            })
            .await
            {
                Ok(found) => {
                    return Ok(ProviderSearch {
                        records: found.into_iter().map(RawProviderRecord::Places).collect(),
                        complete: true,
                    });
                }
                Err(e) => {
                    warn!("Places search failed: {}", e);
                    if e.is_rate_limited() {
                        rate_limited = Some("places");
                    }
                }
            }
        }

        if overpass_succeeded {
            return Ok(ProviderSearch {
                records: Vec::new(),
                complete: !places_attempted,
            });
        }

        if let Some(provider) = rate_limited {
            return Err(ResolveError::RateLimited { provider });
        }

        Ok(ProviderSearch {
            records: Vec::new(),
            complete: false,
        })
    }

    async fn normalize_all(
        &self,
        records: &[RawProviderRecord],
        resource_type: ResourceType,
    ) -> Vec<Resource> {
        // Collected first so the returned future stays Send
        let pending: Vec<_> = records
            .iter()
            .map(|record| self.normalizer.normalize(record, resource_type))
            .collect();

        let normalized: Vec<Option<Resource>> = stream::iter(pending)
            .buffered(self.search.normalize_concurrency.max(1))
            .collect()
            .await;

        normalized.into_iter().flatten().collect()
    }

    /// Drop the QueryCache entry a request maps to
    pub fn invalidate(&self, request: &ResolveRequest) -> Result<InvalidateOutcome, ResolveError> {
        let query = request.validate(&self.search)?;
        let (lat, lon) = (query.center.lat, query.center.lon);

        let cleared = self
            .query_cache
            .invalidate(lat, lon, query.zoom, query.resource_type)?;

        Ok(InvalidateOutcome {
            cleared,
            cache_key: cache_key(lat, lon, query.zoom, query.resource_type),
        })
    }

    pub fn sweep_expired(&self) -> Result<SweepReport, CacheError> {
        Ok(SweepReport {
            resources: self.geo_cache.sweep_expired()?,
            queries: self.query_cache.sweep_expired()?,
        })
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            resources: self.geo_cache.len(),
            queries: self.query_cache.len(),
        }
    }

    pub fn flush(&self) -> Result<(), CacheError> {
        self.db.flush()?;
        Ok(())
    }

    /// Periodically evict expired entries from both caches
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let interval = interval.max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match self.sweep_expired() {
                    Ok(report) => debug!(
                        "Sweep removed {} resources and {} queries",
                        report.resources, report.queries
                    ),
                    Err(e) => error!("Cache sweep failed: {}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::models::{OsmTagSet, PlaceGeometry, PlaceLocation, RawPlace};
    use crate::testing::{bare_way, node, FakeGeocoder, FakeOverpass, FakePlaces};
    use tempfile::TempDir;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.retry.base_delay_ms = 1;
        config
    }

    fn service(
        overpass: Arc<FakeOverpass>,
        places: Option<Arc<FakePlaces>>,
    ) -> (TempDir, ResourceService) {
        let dir = TempDir::new().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let providers = Providers {
            overpass,
            places: places.map(|p| p as Arc<dyn PlacesSource>),
            geocoder: Arc::new(FakeGeocoder::failing()),
        };
        let service = ResourceService::new(db, &test_config(), providers).unwrap();
        (dir, service)
    }

    fn food_elements() -> Vec<crate::models::RawOsmElement> {
        vec![
            node(
                1,
                40.7128,
                -74.006,
                &[
                    ("name", "Community Food Pantry"),
                    ("amenity", "food_bank"),
                    ("addr:housenumber", "12"),
                    ("addr:street", "Main Street"),
                    ("addr:city", "New York"),
                ],
            ),
            bare_way(2, &[("name", "Soup Kitchen"), ("amenity", "soup_kitchen")]),
        ]
    }

    #[tokio::test]
    async fn test_food_search_then_cache_hit() {
        let overpass = Arc::new(FakeOverpass::returning(food_elements()));
        let (_dir, service) = service(overpass.clone(), None);
        let request = ResolveRequest::new(40.7128, -74.006, 14.0, "food");

        let first = service.resolve_resources(&request).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.cache_age_ms, None);
        assert_eq!(first.resources.len(), 1);
        let pantry = &first.resources[0];
        assert_eq!(pantry.name, "Community Food Pantry");
        assert!(pantry.verified);
        assert!(pantry.confidence >= 0.8);

        let second = service.resolve_resources(&request).await.unwrap();
        assert!(second.from_cache);
        assert!(second.cache_age_ms.unwrap() >= 0);
        assert_eq!(second.resources, first.resources);
        assert_eq!(overpass.count(), 1);
        assert_eq!(service.stats(), CacheStats { resources: 1, queries: 1 });
    }

    #[tokio::test]
    async fn test_resource_cache_serves_nearby_viewport() {
        let overpass = Arc::new(FakeOverpass::returning(food_elements()));
        let (_dir, service) = service(overpass.clone(), None);

        service
            .resolve_resources(&ResolveRequest::new(40.7128, -74.006, 14.0, "food"))
            .await
            .unwrap();

        // Different quantized key, same neighborhood
        let shifted = service
            .resolve_resources(&ResolveRequest::new(40.7135, -74.0065, 14.0, "food"))
            .await
            .unwrap();

        assert!(shifted.from_cache);
        assert_eq!(shifted.resources.len(), 1);
        assert_eq!(overpass.count(), 1);
        assert_eq!(service.stats().queries, 2);
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_is_reported() {
        let script = (0..3)
            .map(|_| Err(ProviderError::RateLimited { provider: "overpass" }))
            .collect();
        let overpass = Arc::new(FakeOverpass::scripted(script, food_elements()));
        let (_dir, service) = service(overpass.clone(), None);

        let result = service
            .resolve_resources(&ResolveRequest::new(40.7128, -74.006, 14.0, "food"))
            .await;

        assert!(matches!(
            result,
            Err(ResolveError::RateLimited { provider: "overpass" })
        ));
        assert_eq!(overpass.count(), 3);
        assert_eq!(service.stats(), CacheStats { resources: 0, queries: 0 });
    }

    #[tokio::test]
    async fn test_failed_search_is_not_cached() {
        let script = vec![Err(ProviderError::Status {
            provider: "overpass",
            status: "504 Gateway Timeout".to_string(),
        })];
        let overpass = Arc::new(FakeOverpass::scripted(script, food_elements()));
        let (_dir, service) = service(overpass.clone(), None);
        let request = ResolveRequest::new(40.7128, -74.006, 14.0, "food");

        let first = service.resolve_resources(&request).await.unwrap();
        assert!(first.resources.is_empty());
        assert_eq!(service.stats().queries, 0);

        let second = service.resolve_resources(&request).await.unwrap();
        assert_eq!(second.resources.len(), 1);
        assert!(!second.from_cache);
        assert_eq!(overpass.count(), 2);
    }

    #[tokio::test]
    async fn test_places_fallback_when_overpass_empty() {
        let overpass = Arc::new(FakeOverpass::returning(Vec::new()));
        let places = Arc::new(FakePlaces::returning(vec![RawPlace {
            place_id: "p1".to_string(),
            name: Some("Neighborhood Legal Aid".to_string()),
            vicinity: Some("1 Court St".to_string()),
            geometry: Some(PlaceGeometry {
                location: PlaceLocation {
                    lat: 40.713,
                    lng: -74.005,
                },
            }),
            types: vec!["lawyer".to_string()],
            formatted_phone_number: Some("555-0100".to_string()),
            website: Some("https://legalaid.example.org".to_string()),
        }]));
        let (_dir, service) = service(overpass.clone(), Some(places.clone()));

        let response = service
            .resolve_resources(&ResolveRequest::new(40.7128, -74.006, 14.0, "legal"))
            .await
            .unwrap();

        assert_eq!(response.resources.len(), 1);
        assert_eq!(response.resources[0].resource_type, ResourceType::Legal);
        assert_eq!(response.resources[0].icon, "⚖️");
        assert_eq!(
            response.resources[0].osm_tags.addr_street.as_deref(),
            Some("1 Court St")
        );
        assert_eq!(overpass.count(), 1);
        assert_eq!(places.count(), 1);
    }

    #[tokio::test]
    async fn test_empty_overpass_result_is_cached() {
        let overpass = Arc::new(FakeOverpass::returning(Vec::new()));
        let (_dir, service) = service(overpass.clone(), None);
        let request = ResolveRequest::new(10.0, 10.0, 12.0, "shelter");

        let first = service.resolve_resources(&request).await.unwrap();
        assert!(first.resources.is_empty());

        let second = service.resolve_resources(&request).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(overpass.count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_parameters_are_rejected() {
        let overpass = Arc::new(FakeOverpass::returning(food_elements()));
        let (_dir, service) = service(overpass.clone(), None);

        let missing = ResolveRequest {
            lat: None,
            ..ResolveRequest::new(0.0, 0.0, 14.0, "food")
        };
        let unknown = ResolveRequest::new(40.0, -74.0, 14.0, "parking");
        let out_of_range = ResolveRequest::new(91.0, -74.0, 14.0, "food");
        let bad_zoom = ResolveRequest::new(40.0, -74.0, 30.0, "food");

        for request in [missing, unknown, out_of_range, bad_zoom] {
            let result = service.resolve_resources(&request).await;
            assert!(
                matches!(result, Err(ResolveError::InvalidParameters(_))),
                "{:?}",
                request
            );
        }
        assert_eq!(overpass.count(), 0);
    }

    #[test]
    fn test_zero_coordinates_are_not_missing() {
        let request = ResolveRequest::new(0.0, 0.0, 0.0, "Food");
        let query = request.validate(&SearchConfig::default()).unwrap();
        assert_eq!(query.center, Coordinate::new(0.0, 0.0));
        assert_eq!(query.resource_type, ResourceType::Food);
    }

    #[test]
    fn test_request_accepts_lng_alias() {
        let request: ResolveRequest = serde_json::from_str(
            r#"{"lat": 40.7, "lng": -74.0, "zoom": 13, "resourceType": "healthcare"}"#,
        )
        .unwrap();
        assert_eq!(request.lon, Some(-74.0));
        assert_eq!(request.resource_type.as_deref(), Some("healthcare"));
    }

    #[tokio::test]
    async fn test_invalidate_and_sweep() {
        let overpass = Arc::new(FakeOverpass::returning(food_elements()));
        let (_dir, service) = service(overpass.clone(), None);
        let request = ResolveRequest::new(40.7128, -74.006, 14.0, "food");
        service.resolve_resources(&request).await.unwrap();

        let outcome = service.invalidate(&request).unwrap();
        assert_eq!(
            outcome,
            InvalidateOutcome {
                cleared: true,
                cache_key: "food_40.713_-74.006_14".to_string(),
            }
        );
        assert!(!service.invalidate(&request).unwrap().cleared);

        // Nothing is old enough to expire yet
        assert_eq!(service.sweep_expired().unwrap(), SweepReport::default());
        assert_eq!(service.stats().resources, 1);
    }

    #[tokio::test]
    async fn test_places_rate_limit_after_overpass_failure() {
        let script = vec![Err(ProviderError::Status {
            provider: "overpass",
            status: "502 Bad Gateway".to_string(),
        })];
        let overpass = Arc::new(FakeOverpass::scripted(script, Vec::new()));
        let places = Arc::new(FakePlaces::rate_limited());
        let (_dir, service) = service(overpass.clone(), Some(places.clone()));

        let result = service
            .resolve_resources(&ResolveRequest::new(40.7128, -74.006, 14.0, "legal"))
            .await;

        assert!(matches!(
            result,
            Err(ResolveError::RateLimited { provider: "places" })
        ));
        assert_eq!(overpass.count(), 1);
        assert_eq!(places.count(), 3);
        assert_eq!(service.stats().queries, 0);
    }

    #[tokio::test]
    async fn test_empty_overpass_with_failed_places_is_not_cached() {
        let overpass = Arc::new(FakeOverpass::returning(Vec::new()));
        let places = Arc::new(FakePlaces::rate_limited());
        let (_dir, service) = service(overpass.clone(), Some(places.clone()));
        let request = ResolveRequest::new(40.7128, -74.006, 14.0, "shelter");

        let first = service.resolve_resources(&request).await.unwrap();
        assert!(first.resources.is_empty());
        assert!(!first.from_cache);
        assert_eq!(service.stats(), CacheStats { resources: 0, queries: 0 });

        let second = service.resolve_resources(&request).await.unwrap();
        assert!(!second.from_cache);
        assert_eq!(overpass.count(), 2);
        assert_eq!(places.count(), 6);
    }

    fn assert_send<T: Send>(_: T) {}

    #[test]
    fn test_resolve_future_is_send() {
        let overpass = Arc::new(FakeOverpass::returning(food_elements()));
        let (_dir, service) = service(overpass, None);
        let request = ResolveRequest::new(40.7128, -74.006, 14.0, "food");

        assert_send(service.resolve_resources(&request));
    }

    #[test]
    fn test_response_wire_shape() {
        let response = ResolveResponse {
            resources: vec![Resource {
                resource_type: ResourceType::Food,
                name: "Pantry".to_string(),
                color: "#22c55e".to_string(),
                icon: "🍽️".to_string(),
                coordinate: Coordinate::new(1.0, 2.0),
                address: None,
                verified: false,
                confidence: 0.5,
                osm_tags: OsmTagSet::default(),
            }],
            from_cache: true,
            cache_age_ms: Some(12),
        };

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["fromCache"], true);
        assert_eq!(value["cacheAgeMs"], 12);
        assert_eq!(value["resources"][0]["lon"], 2.0);
    }
}
