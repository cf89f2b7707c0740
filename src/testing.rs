//! In-memory provider fakes shared by unit tests.

use async_trait::async_trait;
use geo::Rect;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::ProviderError;
use crate::models::{Coordinate, OsmType, RawOsmElement, RawPlace, TagMap};
use crate::providers::{
    Geocoder, OverpassSource, PlaceCategory, PlacesSource, ReverseAddress, ReverseGeocode,
};

/// Scripted reverse-geocoding behavior
#[derive(Clone)]
pub(crate) enum ReverseReply {
    Answer(ReverseGeocode),
    Fail,
    Hang,
    Panic,
}

pub(crate) struct FakeGeocoder {
    reverse: ReverseReply,
    forward: Option<Coordinate>,
    slot_delay: Duration,
    pub slot_waits: AtomicUsize,
    pub reverse_calls: AtomicUsize,
    pub forward_calls: AtomicUsize,
}

impl FakeGeocoder {
    pub fn new(reverse: ReverseReply, forward: Option<Coordinate>) -> Self {
        Self {
            reverse,
            forward,
            slot_delay: Duration::ZERO,
            slot_waits: AtomicUsize::new(0),
            reverse_calls: AtomicUsize::new(0),
            forward_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self::new(ReverseReply::Fail, None)
    }

    /// Throttle wait applied before every lookup
    pub fn with_slot_delay(mut self, delay: Duration) -> Self {
        self.slot_delay = delay;
        self
    }

    pub fn slot_count(&self) -> usize {
        self.slot_waits.load(Ordering::SeqCst)
    }

    pub fn reverse_count(&self) -> usize {
        self.reverse_calls.load(Ordering::SeqCst)
    }

    pub fn forward_count(&self) -> usize {
        self.forward_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn wait_for_slot(&self) {
        self.slot_waits.fetch_add(1, Ordering::SeqCst);
        if !self.slot_delay.is_zero() {
            tokio::time::sleep(self.slot_delay).await;
        }
    }

    async fn reverse_geocode(&self, _at: Coordinate) -> Result<ReverseGeocode, ProviderError> {
        self.reverse_calls.fetch_add(1, Ordering::SeqCst);
        match self.reverse.clone() {
            ReverseReply::Answer(answer) => Ok(answer),
            ReverseReply::Fail => Err(ProviderError::Status {
                provider: "fake",
                status: "503 Service Unavailable".to_string(),
            }),
            ReverseReply::Hang => std::future::pending().await,
            ReverseReply::Panic => panic!("geocoder backend crashed"),
        }
    }

    async fn forward_geocode(&self, _address: &str) -> Result<Option<Coordinate>, ProviderError> {
        self.forward_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.forward)
    }
}

/// A full reverse-geocoding hit: house number, road, city, amenity class
pub(crate) fn rich_reverse_answer() -> ReverseGeocode {
    ReverseGeocode {
        display_name: Some("12, Main Street, Springfield, USA".to_string()),
        address: Some(ReverseAddress {
            house_number: Some("12".to_string()),
            road: Some("Main Street".to_string()),
            city: Some("Springfield".to_string()),
            town: None,
            village: None,
        }),
        place_type: Some("social_facility".to_string()),
        class: Some("amenity".to_string()),
    }
}

/// Overpass fake replaying a fixed outcome and counting calls
pub(crate) struct FakeOverpass {
    outcome: Mutex<Vec<Result<Vec<RawOsmElement>, ProviderError>>>,
    fallback: Vec<RawOsmElement>,
    pub calls: AtomicUsize,
}

impl FakeOverpass {
    pub fn returning(elements: Vec<RawOsmElement>) -> Self {
        Self {
            outcome: Mutex::new(Vec::new()),
            fallback: elements,
            calls: AtomicUsize::new(0),
        }
    }

    /// Replay `script` in order, then fall back to `elements`
    pub fn scripted(
        script: Vec<Result<Vec<RawOsmElement>, ProviderError>>,
        elements: Vec<RawOsmElement>,
    ) -> Self {
        let mut script = script;
        script.reverse();
        Self {
            outcome: Mutex::new(script),
            fallback: elements,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OverpassSource for FakeOverpass {
    async fn query_overpass(
        &self,
        _tag_filters: &[&str],
        _bbox: Rect<f64>,
    ) -> Result<Vec<RawOsmElement>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.outcome.lock().unwrap().pop();
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

pub(crate) struct FakePlaces {
    places: Vec<RawPlace>,
    rate_limited: bool,
    pub calls: AtomicUsize,
}

impl FakePlaces {
    pub fn returning(places: Vec<RawPlace>) -> Self {
        Self {
            places,
            rate_limited: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn rate_limited() -> Self {
        Self {
            places: Vec::new(),
            rate_limited: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlacesSource for FakePlaces {
    async fn query_places(
        &self,
        _center: Coordinate,
        _radius_m: f64,
        _category: &PlaceCategory,
    ) -> Result<Vec<RawPlace>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.rate_limited {
            return Err(ProviderError::RateLimited { provider: "places" });
        }
        Ok(self.places.clone())
    }
}

pub(crate) fn tags(pairs: &[(&str, &str)]) -> TagMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub(crate) fn node(id: i64, lat: f64, lon: f64, pairs: &[(&str, &str)]) -> RawOsmElement {
    RawOsmElement {
        osm_type: OsmType::Node,
        id,
        lat: Some(lat),
        lon: Some(lon),
        center: None,
        tags: tags(pairs),
    }
}

pub(crate) fn bare_way(id: i64, pairs: &[(&str, &str)]) -> RawOsmElement {
    RawOsmElement {
        osm_type: OsmType::Way,
        id,
        lat: None,
        lon: None,
        center: None,
        tags: tags(pairs),
    }
}
