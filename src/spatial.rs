//! Distance and viewport radius helpers.
//!
//! The haversine implementation is written out instead of using
//! `geo::Haversine` because cached results must reproduce distances computed
//! with an Earth radius of exactly 6371 km.

use geo::{coord, Rect};

use crate::models::Coordinate;

/// Earth radius used for all great-circle distances
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres
pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Search radius in degrees for a zoom level: `base * 2^(14 - zoom)`
pub fn radius_degrees(zoom: f64, base_radius: f64) -> f64 {
    base_radius * 2f64.powf(14.0 - zoom)
}

/// Search radius in kilometres using a flat km-per-degree approximation
pub fn radius_km(zoom: f64, base_radius: f64, km_per_degree: f64) -> f64 {
    radius_degrees(zoom, base_radius) * km_per_degree
}

/// Square viewport around a center, clipped to the valid coordinate range.
///
/// The rect's x axis is longitude and y axis latitude, matching `geo`.
pub fn viewport_bounds(center: Coordinate, radius_deg: f64) -> Rect<f64> {
    let south = (center.lat - radius_deg).max(-90.0);
    let north = (center.lat + radius_deg).min(90.0);
    let west = (center.lon - radius_deg).max(-180.0);
    let east = (center.lon + radius_deg).min(180.0);

    Rect::new(coord! { x: west, y: south }, coord! { x: east, y: north })
}
