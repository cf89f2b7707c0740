//! Raw records as returned by the upstream geodata providers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Coordinate;

/// Free-form provider tags (OSM `key=value` pairs)
pub type TagMap = BTreeMap<String, String>;

/// Type of OSM object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsmType {
    Node,
    Way,
    Relation,
}

impl std::fmt::Display for OsmType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsmType::Node => write!(f, "node"),
            OsmType::Way => write!(f, "way"),
            OsmType::Relation => write!(f, "relation"),
        }
    }
}

/// Center point emitted by Overpass `out center` for ways and relations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OsmCenter {
    pub lat: f64,
    pub lon: f64,
}

/// Element of an Overpass JSON response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOsmElement {
    #[serde(rename = "type")]
    pub osm_type: OsmType,
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<OsmCenter>,
    #[serde(default)]
    pub tags: TagMap,
}

impl RawOsmElement {
    /// "{osm_type}/{id}", used in log lines
    pub fn source_id(&self) -> String {
        format!("{}/{}", self.osm_type, self.id)
    }

    /// Direct coordinate of a point-type element
    pub fn point(&self) -> Option<Coordinate> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)),
            _ => None,
        }
    }

    /// Only one of `lat`/`lon` present
    pub fn has_partial_point(&self) -> bool {
        self.lat.is_some() != self.lon.is_some()
    }

    /// Centroid provided for area-type elements
    pub fn centroid(&self) -> Option<Coordinate> {
        self.center.map(|c| Coordinate::new(c.lat, c.lon))
    }
}

/// Location block of a Places result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaceLocation {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaceGeometry {
    pub location: PlaceLocation,
}

/// Result of a Places nearby search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPlace {
    pub place_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub vicinity: Option<String>,
    #[serde(default)]
    pub geometry: Option<PlaceGeometry>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub formatted_phone_number: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

/// A record from either provider, consumed once by the normalizer
#[derive(Debug, Clone, PartialEq)]
pub enum RawProviderRecord {
    Osm(RawOsmElement),
    Places(RawPlace),
}

impl RawProviderRecord {
    pub fn source_id(&self) -> String {
        match self {
            RawProviderRecord::Osm(el) => el.source_id(),
            RawProviderRecord::Places(place) => format!("places/{}", place.place_id),
        }
    }

    /// Provider-supplied name, if any and non-blank
    pub fn name(&self) -> Option<&str> {
        let name = match self {
            RawProviderRecord::Osm(el) => el.tags.get("name").map(String::as_str),
            RawProviderRecord::Places(place) => place.name.as_deref(),
        };
        name.map(str::trim).filter(|n| !n.is_empty())
    }

    /// Tags in OSM vocabulary. Places results are mapped onto the same keys.
    pub fn tags(&self) -> TagMap {
        match self {
            RawProviderRecord::Osm(el) => el.tags.clone(),
            RawProviderRecord::Places(place) => {
                let mut tags = TagMap::new();
                if let Some(ref name) = place.name {
                    tags.insert("name".to_string(), name.clone());
                }
                // Places only gives a short "street, locality" label
                if let Some(vicinity) = place.vicinity.as_deref().map(str::trim) {
                    if !vicinity.is_empty() {
                        tags.insert("addr:street".to_string(), vicinity.to_string());
                    }
                }
                if let Some(ref phone) = place.formatted_phone_number {
                    tags.insert("phone".to_string(), phone.clone());
                }
                if let Some(ref website) = place.website {
                    tags.insert("website".to_string(), website.clone());
                }
                tags
            }
        }
    }

    /// Direct coordinate: node position, way/relation center or Places location
    pub fn coordinate(&self) -> Option<Coordinate> {
        match self {
            RawProviderRecord::Osm(el) => el.point().or_else(|| el.centroid()),
            RawProviderRecord::Places(place) => place
                .geometry
                .map(|g| Coordinate::new(g.location.lat, g.location.lng)),
        }
    }
}
