//! Canonical resource record produced by normalization and stored in the caches.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::provider::TagMap;

/// Category of assistance a resource provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// Legal aid, lawyers, courthouses
    Legal,
    /// Shelters and social facilities
    Shelter,
    /// Hospitals, clinics, pharmacies
    Healthcare,
    /// Food banks and soup kitchens
    Food,
}

impl ResourceType {
    /// All resource types in display order
    pub fn all() -> &'static [ResourceType] {
        &[
            ResourceType::Legal,
            ResourceType::Shelter,
            ResourceType::Healthcare,
            ResourceType::Food,
        ]
    }

    /// Wire name, also used in cache keys and index rows
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Legal => "legal",
            ResourceType::Shelter => "shelter",
            ResourceType::Healthcare => "healthcare",
            ResourceType::Food => "food",
        }
    }

    /// Capitalized label used when synthesizing names
    pub fn label(&self) -> &'static str {
        match self {
            ResourceType::Legal => "Legal",
            ResourceType::Shelter => "Shelter",
            ResourceType::Healthcare => "Healthcare",
            ResourceType::Food => "Food",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown resource type: {0}")]
pub struct UnknownResourceType(pub String);

impl FromStr for ResourceType {
    type Err = UnknownResourceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legal" => Ok(ResourceType::Legal),
            "shelter" => Ok(ResourceType::Shelter),
            "healthcare" => Ok(ResourceType::Healthcare),
            "food" => Ok(ResourceType::Food),
            _ => Err(UnknownResourceType(s.to_string())),
        }
    }
}

/// Geographic point (lat/lon, WGS84)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Finite and inside the WGS84 range
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Four-decimal literal used by the synthetic address fallbacks
    pub fn literal(&self) -> String {
        format!("{:.4}, {:.4}", self.lat, self.lon)
    }
}

/// Normalized subset of provider tags kept on every resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsmTagSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opening_hours: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr_street: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr_city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr_postcode: Option<String>,
}

impl OsmTagSet {
    /// Extract the tag subset, preferring plain keys over `contact:*` variants
    pub fn from_tags(tags: &TagMap) -> Self {
        let get = |key: &str| {
            tags.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        Self {
            phone: get("phone").or_else(|| get("contact:phone")),
            website: get("website").or_else(|| get("contact:website")),
            opening_hours: get("opening_hours"),
            addr_street: get("addr:street"),
            addr_city: get("addr:city"),
            addr_postcode: get("addr:postcode"),
        }
    }
}

/// Result of the address fallback chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressResolution {
    pub address: String,
    /// Resolution confidence in [0, 1]
    pub confidence: f64,
    pub verified: bool,
}

/// Marker color and icon attached to a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Style {
    pub color: String,
    pub icon: String,
}

impl Style {
    pub fn new(color: &str, icon: &str) -> Self {
        Self {
            color: color.to_string(),
            icon: icon.to_string(),
        }
    }
}

/// Normalized assistance-service listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub name: String,
    pub color: String,
    pub icon: String,
    #[serde(flatten)]
    pub coordinate: Coordinate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub verified: bool,
    pub confidence: f64,
    #[serde(default)]
    pub osm_tags: OsmTagSet,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_validity() {
        assert!(Coordinate::new(40.7128, -74.006).is_valid());
        assert!(Coordinate::new(-90.0, 180.0).is_valid());
        assert!(!Coordinate::new(90.5, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, -180.1).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, f64::INFINITY).is_valid());
    }

    #[test]
    fn test_resource_type_parse() {
        assert_eq!("food".parse::<ResourceType>(), Ok(ResourceType::Food));
        assert_eq!(" Legal ".parse::<ResourceType>(), Ok(ResourceType::Legal));
        assert!("parking".parse::<ResourceType>().is_err());
    }

    #[test]
    fn test_tag_set_prefers_plain_keys() {
        let mut tags = TagMap::new();
        tags.insert("phone".into(), "+1 555 0100".into());
        tags.insert("contact:phone".into(), "+1 555 0199".into());
        tags.insert("contact:website".into(), "https://example.org".into());
        tags.insert("addr:street".into(), "  ".into());

        let set = OsmTagSet::from_tags(&tags);
        assert_eq!(set.phone.as_deref(), Some("+1 555 0100"));
        assert_eq!(set.website.as_deref(), Some("https://example.org"));
        assert_eq!(set.addr_street, None);
    }

    #[test]
    fn test_resource_wire_shape() {
        let resource = Resource {
            resource_type: ResourceType::Food,
            name: "Community Pantry".to_string(),
            color: "#22c55e".to_string(),
            icon: "🍽️".to_string(),
            coordinate: Coordinate::new(40.7128, -74.006),
            address: None,
            verified: false,
            confidence: 0.5,
            osm_tags: OsmTagSet::default(),
        };

        let value = serde_json::to_value(&resource).unwrap();
        assert_eq!(value["type"], "food");
        assert_eq!(value["lat"], 40.7128);
        assert!(value.get("osmTags").is_some());
        assert!(value.get("address").is_none());
    }
}
