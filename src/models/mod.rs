//! Core data models for resource resolution.

pub mod provider;
pub mod resource;

pub use provider::{
    OsmCenter, OsmType, PlaceGeometry, PlaceLocation, RawOsmElement, RawPlace,
    RawProviderRecord, TagMap,
};
pub use resource::{
    AddressResolution, Coordinate, OsmTagSet, Resource, ResourceType, Style,
    UnknownResourceType,
};
