//! Data fusion: provider records to scored, addressed resources.

pub mod address;
pub mod confidence;
pub mod normalizer;

pub use address::{extract_address_from_osm, generate_basic_address, AddressResolver};
pub use confidence::ConfidenceScorer;
pub use normalizer::{NormalizerPolicy, ResourceNormalizer};
