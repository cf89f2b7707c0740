//! Trust score for a normalized record.

use crate::models::{AddressResolution, OsmTagSet, RawProviderRecord};

pub const MIN_SCORE: f64 = 0.2;
pub const MAX_SCORE: f64 = 1.0;
const BASE_FLOOR: f64 = 0.3;

/// Scores provenance, tag completeness and naming quality
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceScorer;

impl ConfidenceScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score in [0.2, 1.0]
    pub fn score(
        &self,
        record: &RawProviderRecord,
        address: &AddressResolution,
        tags: &OsmTagSet,
    ) -> f64 {
        let mut score = address.confidence.max(BASE_FLOOR);

        match record.name() {
            Some(name) => {
                let len = name.chars().count();
                if len > 3 {
                    score += 0.1;
                } else if len < 3 {
                    score -= 0.1;
                }
            }
            None => score -= 0.05,
        }

        let completeness = [
            tags.phone.is_some(),
            tags.website.is_some(),
            tags.addr_street.is_some(),
            tags.opening_hours.is_some(),
        ];
        score += 0.1 * completeness.iter().filter(|present| **present).count() as f64;

        score.clamp(MIN_SCORE, MAX_SCORE)
    }
}
