//! Completeness score over independent predicates.

use agenda_core::{
    present, GeoPoint, NormalizedDateRange, PricingInfo, QualityReason, QualityReport,
    DEFAULT_CATEGORY,
};

use crate::rules::ScoringWeights;

/// Everything the scorer looks at, borrowed from an enrichment in progress.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub category: &'a str,
    pub geo: Option<&'a GeoPoint>,
    pub dates: &'a NormalizedDateRange,
    pub skills: &'a [String],
    pub pricing: &'a PricingInfo,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QualityScorer {
    weights: ScoringWeights,
}

impl QualityScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn score(&self, inputs: &ScoreInputs<'_>) -> QualityReport {
        let w = &self.weights;
        let checks = [
            (present(inputs.title).is_some(), QualityReason::Title, w.title),
            (
                present(inputs.description).is_some(),
                QualityReason::Description,
                w.description,
            ),
            (
                inputs.category != DEFAULT_CATEGORY,
                QualityReason::Categorized,
                w.categorized,
            ),
            (inputs.geo.is_some(), QualityReason::Geocoded, w.geocoded),
            (
                inputs.dates.start.is_some(),
                QualityReason::DateNormalized,
                w.date_normalized,
            ),
            (
                !inputs.skills.is_empty(),
                QualityReason::SkillsExtracted,
                w.skills_extracted,
            ),
            (
                inputs.pricing.is_resolved(),
                QualityReason::PricingNormalized,
                w.pricing_normalized,
            ),
        ];

        let mut total = 0u32;
        let mut reasons = Vec::new();
        for (satisfied, reason, weight) in checks {
            if satisfied {
                total += u32::from(weight);
                reasons.push(reason);
            }
        }

        QualityReport {
            score: total.min(100) as u8,
            reasons,
        }
    }
}
