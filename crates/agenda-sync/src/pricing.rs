//! Free/paid status and amount range from a free-text conditions string.

use agenda_core::PricingInfo;
use regex::Regex;

use crate::normalize::normalize_text;
use crate::rules::{PricingRules, RulesError};

#[derive(Debug, Clone)]
pub struct PricingExtractor {
    free_keywords: Vec<String>,
    amount_re: Regex,
    currency: String,
}

impl PricingExtractor {
    pub fn new(rules: &PricingRules) -> Result<Self, RulesError> {
        Ok(Self {
            free_keywords: rules
                .free_keywords
                .iter()
                .map(|k| normalize_text(k))
                .filter(|k| !k.is_empty())
                .collect(),
            amount_re: Regex::new(&rules.amount_pattern)?,
            currency: rules.currency.clone(),
        })
    }

    /// Every amount matched in the original text, in order of appearance.
    ///
    /// Matching runs on the raw text so currency symbols survive.
    pub fn amounts(&self, text: &str) -> Vec<f64> {
        self.amount_re
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| m.as_str().replace(',', ".").parse::<f64>().ok())
            .filter(|n| n.is_finite())
            .collect()
    }

    pub fn mentions_free_admission(&self, text: &str) -> bool {
        let normalized = normalize_text(text);
        self.free_keywords
            .iter()
            .any(|k| normalized.contains(k.as_str()))
    }

    /// Any detected amount means paid, even next to a free keyword; only
    /// without amounts does the keyword decide.
    pub fn extract(&self, conditions: Option<&str>) -> PricingInfo {
        let Some(text) = conditions.filter(|t| !t.trim().is_empty()) else {
            return PricingInfo::default();
        };

        let amounts = self.amounts(text);
        let amount_min = amounts.iter().copied().reduce(f64::min);
        let amount_max = amounts.iter().copied().reduce(f64::max);

        if amounts.is_empty() {
            PricingInfo {
                is_free: Some(self.mentions_free_admission(text)),
                amount_min: None,
                amount_max: None,
                currency: None,
                source_text: Some(text.to_string()),
            }
        } else {
            PricingInfo {
                is_free: Some(false),
                amount_min,
                amount_max,
                currency: Some(self.currency.clone()),
                source_text: Some(text.to_string()),
            }
        }
    }
}
