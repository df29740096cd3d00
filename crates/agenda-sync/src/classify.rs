//! Keyword rule tables: single-label categorization and multi-label skill tags.

use agenda_core::DEFAULT_CATEGORY;

use crate::normalize::normalize_text;
use crate::rules::{CategoryRules, KeywordRule, SkillRules};

/// A keyword rule with its keywords pre-normalized.
#[derive(Debug, Clone)]
struct CompiledRule {
    code: String,
    keywords: Vec<String>,
}

impl CompiledRule {
    fn compile(rule: &KeywordRule) -> Self {
        Self {
            code: rule.code.clone(),
            keywords: rule
                .contains_any
                .iter()
                .map(|k| normalize_text(k))
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    fn matches(&self, normalized: &str) -> bool {
        self.keywords.iter().any(|k| normalized.contains(k.as_str()))
    }
}

/// First matching bucket wins; the table order is the priority order.
#[derive(Debug, Clone)]
pub struct Categorizer {
    rules: Vec<CompiledRule>,
}

impl Categorizer {
    pub fn new(rules: &CategoryRules) -> Self {
        Self {
            rules: rules.rules.iter().map(CompiledRule::compile).collect(),
        }
    }

    pub fn categorize(&self, text: &str) -> String {
        let normalized = normalize_text(text);
        self.rules
            .iter()
            .find(|rule| rule.matches(&normalized))
            .map(|rule| rule.code.clone())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string())
    }
}

/// Every matching skill, sorted and deduplicated.
#[derive(Debug, Clone)]
pub struct SkillExtractor {
    rules: Vec<CompiledRule>,
}

impl SkillExtractor {
    pub fn new(rules: &SkillRules) -> Self {
        Self {
            rules: rules.rules.iter().map(CompiledRule::compile).collect(),
        }
    }

    pub fn extract(&self, text: &str) -> Vec<String> {
        let normalized = normalize_text(text);
        let mut skills = self
            .rules
            .iter()
            .filter(|rule| rule.matches(&normalized))
            .map(|rule| rule.code.clone())
            .collect::<Vec<_>>();
        skills.sort();
        skills.dedup();
        skills
    }
}
