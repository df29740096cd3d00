//! Swappable rule tables: category and skill keywords, the city dictionary,
//! pricing patterns, scoring weights and row-building defaults.
//!
//! Built-in tables come from [`EnrichmentRules::default`]. Any of
//! `rules/{categories,skills,cities,pricing,scoring}.yaml` found under a
//! workspace root replaces the matching section wholesale.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid amount pattern: {0}")]
    InvalidAmountPattern(#[from] regex::Error),
}

/// One row of a keyword table: `code` wins when any keyword is a substring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub code: String,
    pub contains_any: Vec<String>,
}

impl KeywordRule {
    fn new(code: &str, keywords: &[&str]) -> Self {
        Self {
            code: code.to_string(),
            contains_any: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Ordered category buckets. Earlier rules take priority over later ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRules {
    #[serde(default = "default_version")]
    pub version: u32,
    pub rules: Vec<KeywordRule>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default = "default_fallback_label")]
    pub fallback_label: String,
}

impl CategoryRules {
    pub fn label_for(&self, code: &str) -> &str {
        self.labels
            .get(code)
            .map(String::as_str)
            .unwrap_or(&self.fallback_label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRules {
    #[serde(default = "default_version")]
    pub version: u32,
    pub rules: Vec<KeywordRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityEntry {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// City dictionary; list order is the scan order for address matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityDictionary {
    #[serde(default = "default_version")]
    pub version: u32,
    pub cities: Vec<CityEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRules {
    #[serde(default = "default_version")]
    pub version: u32,
    pub free_keywords: Vec<String>,
    /// Regex whose first capture group is the numeric amount.
    pub amount_pattern: String,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub title: u8,
    pub description: u8,
    pub categorized: u8,
    pub geocoded: u8,
    pub date_normalized: u8,
    pub skills_extracted: u8,
    pub pricing_normalized: u8,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            title: 20,
            description: 15,
            categorized: 15,
            geocoded: 20,
            date_normalized: 15,
            skills_extracted: 10,
            pricing_normalized: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowRules {
    pub timezone: String,
    pub assignment_source: String,
    pub categorized_confidence: f64,
    pub fallback_confidence: f64,
    pub type_description: String,
    pub default_currency: String,
    pub free_ticket_label: String,
    pub paid_ticket_label: String,
}

impl Default for RowRules {
    fn default() -> Self {
        Self {
            timezone: "Europe/Paris".to_string(),
            assignment_source: "keyword_rules".to_string(),
            categorized_confidence: 0.85,
            fallback_confidence: 0.5,
            type_description: "Auto-classification".to_string(),
            default_currency: "EUR".to_string(),
            free_ticket_label: "Gratuit".to_string(),
            paid_ticket_label: "Standard".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentRules {
    pub categories: CategoryRules,
    pub skills: SkillRules,
    pub cities: CityDictionary,
    pub pricing: PricingRules,
    pub scoring: ScoringWeights,
    pub rows: RowRules,
}

impl Default for EnrichmentRules {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            skills: default_skills(),
            cities: default_cities(),
            pricing: default_pricing(),
            scoring: ScoringWeights::default(),
            rows: RowRules::default(),
        }
    }
}

impl EnrichmentRules {
    /// Built-in tables overlaid with whatever rule files exist under `root/rules`.
    pub fn from_workspace_root(root: &Path) -> Result<Self, RulesError> {
        let dir = root.join("rules");
        let mut rules = Self::default();
        if let Some(categories) = read_optional_yaml(&dir.join("categories.yaml"))? {
            rules.categories = categories;
        }
        if let Some(skills) = read_optional_yaml(&dir.join("skills.yaml"))? {
            rules.skills = skills;
        }
        if let Some(cities) = read_optional_yaml(&dir.join("cities.yaml"))? {
            rules.cities = cities;
        }
        if let Some(pricing) = read_optional_yaml(&dir.join("pricing.yaml"))? {
            rules.pricing = pricing;
        }
        if let Some(scoring) = read_optional_yaml(&dir.join("scoring.yaml"))? {
            rules.scoring = scoring;
        }
        Ok(rules)
    }
}

fn read_optional_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, RulesError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path).map_err(|source| RulesError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text)
        .map(Some)
        .map_err(|source| RulesError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

fn default_version() -> u32 {
    1
}

fn default_fallback_label() -> String {
    "Autre".to_string()
}

fn default_categories() -> CategoryRules {
    let rules = vec![
        KeywordRule::new(
            "music",
            &[
                "concert", "musique", "music", "son", "acoustique", "acoustic", "jazz", "rock",
                "rap", "hip hop", "hip-hop", "electro", "electronic", "pop", "blues", "folk",
                "opera", "symphonie", "symphony", "philharmonique", "philharmonic", "dj",
                "set dj", "set live", "chorale", "choir", "orchestra", "orchestre", "festival",
                "recital", "live", "karaoke", "musician", "musicien",
            ],
        ),
        KeywordRule::new(
            "exhibition",
            &[
                "exposition", "exhibit", "museum", "musee", "galerie", "gallery", "vernissage",
                "art", "arts visuels", "visual art", "peinture", "painting", "sculpture",
                "installation", "collection", "patrimoine", "heritage", "historique", "history",
                "photography", "photo", "dessin", "drawing",
            ],
        ),
        KeywordRule::new(
            "theater",
            &[
                "theatre", "theater", "piece", "play", "scene", "comedie", "comedy", "drama",
                "spectacle", "stand-up", "stand up", "impro", "improv", "performance", "acteur",
                "actor", "actrice", "actress", "mise en scene", "one man show", "one woman show",
            ],
        ),
        KeywordRule::new(
            "workshop",
            &[
                "atelier", "workshop", "masterclass", "formation", "training", "cours", "class",
                "initiation", "conference", "seminaire", "seminar", "table ronde", "roundtable",
                "rencontre", "discussion", "apprentissage", "learning", "stage", "bootcamp",
            ],
        ),
    ];

    let labels = [
        ("music", "Musique"),
        ("exhibition", "Exposition"),
        ("theater", "Theatre"),
        ("workshop", "Atelier"),
        ("conference", "Conference"),
        ("festival", "Festival"),
        ("cinema", "Cinema"),
        ("dance", "Danse"),
        ("heritage", "Patrimoine"),
        ("kids", "Jeune public"),
        ("other", "Autre"),
    ]
    .into_iter()
    .map(|(code, label)| (code.to_string(), label.to_string()))
    .collect();

    CategoryRules {
        version: 1,
        rules,
        labels,
        fallback_label: default_fallback_label(),
    }
}

fn default_skills() -> SkillRules {
    SkillRules {
        version: 1,
        rules: vec![
            KeywordRule::new(
                "communication",
                &["communication", "presenter", "presentation", "debate", "conference"],
            ),
            KeywordRule::new(
                "pedagogie",
                &["atelier", "workshop", "formation", "apprentissage", "initiation"],
            ),
            KeywordRule::new(
                "gestion_projet",
                &["organisation", "coordination", "planning", "projet"],
            ),
            KeywordRule::new(
                "creativite",
                &["creation", "creatif", "artistique", "impro", "design"],
            ),
            KeywordRule::new(
                "musique",
                &["concert", "musique", "jazz", "rock", "rap", "acoustique"],
            ),
            KeywordRule::new(
                "theatre",
                &["theatre", "theater", "comedie", "drama", "scene", "spectacle"],
            ),
            KeywordRule::new(
                "danse",
                &["danse", "choregraphie", "choregraphy", "performance corporelle"],
            ),
            KeywordRule::new(
                "photographie",
                &["photo", "photographie", "camera", "portrait", "exposition photo"],
            ),
            KeywordRule::new(
                "bricolage",
                &["bricolage", "outil", "jardinage", "diy", "reparation"],
            ),
            KeywordRule::new(
                "numerique",
                &["numerique", "digital", "code", "programmation", "informatique"],
            ),
            KeywordRule::new(
                "langues",
                &["anglais", "french", "francais", "traduction", "bilingue"],
            ),
        ],
    }
}

fn default_cities() -> CityDictionary {
    let cities = [
        ("paris", 48.8566, 2.3522),
        ("lyon", 45.764, 4.8357),
        ("marseille", 43.2965, 5.3698),
        ("bordeaux", 44.8378, -0.5792),
        ("toulouse", 43.6047, 1.4442),
        ("nantes", 47.2184, -1.5536),
        ("strasbourg", 48.5734, 7.7521),
        ("montpellier", 43.611, 3.8767),
        ("lille", 50.6292, 3.0573),
        ("rennes", 48.1173, -1.6778),
        ("versailles", 48.8049, 2.1204),
        ("begles", 44.8076, -0.5513),
        ("le mans", 48.0061, 0.1996),
        ("nice", 43.7102, 7.262),
        ("reims", 49.2583, 4.0317),
        ("le havre", 49.4944, 0.1079),
        ("saint-etienne", 45.4397, 4.3872),
        ("toulon", 43.1242, 5.928),
        ("grenoble", 45.1885, 5.7245),
        ("dijon", 47.322, 5.0415),
        ("angers", 47.4784, -0.5632),
        ("nimes", 43.8367, 4.3601),
        ("villeurbanne", 45.7719, 4.8902),
        ("clermont-ferrand", 45.7772, 3.087),
        ("aix-en-provence", 43.5297, 5.4474),
        ("brest", 48.3904, -4.4861),
        ("amiens", 49.8941, 2.2958),
        ("limoges", 45.8336, 1.2611),
        ("metz", 49.1193, 6.1757),
        ("besancon", 47.2378, 6.0241),
        ("perpignan", 42.6887, 2.8948),
        ("orleans", 47.9029, 1.9093),
        ("rouen", 49.4432, 1.0999),
        ("caen", 49.1829, -0.3707),
        ("nancy", 48.6921, 6.1844),
        ("avignon", 43.9493, 4.8055),
        ("poitiers", 46.5802, 0.3404),
        ("la rochelle", 46.1603, -1.1511),
    ];
    CityDictionary {
        version: 1,
        cities: cities
            .into_iter()
            .map(|(name, latitude, longitude)| CityEntry {
                name: name.to_string(),
                latitude,
                longitude,
            })
            .collect(),
    }
}

fn default_pricing() -> PricingRules {
    PricingRules {
        version: 1,
        free_keywords: vec![
            "gratuit".to_string(),
            "free".to_string(),
            "entree libre".to_string(),
        ],
        amount_pattern: r"(?i)(\d+(?:[.,]\d+)?)\s*(?:€|(?:eur|euros?)\b)".to_string(),
        currency: "EUR".to_string(),
    }
}
