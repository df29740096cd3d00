//! Core domain model for the cultural agenda enrichment pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "agenda-core";

pub const DEFAULT_SOURCE: &str = "openagenda_api";
pub const DEFAULT_CATEGORY: &str = "other";
pub const UNKNOWN_CITY: &str = "Unknown city";
pub const UNKNOWN_COUNTRY: &str = "Unknown country";

/// Returns the trimmed value when it carries any non-whitespace text.
pub fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Raw event as handed over by the acquisition step. Read-only to the pipeline.
///
/// Coordinates, tags and the verbatim source field object keep whatever JSON
/// shape the source produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEventRecord {
    pub source: Option<String>,
    pub fetched_at: Option<String>,
    pub record_id: Option<String>,
    pub dataset_id: Option<String>,
    pub uid: Option<String>,
    #[serde(rename = "title_fr", alias = "title")]
    pub title: Option<String>,
    #[serde(rename = "description_fr", alias = "description")]
    pub description: Option<String>,
    #[serde(rename = "conditions_fr", alias = "conditions")]
    pub conditions: Option<String>,
    pub location_name: Option<String>,
    pub location_address: Option<String>,
    pub location_city: Option<String>,
    #[serde(rename = "country_fr", alias = "country")]
    pub country: Option<String>,
    pub event_date: Option<String>,
    pub date_start: Option<String>,
    pub date_end: Option<String>,
    pub date_text: Option<String>,
    pub coordinates_raw: JsonValue,
    pub tags_raw: JsonValue,
    pub raw_fields: JsonValue,
}

impl RawEventRecord {
    /// String value of a verbatim source field, if present and non-blank.
    pub fn raw_field(&self, key: &str) -> Option<&str> {
        present(self.raw_fields.get(key).and_then(JsonValue::as_str))
    }
}

/// Reconciled start/end interval. When both ends are present `start <= end`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedDateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub raw_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoSource {
    RawCoordinates,
    CityLookup,
    AddressSubstring,
}

impl GeoSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RawCoordinates => "raw_coordinates",
            Self::CityLookup => "city_lookup",
            Self::AddressSubstring => "address_substring",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub source: GeoSource,
}

impl GeoPoint {
    /// Builds a point only when both axes are finite and within WGS84 bounds.
    pub fn new(latitude: f64, longitude: f64, source: GeoSource) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        valid.then_some(Self {
            latitude,
            longitude,
            source,
        })
    }
}

/// Free/paid status and amount range extracted from a conditions string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingInfo {
    pub is_free: Option<bool>,
    pub amount_min: Option<f64>,
    pub amount_max: Option<f64>,
    pub currency: Option<String>,
    pub source_text: Option<String>,
}

impl PricingInfo {
    pub fn is_resolved(&self) -> bool {
        self.is_free.is_some() || self.amount_min.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityReason {
    Title,
    Description,
    Categorized,
    Geocoded,
    DateNormalized,
    SkillsExtracted,
    PricingNormalized,
}

impl QualityReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Description => "description",
            Self::Categorized => "categorized",
            Self::Geocoded => "geocoded",
            Self::DateNormalized => "date_normalized",
            Self::SkillsExtracted => "skills_extracted",
            Self::PricingNormalized => "pricing_normalized",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityReport {
    pub score: u8,
    pub reasons: Vec<QualityReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    MissingUid,
    MissingTitle,
    MissingCity,
    MissingGeo,
    MissingDate,
    NoSkillsDetected,
}

impl QualityFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingUid => "missing_uid",
            Self::MissingTitle => "missing_title",
            Self::MissingCity => "missing_city",
            Self::MissingGeo => "missing_geo",
            Self::MissingDate => "missing_date",
            Self::NoSkillsDetected => "no_skills_detected",
        }
    }

    /// Flags that make a record unusable for storage.
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::MissingUid | Self::MissingTitle | Self::MissingCity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingFields,
    SyncFailed,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingFields => "MISSING_FIELDS",
            Self::SyncFailed => "SYNC_FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub code: ErrorCode,
    pub message: String,
}

/// Failure entry consumed by reporting; one per failed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub source_id: String,
    pub status: EnrichmentStatus,
    pub error: RecordError,
}

impl FailureRecord {
    pub fn new(source_id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            status: EnrichmentStatus::Failed,
            error: RecordError {
                code,
                message: message.into(),
            },
        }
    }
}

/// Normalized, classified and scored projection of one raw record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedEventRecord {
    pub source_id: String,
    pub source: String,
    pub fetched_at: Option<String>,
    pub uid: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub conditions: Option<String>,
    pub location_name: Option<String>,
    pub location_address: Option<String>,
    pub location_city: Option<String>,
    pub country: Option<String>,
    pub geo: Option<GeoPoint>,
    pub category: String,
    pub skills: Vec<String>,
    pub tags: Vec<String>,
    pub dates: NormalizedDateRange,
    pub pricing: PricingInfo,
    pub quality_flags: Vec<QualityFlag>,
    pub quality: QualityReport,
    pub status: EnrichmentStatus,
    pub error: Option<RecordError>,
    pub rows: Option<RelationalRowSet>,
}

impl EnrichedEventRecord {
    pub fn is_success(&self) -> bool {
        self.status == EnrichmentStatus::Success
    }

    pub fn failure_record(&self) -> Option<FailureRecord> {
        self.error.as_ref().map(|error| FailureRecord {
            source_id: self.source_id.clone(),
            status: EnrichmentStatus::Failed,
            error: error.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationRow {
    pub city: String,
    pub country: String,
    pub address: String,
}

impl LocationRow {
    pub fn natural_key(&self) -> (String, String, String) {
        (self.city.clone(), self.country.clone(), self.address.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRow {
    pub uid: String,
    pub title: String,
    pub description: Option<String>,
    pub event_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTypeRow {
    pub code: String,
    pub label: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeAssignmentRow {
    pub event_type_code: String,
    pub confidence_score: f64,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub timezone: String,
    pub is_all_day: bool,
    pub source_date_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRow {
    pub label: String,
    pub amount: Option<f64>,
    pub currency: String,
    pub is_free: bool,
    pub conditions_text: Option<String>,
}

/// Fixed cross-table projection of a successful enrichment.
///
/// Rebuilt from scratch on every run and applied wholesale for its uid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationalRowSet {
    pub location: LocationRow,
    pub event: EventRow,
    pub event_type: EventTypeRow,
    pub assignment: TypeAssignmentRow,
    pub schedule: Option<ScheduleRow>,
    pub pricing: Option<PricingRow>,
}
