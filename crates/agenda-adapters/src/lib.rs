//! Input adapters turning already-fetched source payloads into raw event records.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use agenda_core::{present, RawEventRecord, DEFAULT_SOURCE};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const CRATE_NAME: &str = "agenda-adapters";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;

    fn parse_payload(
        &self,
        ctx: &AdapterContext,
        payload: &[u8],
    ) -> Result<Vec<RawEventRecord>, AdapterError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputFormat {
    /// Flat JSON array of raw records, as written by the acquisition step.
    RawV2,
    /// Feed search response: `{"records": [{"recordid", "datasetid", "fields": {..}}]}`.
    OpenAgenda,
}

impl FromStr for InputFormat {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw-v2" | "raw_v2" | "raw" => Ok(Self::RawV2),
            "openagenda" | "open-agenda" | "feed" => Ok(Self::OpenAgenda),
            other => Err(AdapterError::Message(format!("unknown input format `{other}`"))),
        }
    }
}

pub fn adapter_for_format(format: InputFormat) -> Box<dyn SourceAdapter> {
    match format {
        InputFormat::RawV2 => Box::new(RawBatchAdapter),
        InputFormat::OpenAgenda => Box::new(OpenAgendaFeedAdapter),
    }
}

pub fn load_payload_file(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    fs::read(path).with_context(|| format!("reading input payload {}", path.display()))
}

/// Stable identity of a raw record: `uid:<uid>`, else `record:<record_id>`,
/// else a sha256 of the record's JSON form.
pub fn source_key(record: &RawEventRecord) -> String {
    if let Some(uid) = present(record.uid.as_deref()) {
        return format!("uid:{uid}");
    }
    if let Some(record_id) = present(record.record_id.as_deref()) {
        return format!("record:{record_id}");
    }
    let bytes = serde_json::to_vec(record).unwrap_or_default();
    format!("hash:{}", hex::encode(Sha256::digest(&bytes)))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawBatchAdapter;

impl SourceAdapter for RawBatchAdapter {
    fn source_id(&self) -> &'static str {
        "raw-v2"
    }

    fn parse_payload(
        &self,
        _ctx: &AdapterContext,
        payload: &[u8],
    ) -> Result<Vec<RawEventRecord>, AdapterError> {
        let value: JsonValue = serde_json::from_slice(payload)?;
        let JsonValue::Array(items) = value else {
            return Err(AdapterError::Message(
                "expected a JSON array of raw event records".to_string(),
            ));
        };
        Ok(items.into_iter().map(raw_value_to_record).collect())
    }
}

/// Converts one raw-v2 element field by field, so a badly typed field only
/// degrades its own record. Non-object elements keep their value in
/// `raw_fields` and carry no usable field, which fails them downstream.
fn raw_value_to_record(value: JsonValue) -> RawEventRecord {
    let JsonValue::Object(f) = value else {
        return RawEventRecord {
            raw_fields: value,
            ..Default::default()
        };
    };

    RawEventRecord {
        source: pick_text(&f, &["source"]),
        fetched_at: pick_text(&f, &["fetched_at"]),
        record_id: pick_text(&f, &["record_id", "recordid"]),
        dataset_id: pick_text(&f, &["dataset_id", "datasetid"]),
        uid: pick_text(&f, &["uid"]),
        title: pick_text(&f, &["title_fr", "title"]),
        description: pick_text(&f, &["description_fr", "description"]),
        conditions: pick_text(&f, &["conditions_fr", "conditions"]),
        location_name: pick_text(&f, &["location_name"]),
        location_address: pick_text(&f, &["location_address"]),
        location_city: pick_text(&f, &["location_city"]),
        country: pick_text(&f, &["country_fr", "country"]),
        event_date: pick_text(&f, &["event_date"]),
        date_start: pick_text(&f, &["date_start"]),
        date_end: pick_text(&f, &["date_end"]),
        date_text: pick_text(&f, &["date_text"]),
        coordinates_raw: pick_raw(&f, &["coordinates_raw"]),
        tags_raw: pick_raw(&f, &["tags_raw"]),
        raw_fields: pick_raw(&f, &["raw_fields"]),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAgendaFeedAdapter;

#[derive(Debug, Deserialize)]
struct FeedPayload {
    #[serde(default)]
    records: Vec<FeedRecord>,
}

#[derive(Debug, Deserialize)]
struct FeedRecord {
    #[serde(default)]
    recordid: Option<JsonValue>,
    #[serde(default)]
    datasetid: Option<JsonValue>,
    #[serde(default)]
    fields: Map<String, JsonValue>,
}

impl SourceAdapter for OpenAgendaFeedAdapter {
    fn source_id(&self) -> &'static str {
        DEFAULT_SOURCE
    }

    fn parse_payload(
        &self,
        ctx: &AdapterContext,
        payload: &[u8],
    ) -> Result<Vec<RawEventRecord>, AdapterError> {
        let feed: FeedPayload = serde_json::from_slice(payload)?;
        let fetched_at = ctx.fetched_at.to_rfc3339_opts(SecondsFormat::Millis, true);
        Ok(feed
            .records
            .into_iter()
            .map(|record| feed_record_to_raw(record, self.source_id(), &fetched_at))
            .collect())
    }
}

fn feed_record_to_raw(record: FeedRecord, source: &str, fetched_at: &str) -> RawEventRecord {
    let f = &record.fields;
    let address = pick_text(f, &["location_address", "address"]);
    let venue = pick_text(f, &["location_name", "venue"]);
    let city = pick_text(f, &["location_city", "city"])
        .or_else(|| address.as_deref().and_then(infer_city_from_address))
        .or_else(|| venue.as_deref().and_then(infer_city_from_address));

    RawEventRecord {
        source: Some(source.to_string()),
        fetched_at: Some(fetched_at.to_string()),
        record_id: record.recordid.as_ref().and_then(value_text),
        dataset_id: record.datasetid.as_ref().and_then(value_text),
        uid: pick_text(f, &["uid"]),
        title: pick_text(f, &["title_fr", "title"]),
        description: pick_text(f, &["description_fr", "description"]),
        conditions: pick_text(f, &["conditions_fr", "conditions"]),
        location_name: venue,
        location_address: address,
        location_city: city,
        country: pick_text(f, &["country_fr", "country"]),
        event_date: pick_text(f, &["event_date", "date_start", "firstdate_begin"]),
        date_start: pick_text(f, &["date_start", "firstdate_begin"]),
        date_end: pick_text(f, &["date_end", "firstdate_end"]),
        date_text: pick_text(f, &["daterange_fr", "date_description", "date_text"]),
        coordinates_raw: pick_raw(
            f,
            &["location_coordinates", "location_geometry", "geo_point_2d", "latlon"],
        ),
        tags_raw: pick_raw(f, &["keywords_fr", "tags", "theme"]),
        raw_fields: JsonValue::Object(f.clone()),
    }
}

fn is_blank(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.is_empty(),
        _ => false,
    }
}

/// First non-empty value among `keys`, verbatim.
fn pick_raw(fields: &Map<String, JsonValue>, keys: &[&str]) -> JsonValue {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .find(|value| !is_blank(value))
        .cloned()
        .unwrap_or(JsonValue::Null)
}

/// First value among `keys` with non-blank text, rendered trimmed.
fn pick_text(fields: &Map<String, JsonValue>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .find_map(value_text)
}

fn value_text(value: &JsonValue) -> Option<String> {
    let text = match value {
        JsonValue::Null => return None,
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    };
    present(Some(text.as_str())).map(str::to_string)
}

fn postal_city_re() -> &'static Regex {
    static POSTAL_CITY_RE: OnceLock<Regex> = OnceLock::new();
    POSTAL_CITY_RE.get_or_init(|| {
        Regex::new(r"\b\d{5}\s+([\p{L}' -]{2,})(?:,|$)").expect("valid postal city regex")
    })
}

/// Best-effort city from a postal address ("... 33000 Bordeaux") or, failing
/// that, from its last comma-separated segment.
pub fn infer_city_from_address(address: &str) -> Option<String> {
    let collapsed = address.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }

    if let Some(city) = postal_city_re()
        .captures(&collapsed)
        .and_then(|caps| caps.get(1))
        .and_then(|m| present(Some(m.as_str())))
    {
        return Some(city.to_string());
    }

    let candidate = collapsed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .last()?;
    let banned = ["france", "france (metropole)", "metropole"];
    if banned.contains(&candidate.to_lowercase().as_str()) {
        None
    } else {
        Some(candidate.to_string())
    }
}
