//! Per-record orchestration: text assembly, classification, geocoding, dates,
//! pricing, skills, scoring and row-set construction.

use agenda_adapters::source_key;
use agenda_core::{
    present, EnrichedEventRecord, EnrichmentStatus, ErrorCode, QualityFlag, RawEventRecord,
    RecordError, DEFAULT_SOURCE,
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::classify::{Categorizer, SkillExtractor};
use crate::dates::normalize_dates;
use crate::geocode::{GeocodeQuery, Geocoder};
use crate::pricing::PricingExtractor;
use crate::quality::{QualityScorer, ScoreInputs};
use crate::rows::build_row_set;
use crate::rules::{CategoryRules, EnrichmentRules, RowRules, RulesError};

#[derive(Debug, Clone)]
pub struct RecordEnricher {
    categorizer: Categorizer,
    skills: SkillExtractor,
    geocoder: Geocoder,
    pricing: PricingExtractor,
    scorer: QualityScorer,
    categories: CategoryRules,
    rows: RowRules,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchEnrichment {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub records: Vec<EnrichedEventRecord>,
}

impl BatchEnrichment {
    pub fn successful(&self) -> impl Iterator<Item = &EnrichedEventRecord> {
        self.records.iter().filter(|r| r.is_success())
    }
}

/// Tags arrive as a list or as a `,`/`;`/`|` delimited string.
pub fn tags_from_raw(raw: &JsonValue) -> Vec<String> {
    let as_text = |value: &JsonValue| match value {
        JsonValue::Null => None,
        JsonValue::String(s) => present(Some(s.as_str())).map(str::to_string),
        other => Some(other.to_string()),
    };
    match raw {
        JsonValue::Null => Vec::new(),
        JsonValue::Array(items) => items.iter().filter_map(as_text).collect(),
        JsonValue::String(s) => s
            .split([',', ';', '|'])
            .filter_map(|part| present(Some(part)).map(str::to_string))
            .collect(),
        other => as_text(other).into_iter().collect(),
    }
}

/// Classification text: title, description, conditions, long description, tags.
pub fn assemble_text(raw: &RawEventRecord, tags: &[String]) -> String {
    let joined_tags = tags.join(" ");
    [
        present(raw.title.as_deref()),
        present(raw.description.as_deref()),
        present(raw.conditions.as_deref()),
        raw.raw_field("longdescription_fr"),
        present(Some(joined_tags.as_str())),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ")
}

fn owned(value: Option<&str>) -> Option<String> {
    present(value).map(str::to_string)
}

impl RecordEnricher {
    pub fn new(rules: &EnrichmentRules) -> Result<Self, RulesError> {
        Ok(Self {
            categorizer: Categorizer::new(&rules.categories),
            skills: SkillExtractor::new(&rules.skills),
            geocoder: Geocoder::new(&rules.cities),
            pricing: PricingExtractor::new(&rules.pricing)?,
            scorer: QualityScorer::new(rules.scoring),
            categories: rules.categories.clone(),
            rows: rules.rows.clone(),
        })
    }

    pub fn enrich(&self, raw: &RawEventRecord) -> EnrichedEventRecord {
        let uid = owned(raw.uid.as_deref());
        let title = owned(raw.title.as_deref());
        let description = owned(raw.description.as_deref());
        let conditions = owned(raw.conditions.as_deref());
        let city = owned(raw.location_city.as_deref());
        let address = owned(raw.location_address.as_deref());

        let tags = tags_from_raw(&raw.tags_raw);
        let text = assemble_text(raw, &tags);
        let category = self.categorizer.categorize(&text);

        let geo = self.geocoder.locate(&GeocodeQuery {
            raw_coordinates: &raw.coordinates_raw,
            city: city.as_deref(),
            address: address.as_deref(),
        });
        let dates = normalize_dates(raw);
        let pricing = self.pricing.extract(conditions.as_deref());
        let skills = self.skills.extract(&text);

        let quality = self.scorer.score(&ScoreInputs {
            title: title.as_deref(),
            description: description.as_deref(),
            category: &category,
            geo: geo.as_ref(),
            dates: &dates,
            skills: &skills,
            pricing: &pricing,
        });

        let mut quality_flags = Vec::new();
        let checks = [
            (uid.is_none(), QualityFlag::MissingUid),
            (title.is_none(), QualityFlag::MissingTitle),
            (city.is_none(), QualityFlag::MissingCity),
            (geo.is_none(), QualityFlag::MissingGeo),
            (dates.start.is_none(), QualityFlag::MissingDate),
            (skills.is_empty(), QualityFlag::NoSkillsDetected),
        ];
        for (missing, flag) in checks {
            if missing {
                quality_flags.push(flag);
            }
        }

        let blocking = quality_flags
            .iter()
            .filter(|flag| flag.is_blocking())
            .map(|flag| match flag {
                QualityFlag::MissingUid => "uid",
                QualityFlag::MissingTitle => "title",
                _ => "city",
            })
            .collect::<Vec<_>>();
        let (status, error) = if blocking.is_empty() {
            (EnrichmentStatus::Success, None)
        } else {
            (
                EnrichmentStatus::Failed,
                Some(RecordError {
                    code: ErrorCode::MissingFields,
                    message: format!("missing required fields: {}", blocking.join(", ")),
                }),
            )
        };

        let mut record = EnrichedEventRecord {
            source_id: source_key(raw),
            source: owned(raw.source.as_deref()).unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            fetched_at: owned(raw.fetched_at.as_deref()),
            uid,
            title,
            description,
            conditions,
            location_name: owned(raw.location_name.as_deref()),
            location_address: address,
            location_city: city,
            country: owned(raw.country.as_deref()),
            geo,
            category,
            skills,
            tags,
            dates,
            pricing,
            quality_flags,
            quality,
            status,
            error,
            rows: None,
        };

        if record.is_success() {
            record.rows = Some(build_row_set(&record, &self.categories, &self.rows));
        } else {
            debug!(source_id = %record.source_id, error = ?record.error, "enrichment failed");
        }
        record
    }

    pub fn enrich_batch(&self, raws: &[RawEventRecord]) -> BatchEnrichment {
        let records = raws.iter().map(|raw| self.enrich(raw)).collect::<Vec<_>>();
        let succeeded = records.iter().filter(|r| r.is_success()).count();
        BatchEnrichment {
            attempted: records.len(),
            succeeded,
            failed: records.len() - succeeded,
            records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agenda_core::{GeoSource, QualityReason};
    use serde_json::json;

    fn enricher() -> RecordEnricher {
        RecordEnricher::new(&EnrichmentRules::default()).expect("default rules")
    }

    #[test]
    fn missing_title_fails_with_missing_fields() {
        let raw = RawEventRecord {
            uid: Some("evt-2".into()),
            title: None,
            location_city: Some("Paris".into()),
            ..Default::default()
        };
        let record = enricher().enrich(&raw);

        assert_eq!(record.status, EnrichmentStatus::Failed);
        let error = record.error.as_ref().expect("error");
        assert_eq!(error.code, ErrorCode::MissingFields);
        assert_eq!(error.message, "missing required fields: title");
        assert!(record.rows.is_none());
        assert!(record.quality_flags.contains(&QualityFlag::MissingTitle));

        let failure = record.failure_record().expect("failure record");
        assert_eq!(failure.source_id, "uid:evt-2");
        assert_eq!(failure.error.code, ErrorCode::MissingFields);
    }

    #[test]
    fn valid_workshop_record_succeeds() {
        let raw = RawEventRecord {
            uid: Some("evt-3".into()),
            title: Some("Atelier cuisine".into()),
            description: Some("Initiation workshop".into()),
            location_city: Some("Lyon".into()),
            ..Default::default()
        };
        let record = enricher().enrich(&raw);

        assert_eq!(record.status, EnrichmentStatus::Success);
        assert_eq!(record.category, "workshop");
        assert_eq!(record.skills, ["pedagogie"]);
        assert_eq!(record.geo.map(|g| g.source), Some(GeoSource::CityLookup));
        assert!(record.quality_flags.contains(&QualityFlag::MissingDate));
        assert_eq!(record.quality.score, 20 + 15 + 15 + 20 + 10);

        let rows = record.rows.expect("rows");
        assert_eq!(rows.event.uid, "evt-3");
        assert_eq!(rows.location.city, "Lyon");
        assert_eq!(rows.event_type.code, "workshop");
    }

    #[test]
    fn blank_strings_count_as_absent_but_empty_address_still_succeeds() {
        let raw = RawEventRecord {
            uid: Some("evt-8".into()),
            title: Some("Bal folk".into()),
            location_city: Some("   ".into()),
            ..Default::default()
        };
        let record = enricher().enrich(&raw);
        assert_eq!(record.status, EnrichmentStatus::Failed);
        assert_eq!(
            record.error.map(|e| e.message).as_deref(),
            Some("missing required fields: city")
        );

        let raw = RawEventRecord {
            uid: Some("evt-9".into()),
            title: Some("Bal folk".into()),
            location_city: Some("Nantes".into()),
            location_address: Some("".into()),
            ..Default::default()
        };
        let record = enricher().enrich(&raw);
        assert_eq!(record.status, EnrichmentStatus::Success);
        assert_eq!(record.rows.expect("rows").location.address, "");
    }

    #[test]
    fn tags_and_long_description_feed_classification() {
        let raw = RawEventRecord {
            uid: Some("evt-10".into()),
            title: Some("Rendez-vous du jeudi".into()),
            location_city: Some("Dijon".into()),
            tags_raw: json!("bal; guinguette"),
            raw_fields: json!({"longdescription_fr": "Soirée danse en couple"}),
            ..Default::default()
        };
        let record = enricher().enrich(&raw);
        assert_eq!(record.tags, ["bal", "guinguette"]);
        assert_eq!(record.skills, ["danse"]);
    }

    #[test]
    fn complete_record_carries_all_reasons() {
        let raw = RawEventRecord {
            uid: Some("evt-101".into()),
            title: Some("Festival jazz des quais".into()),
            description: Some("Trois scènes, dix concerts.".into()),
            conditions: Some("Entrée 10€ ou 15€".into()),
            location_city: Some("Lyon".into()),
            date_start: Some("2026-07-03T19:00:00+02:00".into()),
            coordinates_raw: json!({"lat": 45.764, "lon": 4.8274}),
            ..Default::default()
        };
        let record = enricher().enrich(&raw);

        assert_eq!(record.category, "music");
        assert_eq!(record.quality.score, 100);
        assert!(record.quality.reasons.contains(&QualityReason::PricingNormalized));
        assert_eq!(record.quality_flags, Vec::<QualityFlag>::new());
        assert_eq!(record.pricing.amount_max, Some(15.0));
        assert_eq!(record.geo.map(|g| g.source), Some(GeoSource::RawCoordinates));
    }

    #[test]
    fn tag_shapes_are_flattened() {
        assert_eq!(tags_from_raw(&json!(["jazz", " ", 3])), ["jazz", "3"]);
        assert_eq!(tags_from_raw(&json!("a, b|c;;")), ["a", "b", "c"]);
        assert!(tags_from_raw(&JsonValue::Null).is_empty());
    }

    #[test]
    fn batch_counts_split_success_and_failure() {
        let raws = vec![
            RawEventRecord {
                uid: Some("evt-1".into()),
                title: Some("Concert".into()),
                location_city: Some("Paris".into()),
                ..Default::default()
            },
            RawEventRecord::default(),
        ];
        let batch = enricher().enrich_batch(&raws);
        assert_eq!((batch.attempted, batch.succeeded, batch.failed), (2, 1, 1));
        assert_eq!(batch.successful().count(), 1);
    }
}
