//! Projection of an enriched record onto the relational row-set.

use agenda_core::{
    present, EnrichedEventRecord, EventRow, EventTypeRow, LocationRow, PricingRow,
    RelationalRowSet, ScheduleRow, TypeAssignmentRow, DEFAULT_CATEGORY, UNKNOWN_CITY,
    UNKNOWN_COUNTRY,
};

use crate::rules::{CategoryRules, RowRules};

fn text_or(value: Option<&str>, fallback: &str) -> String {
    present(value).unwrap_or(fallback).to_string()
}

fn optional_text(value: Option<&str>) -> Option<String> {
    present(value).map(str::to_string)
}

/// Maps present values through and absent ones to defaults. Never fails.
pub fn build_row_set(
    record: &EnrichedEventRecord,
    categories: &CategoryRules,
    rules: &RowRules,
) -> RelationalRowSet {
    let category = present(Some(record.category.as_str())).unwrap_or(DEFAULT_CATEGORY);
    let dates = &record.dates;
    let pricing = &record.pricing;

    let location = LocationRow {
        city: text_or(record.location_city.as_deref(), UNKNOWN_CITY),
        country: text_or(record.country.as_deref(), UNKNOWN_COUNTRY),
        address: text_or(record.location_address.as_deref(), ""),
    };

    let event = EventRow {
        uid: text_or(record.uid.as_deref(), ""),
        title: text_or(record.title.as_deref(), ""),
        description: optional_text(record.description.as_deref()),
        event_date: dates.start,
    };

    let event_type = EventTypeRow {
        code: category.to_string(),
        label: categories.label_for(category).to_string(),
        description: Some(rules.type_description.clone()),
    };

    let assignment = TypeAssignmentRow {
        event_type_code: category.to_string(),
        confidence_score: if category != DEFAULT_CATEGORY {
            rules.categorized_confidence
        } else {
            rules.fallback_confidence
        },
        source: rules.assignment_source.clone(),
    };

    let source_date_text = optional_text(dates.raw_text.as_deref());
    let schedule = (dates.start.is_some() || dates.end.is_some() || source_date_text.is_some())
        .then(|| ScheduleRow {
            starts_at: dates.start,
            ends_at: dates.end,
            timezone: rules.timezone.clone(),
            is_all_day: false,
            source_date_text,
        });

    let is_free = pricing.is_free == Some(true);
    let conditions_text = optional_text(record.conditions.as_deref());
    let pricing_row = (conditions_text.is_some() || pricing.amount_min.is_some() || is_free)
        .then(|| PricingRow {
            label: if is_free {
                rules.free_ticket_label.clone()
            } else {
                rules.paid_ticket_label.clone()
            },
            amount: pricing.amount_min,
            currency: pricing
                .currency
                .clone()
                .unwrap_or_else(|| rules.default_currency.clone()),
            is_free,
            conditions_text,
        });

    RelationalRowSet {
        location,
        event,
        event_type,
        assignment,
        schedule,
        pricing: pricing_row,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::EnrichmentRules;
    use agenda_core::{
        EnrichmentStatus, NormalizedDateRange, PricingInfo, QualityReport,
    };
    use chrono::{TimeZone, Utc};

    fn enriched(uid: &str, title: &str, city: &str) -> EnrichedEventRecord {
        EnrichedEventRecord {
            source_id: format!("uid:{uid}"),
            source: "openagenda_api".into(),
            fetched_at: None,
            uid: Some(uid.into()),
            title: Some(title.into()),
            description: None,
            conditions: None,
            location_name: None,
            location_address: None,
            location_city: Some(city.into()),
            country: None,
            geo: None,
            category: "exhibition".into(),
            skills: vec![],
            tags: vec![],
            dates: NormalizedDateRange::default(),
            pricing: PricingInfo::default(),
            quality_flags: vec![],
            quality: QualityReport::default(),
            status: EnrichmentStatus::Success,
            error: None,
            rows: None,
        }
    }

    fn build(record: &EnrichedEventRecord) -> RelationalRowSet {
        let rules = EnrichmentRules::default();
        build_row_set(record, &rules.categories, &rules.rows)
    }

    #[test]
    fn absent_country_and_address_map_to_defaults() {
        let rows = build(&enriched("evt-4", "Exposition Moderne", "Bordeaux"));

        assert_eq!(rows.event.uid, "evt-4");
        assert_eq!(rows.event.title, "Exposition Moderne");
        assert_eq!(rows.location.city, "Bordeaux");
        assert_eq!(rows.location.country, "Unknown country");
        assert_eq!(rows.location.address, "");
        assert_eq!(rows.event_type.label, "Exposition");
        assert_eq!(rows.assignment.confidence_score, 0.85);
        assert!(rows.schedule.is_none());
        assert!(rows.pricing.is_none());
    }

    #[test]
    fn schedule_and_pricing_rows_follow_enriched_values() {
        let start = Utc.with_ymd_and_hms(2026, 7, 3, 17, 0, 0).single().expect("ts");
        let mut record = enriched("evt-101", "Festival jazz", "Lyon");
        record.category = "other".into();
        record.conditions = Some("Entrée 10€ ou 15€".into());
        record.dates = NormalizedDateRange {
            start: Some(start),
            end: Some(start),
            raw_text: Some("Le 3 juillet".into()),
        };
        record.pricing = PricingInfo {
            is_free: Some(false),
            amount_min: Some(10.0),
            amount_max: Some(15.0),
            currency: Some("EUR".into()),
            source_text: record.conditions.clone(),
        };

        let rows = build(&record);
        let schedule = rows.schedule.expect("schedule");
        assert_eq!(schedule.starts_at, Some(start));
        assert_eq!(schedule.timezone, "Europe/Paris");
        assert_eq!(schedule.source_date_text.as_deref(), Some("Le 3 juillet"));
        assert_eq!(rows.event.event_date, Some(start));

        let pricing = rows.pricing.expect("pricing");
        assert_eq!(pricing.label, "Standard");
        assert_eq!(pricing.amount, Some(10.0));
        assert!(!pricing.is_free);
        assert_eq!(rows.event_type.label, "Autre");
        assert_eq!(rows.assignment.confidence_score, 0.5);
    }

    #[test]
    fn free_event_without_conditions_text_still_gets_pricing_row() {
        let mut record = enriched("evt-7", "Balade", "Nantes");
        record.pricing.is_free = Some(true);
        let pricing = build(&record).pricing.expect("pricing");
        assert_eq!(pricing.label, "Gratuit");
        assert_eq!(pricing.currency, "EUR");
        assert_eq!(pricing.amount, None);
    }
}
