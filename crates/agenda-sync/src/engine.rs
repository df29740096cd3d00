//! Applies successful enrichments to an [`EventStore`].

use std::collections::HashMap;
use std::fmt;

use agenda_core::{present, EnrichedEventRecord, ErrorCode, FailureRecord, RelationalRowSet};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::store::{EventStore, RowId, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Location,
    Event,
    EventType,
    TypeAssignment,
    Schedule,
    Pricing,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Location => "location",
            Self::Event => "event",
            Self::EventType => "event_type",
            Self::TypeAssignment => "type_assignment",
            Self::Schedule => "schedule",
            Self::Pricing => "pricing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("sync of event {uid} failed at {stage}: {source}")]
pub struct SyncError {
    pub uid: String,
    pub stage: SyncStage,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub eligible: usize,
    pub synced: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<FailureRecord>,
}

/// Row-set of a record that may reach the store, or `None` when the record
/// failed enrichment or lacks uid, title or city.
pub fn eligible_rows(record: &EnrichedEventRecord) -> Option<&RelationalRowSet> {
    if !record.is_success() {
        return None;
    }
    let rows = record.rows.as_ref()?;
    let has_keys = present(Some(rows.event.uid.as_str())).is_some()
        && present(Some(rows.event.title.as_str())).is_some()
        && present(record.location_city.as_deref()).is_some();
    has_keys.then_some(rows)
}

/// One sync run. The identity caches live as long as the engine and are never
/// shared between runs.
pub struct SyncEngine<'a> {
    store: &'a dyn EventStore,
    locations: HashMap<(String, String, String), RowId>,
    event_types: HashMap<String, RowId>,
}

impl<'a> SyncEngine<'a> {
    pub fn new(store: &'a dyn EventStore) -> Self {
        Self {
            store,
            locations: HashMap::new(),
            event_types: HashMap::new(),
        }
    }

    pub async fn sync_batch(&mut self, records: &[EnrichedEventRecord]) -> SyncReport {
        let mut report = SyncReport::default();
        for record in records {
            let Some(rows) = eligible_rows(record) else {
                report.skipped += 1;
                continue;
            };
            report.eligible += 1;

            let span = info_span!("sync_record", uid = %rows.event.uid);
            match self.sync_rows(rows).instrument(span).await {
                Ok(event_id) => {
                    debug!(uid = %rows.event.uid, event_id, "event synced");
                    report.synced += 1;
                }
                Err(err) => {
                    warn!(uid = %err.uid, stage = %err.stage, error = %err.source, "event sync failed");
                    report.failed += 1;
                    report.errors.push(FailureRecord::new(
                        record.source_id.clone(),
                        ErrorCode::SyncFailed,
                        err.to_string(),
                    ));
                }
            }
        }
        info!(
            eligible = report.eligible,
            synced = report.synced,
            failed = report.failed,
            skipped = report.skipped,
            "sync batch finished"
        );
        report
    }

    /// Writes one row-set in foreign-key order, stopping at the first failure.
    pub async fn sync_rows(&mut self, rows: &RelationalRowSet) -> Result<RowId, SyncError> {
        let uid = rows.event.uid.as_str();
        let fail = |stage: SyncStage| {
            move |source: StoreError| SyncError {
                uid: uid.to_string(),
                stage,
                source,
            }
        };

        let location_id = self
            .location_id(rows)
            .await
            .map_err(fail(SyncStage::Location))?;
        let event_id = self
            .store
            .upsert_event(&rows.event, location_id)
            .await
            .map_err(fail(SyncStage::Event))?;
        let event_type_id = self
            .event_type_id(rows)
            .await
            .map_err(fail(SyncStage::EventType))?;
        self.store
            .replace_type_assignment(event_id, event_type_id, &rows.assignment)
            .await
            .map_err(fail(SyncStage::TypeAssignment))?;
        self.store
            .replace_schedule(event_id, rows.schedule.as_ref())
            .await
            .map_err(fail(SyncStage::Schedule))?;
        self.store
            .replace_pricing(event_id, rows.pricing.as_ref())
            .await
            .map_err(fail(SyncStage::Pricing))?;
        Ok(event_id)
    }

    async fn location_id(&mut self, rows: &RelationalRowSet) -> Result<RowId, StoreError> {
        let key = rows.location.natural_key();
        if let Some(id) = self.locations.get(&key) {
            return Ok(*id);
        }
        let id = self.store.upsert_location(&rows.location).await?;
        self.locations.insert(key, id);
        Ok(id)
    }

    async fn event_type_id(&mut self, rows: &RelationalRowSet) -> Result<RowId, StoreError> {
        if let Some(id) = self.event_types.get(&rows.event_type.code) {
            return Ok(*id);
        }
        let id = self.store.upsert_event_type(&rows.event_type).await?;
        self.event_types.insert(rows.event_type.code.clone(), id);
        Ok(id)
    }
}

/// Runs a fresh [`SyncEngine`] over `records`.
pub async fn sync_batch(store: &dyn EventStore, records: &[EnrichedEventRecord]) -> SyncReport {
    SyncEngine::new(store).sync_batch(records).await
}
