//! Relational store seam for the sync engine.
//!
//! Every write is keyed by a natural key so replaying a batch converges on the
//! same final state. `PgEventStore` targets the schema in `migrations/`;
//! `InMemoryEventStore` mirrors its unique keys for tests and dry runs.

use std::collections::{BTreeMap, HashMap};

use agenda_core::{EventRow, EventTypeRow, LocationRow, PricingRow, ScheduleRow, TypeAssignmentRow};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;

pub type RowId = i64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("{0}")]
    Message(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub locations: u64,
    pub events: u64,
    pub event_types: u64,
    pub assignments: u64,
    pub schedules: u64,
    pub pricing: u64,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Returns the id for the (city, country, address) triple. An existing
    /// row is never modified.
    async fn upsert_location(&self, row: &LocationRow) -> Result<RowId, StoreError>;

    /// Inserts or overwrites the event identified by `row.uid`.
    async fn upsert_event(&self, row: &EventRow, location_id: RowId) -> Result<RowId, StoreError>;

    /// Returns the id for `row.code`. An existing row is never modified.
    async fn upsert_event_type(&self, row: &EventTypeRow) -> Result<RowId, StoreError>;

    /// Upserts the (event, type) assignment and drops the event's
    /// assignments to any other type.
    async fn replace_type_assignment(
        &self,
        event_id: RowId,
        event_type_id: RowId,
        row: &TypeAssignmentRow,
    ) -> Result<(), StoreError>;

    async fn replace_schedule(
        &self,
        event_id: RowId,
        row: Option<&ScheduleRow>,
    ) -> Result<(), StoreError>;

    async fn replace_pricing(
        &self,
        event_id: RowId,
        row: Option<&PricingRow>,
    ) -> Result<(), StoreError>;

    async fn table_counts(&self) -> Result<TableCounts, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as u64)
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn upsert_location(&self, row: &LocationRow) -> Result<RowId, StoreError> {
        // The no-op update lets RETURNING yield the existing id on conflict.
        let rec = sqlx::query(
            r#"
            INSERT INTO locations (city, country, address)
            VALUES ($1, $2, $3)
            ON CONFLICT (city, country, address) DO UPDATE
               SET city = locations.city
            RETURNING id
            "#,
        )
        .bind(&row.city)
        .bind(&row.country)
        .bind(&row.address)
        .fetch_one(&self.pool)
        .await?;
        Ok(rec.try_get("id")?)
    }

    async fn upsert_event(&self, row: &EventRow, location_id: RowId) -> Result<RowId, StoreError> {
        let rec = sqlx::query(
            r#"
            INSERT INTO events (uid, title, description, event_date, location_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (uid) DO UPDATE
               SET title = EXCLUDED.title,
                   description = EXCLUDED.description,
                   event_date = EXCLUDED.event_date,
                   location_id = EXCLUDED.location_id,
                   updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(&row.uid)
        .bind(&row.title)
        .bind(&row.description)
        .bind(row.event_date)
        .bind(location_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(rec.try_get("id")?)
    }

    async fn upsert_event_type(&self, row: &EventTypeRow) -> Result<RowId, StoreError> {
        let rec = sqlx::query(
            r#"
            INSERT INTO event_types (code, label, description)
            VALUES ($1, $2, $3)
            ON CONFLICT (code) DO UPDATE
               SET code = event_types.code
            RETURNING id
            "#,
        )
        .bind(&row.code)
        .bind(&row.label)
        .bind(&row.description)
        .fetch_one(&self.pool)
        .await?;
        Ok(rec.try_get("id")?)
    }

    async fn replace_type_assignment(
        &self,
        event_id: RowId,
        event_type_id: RowId,
        row: &TypeAssignmentRow,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO events_event_types (event_id, event_type_id, confidence_score, source)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (event_id, event_type_id) DO UPDATE
               SET confidence_score = EXCLUDED.confidence_score,
                   source = EXCLUDED.source,
                   assigned_at = NOW()
            "#,
        )
        .bind(event_id)
        .bind(event_type_id)
        .bind(row.confidence_score)
        .bind(&row.source)
        .execute(&self.pool)
        .await?;

        sqlx::query("DELETE FROM events_event_types WHERE event_id = $1 AND event_type_id <> $2")
            .bind(event_id)
            .bind(event_type_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_schedule(
        &self,
        event_id: RowId,
        row: Option<&ScheduleRow>,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM event_schedules WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(());
        };
        sqlx::query(
            r#"
            INSERT INTO event_schedules
                (event_id, starts_at, ends_at, timezone, is_all_day, source_date_text)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event_id)
        .bind(row.starts_at)
        .bind(row.ends_at)
        .bind(&row.timezone)
        .bind(row.is_all_day)
        .bind(&row.source_date_text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_pricing(
        &self,
        event_id: RowId,
        row: Option<&PricingRow>,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM event_pricing WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(());
        };
        sqlx::query(
            r#"
            INSERT INTO event_pricing
                (event_id, label, amount, currency, is_free, conditions_text)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event_id)
        .bind(&row.label)
        .bind(row.amount)
        .bind(&row.currency)
        .bind(row.is_free)
        .bind(&row.conditions_text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn table_counts(&self) -> Result<TableCounts, StoreError> {
        Ok(TableCounts {
            locations: self.count("locations").await?,
            events: self.count("events").await?,
            event_types: self.count("event_types").await?,
            assignments: self.count("events_event_types").await?,
            schedules: self.count("event_schedules").await?,
            pricing: self.count("event_pricing").await?,
        })
    }
}

/// Round-trips made against an [`InMemoryEventStore`], per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCalls {
    pub location_upserts: usize,
    pub event_upserts: usize,
    pub event_type_upserts: usize,
    pub assignment_writes: usize,
    pub schedule_writes: usize,
    pub pricing_writes: usize,
}

#[derive(Debug, Clone)]
struct StoredEvent {
    id: RowId,
    row: EventRow,
    location_id: RowId,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: RowId,
    locations: HashMap<(String, String, String), RowId>,
    events: HashMap<String, StoredEvent>,
    event_types: HashMap<String, (RowId, EventTypeRow)>,
    assignments: BTreeMap<(RowId, RowId), TypeAssignmentRow>,
    schedules: BTreeMap<RowId, Vec<ScheduleRow>>,
    pricing: BTreeMap<RowId, Vec<PricingRow>>,
    calls: StoreCalls,
}

impl MemoryState {
    fn allocate(&mut self) -> RowId {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    state: Mutex<MemoryState>,
    failing_uids: Vec<String>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Event upserts for these uids fail with [`StoreError::Message`].
    pub fn with_failing_uids<I, S>(uids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: Mutex::default(),
            failing_uids: uids.into_iter().map(Into::into).collect(),
        }
    }

    pub async fn calls(&self) -> StoreCalls {
        self.state.lock().await.calls
    }

    pub async fn event(&self, uid: &str) -> Option<(EventRow, RowId)> {
        let state = self.state.lock().await;
        state
            .events
            .get(uid)
            .map(|stored| (stored.row.clone(), stored.location_id))
    }

    pub async fn schedules_for(&self, uid: &str) -> Vec<ScheduleRow> {
        let state = self.state.lock().await;
        state
            .events
            .get(uid)
            .and_then(|stored| state.schedules.get(&stored.id))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn pricing_for(&self, uid: &str) -> Vec<PricingRow> {
        let state = self.state.lock().await;
        state
            .events
            .get(uid)
            .and_then(|stored| state.pricing.get(&stored.id))
            .cloned()
            .unwrap_or_default()
    }

    /// Type codes assigned to the event, with their confidence.
    pub async fn assignments_for(&self, uid: &str) -> Vec<(String, f64)> {
        let state = self.state.lock().await;
        let Some(event_id) = state.events.get(uid).map(|stored| stored.id) else {
            return Vec::new();
        };
        state
            .assignments
            .iter()
            .filter(|((event, _), _)| *event == event_id)
            .filter_map(|((_, type_id), row)| {
                state
                    .event_types
                    .values()
                    .find(|(id, _)| id == type_id)
                    .map(|(_, ty)| (ty.code.clone(), row.confidence_score))
            })
            .collect()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn upsert_location(&self, row: &LocationRow) -> Result<RowId, StoreError> {
        let mut state = self.state.lock().await;
        state.calls.location_upserts += 1;
        let key = row.natural_key();
        if let Some(id) = state.locations.get(&key) {
            return Ok(*id);
        }
        let id = state.allocate();
        state.locations.insert(key, id);
        Ok(id)
    }

    async fn upsert_event(&self, row: &EventRow, location_id: RowId) -> Result<RowId, StoreError> {
        let mut state = self.state.lock().await;
        state.calls.event_upserts += 1;
        if self.failing_uids.iter().any(|uid| uid == &row.uid) {
            return Err(StoreError::Message(format!(
                "simulated write failure for event {}",
                row.uid
            )));
        }
        if !state.locations.values().any(|id| *id == location_id) {
            return Err(StoreError::Message(format!(
                "location {location_id} does not exist"
            )));
        }
        let id = match state.events.get(&row.uid) {
            Some(existing) => existing.id,
            None => state.allocate(),
        };
        state.events.insert(
            row.uid.clone(),
            StoredEvent {
                id,
                row: row.clone(),
                location_id,
            },
        );
        Ok(id)
    }

    async fn upsert_event_type(&self, row: &EventTypeRow) -> Result<RowId, StoreError> {
        let mut state = self.state.lock().await;
        state.calls.event_type_upserts += 1;
        if let Some((id, _)) = state.event_types.get(&row.code) {
            return Ok(*id);
        }
        let id = state.allocate();
        state.event_types.insert(row.code.clone(), (id, row.clone()));
        Ok(id)
    }

    async fn replace_type_assignment(
        &self,
        event_id: RowId,
        event_type_id: RowId,
        row: &TypeAssignmentRow,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.calls.assignment_writes += 1;
        state
            .assignments
            .retain(|(event, ty), _| *event != event_id || *ty == event_type_id);
        state
            .assignments
            .insert((event_id, event_type_id), row.clone());
        Ok(())
    }

    async fn replace_schedule(
        &self,
        event_id: RowId,
        row: Option<&ScheduleRow>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.calls.schedule_writes += 1;
        state.schedules.remove(&event_id);
        if let Some(row) = row {
            state.schedules.insert(event_id, vec![row.clone()]);
        }
        Ok(())
    }

    async fn replace_pricing(
        &self,
        event_id: RowId,
        row: Option<&PricingRow>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.calls.pricing_writes += 1;
        state.pricing.remove(&event_id);
        if let Some(row) = row {
            state.pricing.insert(event_id, vec![row.clone()]);
        }
        Ok(())
    }

    async fn table_counts(&self) -> Result<TableCounts, StoreError> {
        let state = self.state.lock().await;
        Ok(TableCounts {
            locations: state.locations.len() as u64,
            events: state.events.len() as u64,
            event_types: state.event_types.len() as u64,
            assignments: state.assignments.len() as u64,
            schedules: state.schedules.values().map(Vec::len).sum::<usize>() as u64,
            pricing: state.pricing.values().map(Vec::len).sum::<usize>() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(city: &str, address: &str) -> LocationRow {
        LocationRow {
            city: city.into(),
            country: "France".into(),
            address: address.into(),
        }
    }

    fn event(uid: &str, title: &str) -> EventRow {
        EventRow {
            uid: uid.into(),
            title: title.into(),
            description: None,
            event_date: None,
        }
    }

    #[tokio::test]
    async fn location_triple_resolves_to_first_row() {
        let store = InMemoryEventStore::new();
        let a = store.upsert_location(&location("Lyon", "")).await.expect("a");
        let b = store.upsert_location(&location("Lyon", "")).await.expect("b");
        let c = store
            .upsert_location(&location("Lyon", "1 quai Perrache"))
            .await
            .expect("c");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.table_counts().await.expect("counts").locations, 2);
    }

    #[tokio::test]
    async fn event_upsert_overwrites_by_uid() {
        let store = InMemoryEventStore::new();
        let loc = store.upsert_location(&location("Lyon", "")).await.expect("loc");
        let first = store.upsert_event(&event("evt-1", "Old"), loc).await.expect("first");
        let second = store.upsert_event(&event("evt-1", "New"), loc).await.expect("second");
        assert_eq!(first, second);
        let (row, _) = store.event("evt-1").await.expect("stored");
        assert_eq!(row.title, "New");
    }

    #[tokio::test]
    async fn event_with_unknown_location_is_rejected() {
        let store = InMemoryEventStore::new();
        let err = store.upsert_event(&event("evt-1", "Orphan"), 42).await;
        assert!(matches!(err, Err(StoreError::Message(_))));
    }

    #[tokio::test]
    async fn schedule_replacement_keeps_one_row() {
        let store = InMemoryEventStore::new();
        let loc = store.upsert_location(&location("Lyon", "")).await.expect("loc");
        let id = store.upsert_event(&event("evt-1", "Concert"), loc).await.expect("event");
        let schedule = ScheduleRow {
            starts_at: None,
            ends_at: None,
            timezone: "Europe/Paris".into(),
            is_all_day: false,
            source_date_text: Some("Samedi".into()),
        };
        store.replace_schedule(id, Some(&schedule)).await.expect("1");
        store.replace_schedule(id, Some(&schedule)).await.expect("2");
        assert_eq!(store.schedules_for("evt-1").await.len(), 1);
        store.replace_schedule(id, None).await.expect("3");
        assert!(store.schedules_for("evt-1").await.is_empty());
    }
}
