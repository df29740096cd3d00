//! Parquet snapshots of one run's enrichment output, plus a hash manifest.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agenda_core::{EnrichedEventRecord, FailureRecord};
use anyhow::{Context, Result};
use arrow_array::{BooleanArray, Float64Array, RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub schema_version: u32,
    pub files: Vec<SnapshotManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifestFile {
    pub name: String,
    pub path: String,
    pub rows: usize,
    pub sha256: String,
    pub bytes: u64,
}

/// Writes `snapshots/{events,event_skills,failures}.parquet` under
/// `reports_dir` and returns the manifest path.
pub fn export_snapshots(
    reports_dir: &Path,
    records: &[EnrichedEventRecord],
    failures: &[FailureRecord],
) -> Result<PathBuf> {
    let snapshot_dir = reports_dir.join("snapshots");
    std::fs::create_dir_all(&snapshot_dir)
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let events = records.iter().filter(|r| r.is_success()).collect::<Vec<_>>();
    let events_path = snapshot_dir.join("events.parquet");
    let skills_path = snapshot_dir.join("event_skills.parquet");
    let failures_path = snapshot_dir.join("failures.parquet");

    let event_rows = write_events_parquet(&events_path, &events)?;
    let skill_rows = write_skills_parquet(&skills_path, &events)?;
    let failure_rows = write_failures_parquet(&failures_path, failures)?;

    let manifest = SnapshotManifest {
        schema_version: SNAPSHOT_SCHEMA_VERSION,
        files: vec![
            manifest_entry("events", reports_dir, &events_path, event_rows)?,
            manifest_entry("event_skills", reports_dir, &skills_path, skill_rows)?,
            manifest_entry("failures", reports_dir, &failures_path, failure_rows)?,
        ],
    };

    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing snapshot manifest")?;
    std::fs::write(&manifest_path, bytes)
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_events_parquet(path: &Path, events: &[&EnrichedEventRecord]) -> Result<usize> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("source_id", DataType::Utf8, false),
        ArrowField::new("uid", DataType::Utf8, true),
        ArrowField::new("title", DataType::Utf8, true),
        ArrowField::new("city", DataType::Utf8, true),
        ArrowField::new("category", DataType::Utf8, false),
        ArrowField::new("latitude", DataType::Float64, true),
        ArrowField::new("longitude", DataType::Float64, true),
        ArrowField::new("geo_source", DataType::Utf8, true),
        ArrowField::new("starts_at", DataType::Utf8, true),
        ArrowField::new("ends_at", DataType::Utf8, true),
        ArrowField::new("is_free", DataType::Boolean, true),
        ArrowField::new("amount_min", DataType::Float64, true),
        ArrowField::new("amount_max", DataType::Float64, true),
        ArrowField::new("quality_score", DataType::UInt32, false),
    ]));

    let source_ids = StringArray::from(
        events
            .iter()
            .map(|e| Some(e.source_id.as_str()))
            .collect::<Vec<_>>(),
    );
    let uids = StringArray::from(events.iter().map(|e| e.uid.as_deref()).collect::<Vec<_>>());
    let titles = StringArray::from(events.iter().map(|e| e.title.as_deref()).collect::<Vec<_>>());
    let cities = StringArray::from(
        events
            .iter()
            .map(|e| e.location_city.as_deref())
            .collect::<Vec<_>>(),
    );
    let categories = StringArray::from(
        events
            .iter()
            .map(|e| Some(e.category.as_str()))
            .collect::<Vec<_>>(),
    );
    let latitudes = Float64Array::from(
        events
            .iter()
            .map(|e| e.geo.map(|g| g.latitude))
            .collect::<Vec<_>>(),
    );
    let longitudes = Float64Array::from(
        events
            .iter()
            .map(|e| e.geo.map(|g| g.longitude))
            .collect::<Vec<_>>(),
    );
    let geo_sources = StringArray::from(
        events
            .iter()
            .map(|e| e.geo.map(|g| g.source.as_str()))
            .collect::<Vec<_>>(),
    );
    let starts = StringArray::from(
        events
            .iter()
            .map(|e| e.dates.start.map(|d| d.to_rfc3339()))
            .collect::<Vec<_>>(),
    );
    let ends = StringArray::from(
        events
            .iter()
            .map(|e| e.dates.end.map(|d| d.to_rfc3339()))
            .collect::<Vec<_>>(),
    );
    let free = BooleanArray::from(events.iter().map(|e| e.pricing.is_free).collect::<Vec<_>>());
    let amount_min = Float64Array::from(
        events
            .iter()
            .map(|e| e.pricing.amount_min)
            .collect::<Vec<_>>(),
    );
    let amount_max = Float64Array::from(
        events
            .iter()
            .map(|e| e.pricing.amount_max)
            .collect::<Vec<_>>(),
    );
    let scores = UInt32Array::from(
        events
            .iter()
            .map(|e| u32::from(e.quality.score))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(source_ids),
            Arc::new(uids),
            Arc::new(titles),
            Arc::new(cities),
            Arc::new(categories),
            Arc::new(latitudes),
            Arc::new(longitudes),
            Arc::new(geo_sources),
            Arc::new(starts),
            Arc::new(ends),
            Arc::new(free),
            Arc::new(amount_min),
            Arc::new(amount_max),
            Arc::new(scores),
        ],
    )
    .context("building events record batch")?;
    write_parquet(path, batch)?;
    Ok(events.len())
}

fn write_skills_parquet(path: &Path, events: &[&EnrichedEventRecord]) -> Result<usize> {
    let rows = events
        .iter()
        .flat_map(|e| {
            e.skills
                .iter()
                .map(move |skill| (e.source_id.as_str(), skill.as_str()))
        })
        .collect::<Vec<_>>();

    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("source_id", DataType::Utf8, false),
        ArrowField::new("skill", DataType::Utf8, false),
    ]));
    let source_ids = StringArray::from(rows.iter().map(|(id, _)| Some(*id)).collect::<Vec<_>>());
    let skills = StringArray::from(rows.iter().map(|(_, s)| Some(*s)).collect::<Vec<_>>());
    let batch = RecordBatch::try_new(schema, vec![Arc::new(source_ids), Arc::new(skills)])
        .context("building event_skills record batch")?;
    write_parquet(path, batch)?;
    Ok(rows.len())
}

fn write_failures_parquet(path: &Path, failures: &[FailureRecord]) -> Result<usize> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("source_id", DataType::Utf8, false),
        ArrowField::new("code", DataType::Utf8, false),
        ArrowField::new("message", DataType::Utf8, false),
    ]));
    let source_ids = StringArray::from(
        failures
            .iter()
            .map(|f| Some(f.source_id.as_str()))
            .collect::<Vec<_>>(),
    );
    let codes = StringArray::from(
        failures
            .iter()
            .map(|f| Some(f.error.code.as_str()))
            .collect::<Vec<_>>(),
    );
    let messages = StringArray::from(
        failures
            .iter()
            .map(|f| Some(f.error.message.as_str()))
            .collect::<Vec<_>>(),
    );
    let batch = RecordBatch::try_new(
        schema,
        vec![Arc::new(source_ids), Arc::new(codes), Arc::new(messages)],
    )
    .context("building failures record batch")?;
    write_parquet(path, batch)?;
    Ok(failures.len())
}

fn manifest_entry(
    name: &str,
    reports_dir: &Path,
    path: &Path,
    rows: usize,
) -> Result<SnapshotManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rel = path
        .strip_prefix(reports_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(SnapshotManifestFile {
        name: name.to_string(),
        path: rel,
        rows,
        sha256: hex::encode(Sha256::digest(&bytes)),
        bytes: bytes.len() as u64,
    })
}
