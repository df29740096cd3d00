use std::path::{Path, PathBuf};

use agenda_adapters::InputFormat;
use agenda_core::{ErrorCode, FailureRecord};
use agenda_sync::{
    report_recent_runs, EnrichmentPipeline, EventStore, InMemoryEventStore, SyncConfig,
};

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn config(scratch: &Path, input: &str, format: InputFormat) -> SyncConfig {
    SyncConfig {
        database_url: "postgres://unused".to_string(),
        artifacts_dir: scratch.join("artifacts"),
        input_file: workspace_root().join(input),
        input_format: format,
        sync_enabled: false,
        timezone: "Europe/Paris".to_string(),
        workspace_root: scratch.to_path_buf(),
    }
}

#[tokio::test]
async fn raw_v2_fixture_enriches_reports_and_syncs_idempotently() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let pipeline = EnrichmentPipeline::new(config(
        scratch.path(),
        "fixtures/raw-v2/sample/raw-events.json",
        InputFormat::RawV2,
    ))
    .expect("pipeline");
    let store = InMemoryEventStore::new();

    let first = pipeline
        .run_with_store(Some(&store))
        .await
        .expect("first run");
    assert_eq!((first.attempted, first.succeeded, first.failed), (5, 3, 2));
    let sync = first.sync.as_ref().expect("sync report");
    assert_eq!((sync.eligible, sync.synced, sync.failed), (3, 3, 0));

    let counts = store.table_counts().await.expect("counts");
    assert_eq!(counts.events, 3);
    assert_eq!(counts.locations, 3);
    assert_eq!(counts.event_types, 3);

    let reports_dir = PathBuf::from(&first.reports_dir);
    for name in ["enriched_events.json", "failures.json", "run_brief.md"] {
        assert!(reports_dir.join(name).exists(), "{name} missing");
    }
    assert!(Path::new(&first.parquet_manifest).exists());
    assert!(first.raw_batch.absolute_path.exists());
    assert_eq!(first.raw_batch.content_hash.len(), 64);
    assert!(first.sync_error.is_none());

    let failures: Vec<FailureRecord> = serde_json::from_slice(
        &std::fs::read(reports_dir.join("failures.json")).expect("read failures"),
    )
    .expect("parse failures");
    let ids = failures.iter().map(|f| f.source_id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, ["record:r-004", "uid:evt-105"]);
    assert!(failures
        .iter()
        .all(|f| f.error.code == ErrorCode::MissingFields));

    let brief = std::fs::read_to_string(reports_dir.join("run_brief.md")).expect("brief");
    assert!(brief.contains("- Succeeded: 3"));
    assert!(brief.contains("- workshop: 1"));

    let second = pipeline
        .run_with_store(Some(&store))
        .await
        .expect("second run");
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.raw_batch.content_hash, second.raw_batch.content_hash);
    assert_eq!(store.table_counts().await.expect("counts"), counts);

    let (event, _) = store.event("evt-103").await.expect("evt-103");
    assert_eq!(event.title, "Exposition Moderne");
    let schedule = store.schedules_for("evt-103").await;
    assert_eq!(schedule.len(), 1);
    assert!(schedule[0].starts_at <= schedule[0].ends_at);

    let pricing = store.pricing_for("evt-102").await;
    assert_eq!(pricing.len(), 1);
    assert!(pricing[0].is_free);
    assert_eq!(pricing[0].label, "Gratuit");

    let digest = report_recent_runs(5, Some(scratch.path())).expect("digest");
    assert_eq!(digest.matches("## Run `").count(), 2);
    assert!(digest.contains("3 eligible, 3 synced, 0 failed"));
}

#[tokio::test]
async fn openagenda_fixture_runs_without_store() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let pipeline = EnrichmentPipeline::new(config(
        scratch.path(),
        "fixtures/openagenda/sample/payload.json",
        InputFormat::OpenAgenda,
    ))
    .expect("pipeline");

    let summary = pipeline.run_with_store(None).await.expect("run");
    assert_eq!(summary.attempted, 4);
    assert_eq!(summary.failed, 1);
    assert!(summary.sync.is_none());

    let raw_dir = scratch.path().join("artifacts").join("raw");
    assert!(raw_dir.exists());

    let digest = report_recent_runs(1, Some(scratch.path())).expect("digest");
    assert!(digest.contains("- sync: disabled"));
}

#[tokio::test]
async fn unreachable_database_still_leaves_reports_and_snapshots() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let mut config = config(
        scratch.path(),
        "fixtures/raw-v2/sample/raw-events.json",
        InputFormat::RawV2,
    );
    config.sync_enabled = true;
    config.database_url = "not-a-database-url".to_string();
    let pipeline = EnrichmentPipeline::new(config).expect("pipeline");

    let summary = pipeline.run_once().await.expect("run survives sync outage");
    assert_eq!((summary.attempted, summary.succeeded, summary.failed), (5, 3, 2));
    assert!(summary.sync.is_none());
    let error = summary.sync_error.as_deref().expect("sync error recorded");
    assert!(error.contains("connecting to event database"));

    let reports_dir = PathBuf::from(&summary.reports_dir);
    for name in ["enriched_events.json", "failures.json", "run_brief.md"] {
        assert!(reports_dir.join(name).exists(), "{name} missing");
    }
    assert!(Path::new(&summary.parquet_manifest).exists());
    let brief = std::fs::read_to_string(reports_dir.join("run_brief.md")).expect("brief");
    assert!(brief.contains("- Sync: unavailable"));

    let digest = report_recent_runs(1, Some(scratch.path())).expect("digest");
    assert!(digest.contains("- sync: unavailable"));
}

#[tokio::test]
async fn malformed_record_fails_alone_in_a_raw_batch() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let input = scratch.path().join("mixed.json");
    std::fs::write(
        &input,
        serde_json::json!([
            {"uid": "evt-1", "title_fr": "Concert jazz", "location_city": "Lyon"},
            {"uid": 48213377, "title_fr": "Expo", "title": "Expo", "location_city": "Paris"},
            "not a record"
        ])
        .to_string(),
    )
    .expect("write input");
    let mut config = config(scratch.path(), "unused.json", InputFormat::RawV2);
    config.input_file = input;
    let pipeline = EnrichmentPipeline::new(config).expect("pipeline");
    let store = InMemoryEventStore::new();

    let summary = pipeline.run_with_store(Some(&store)).await.expect("run");
    assert_eq!((summary.attempted, summary.succeeded, summary.failed), (3, 2, 1));
    assert!(store.event("evt-1").await.is_some());
    assert!(store.event("48213377").await.is_some());

    let failures: Vec<FailureRecord> = serde_json::from_slice(
        &std::fs::read(PathBuf::from(&summary.reports_dir).join("failures.json"))
            .expect("read failures"),
    )
    .expect("parse failures");
    assert_eq!(failures.len(), 1);
    assert!(failures[0].source_id.starts_with("hash:"));
}
