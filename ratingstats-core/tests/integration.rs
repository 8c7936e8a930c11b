//! Integration tests for the statistics pipeline
//!
//! These tests load the form definitions in `tests/fixtures/forms.json` into a
//! SQLite reference host and drive the service, cache, jobs and exports
//! end to end.

use chrono::{Duration, Utc};
use ratingstats_core::analytics::RatingMetrics;
use ratingstats_core::cache::{FileStore, SqliteKvStore, ExternalStore};
use ratingstats_core::config::FieldsConfig;
use ratingstats_core::jobs::{JobQueue, MemoryQueue, Worker};
use ratingstats_core::{
    CacheKey, CacheRegenerationJob, Database, DateRange, FieldValue, FormDefinition, Schedule,
    StatisticsCache, StatisticsService, SubmissionEvents,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Get the path to a fixture file
fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn load_fixture_forms(db: &Database) {
    let raw = std::fs::read_to_string(fixture_path("forms.json")).expect("fixture should exist");
    let definitions: Vec<FormDefinition> = serde_json::from_str(&raw).expect("fixture should parse");
    for definition in definitions {
        db.import_form(definition, &FieldsConfig::default())
            .expect("fixture form should import");
    }
}

fn values(pairs: &[(&str, FieldValue)]) -> BTreeMap<String, FieldValue> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Form 34 with overall ratings [5,4,5,3,5]
fn seeded_db() -> Arc<Database> {
    ratingstats_core::logging::init_test();
    let db = Database::open_in_memory().unwrap();
    db.migrate().unwrap();
    load_fixture_forms(&db);

    let now = Utc::now();
    let rows = [
        (5.0, 10.0, "Downtown"),
        (4.0, 9.0, "Downtown"),
        (5.0, 8.0, "Airport"),
        (3.0, 4.0, ""),
        (5.0, 10.0, "Airport"),
    ];
    for (i, (overall, recommend, branch)) in rows.iter().enumerate() {
        db.insert_submission(
            34,
            now - Duration::hours(i as i64),
            values(&[
                ("overall", FieldValue::Number(*overall)),
                ("recommend", FieldValue::Number(*recommend)),
                ("branch", FieldValue::Text(branch.to_string())),
            ]),
        )
        .unwrap();
    }
    db.insert_submission(35, now, values(&[("mood", FieldValue::Text("4".to_string()))]))
        .unwrap();

    Arc::new(db)
}

fn service_over(db: Arc<Database>, cache: StatisticsCache) -> StatisticsService {
    StatisticsService::builder()
        .source(db)
        .cache(Arc::new(cache))
        .build()
        .expect("service should build")
}

// ============================================
// Statistics
// ============================================

#[test]
fn test_star_field_scenario() {
    let service = service_over(seeded_db(), StatisticsCache::in_memory());
    let form = service.form(34).unwrap();
    let field = service.rating_field(&form, "overall").unwrap();

    let stats = service
        .field_statistics(&form, &field, DateRange::All, None)
        .unwrap();
    let summary = stats.as_summary().unwrap();
    assert_eq!(summary.total_responses, 5);

    let RatingMetrics::Scale(metrics) = &summary.metrics else {
        panic!("expected scale metrics");
    };
    assert_eq!(metrics.average, 4.4);
    assert_eq!(metrics.median, 5.0);
    assert_eq!(metrics.mode, Some(5.0));

    let counts: Vec<(f64, usize)> = metrics
        .distribution
        .iter()
        .map(|b| (b.value, b.count))
        .collect();
    assert_eq!(
        counts,
        vec![(1.0, 0), (2.0, 0), (3.0, 1), (4.0, 1), (5.0, 3)]
    );
    let percentages: Vec<f64> = metrics.distribution.iter().map(|b| b.percentage).collect();
    assert_eq!(percentages, vec![0.0, 0.0, 20.0, 20.0, 60.0]);
}

#[test]
fn test_nps_and_grouping() {
    let service = service_over(seeded_db(), StatisticsCache::in_memory());
    let form = service.form(34).unwrap();
    let recommend = service.rating_field(&form, "recommend").unwrap();

    let stats = service
        .field_statistics(&form, &recommend, DateRange::Last7Days, None)
        .unwrap();
    let RatingMetrics::Nps(nps) = &stats.as_summary().unwrap().metrics else {
        panic!("expected NPS metrics");
    };
    assert_eq!((nps.promoters, nps.passives, nps.detractors), (3, 1, 1));
    assert_eq!(nps.nps_score, 40.0);

    let grouped = service
        .grouped_statistics(&form, &recommend, DateRange::All, "branch")
        .unwrap();
    let labels: Vec<&str> = grouped.groups.iter().map(|g| g.label.as_str()).collect();
    assert_eq!(labels, vec!["Airport", "Downtown", "(Not Set)"]);
}

#[test]
fn test_cached_result_is_byte_identical() {
    let service = service_over(seeded_db(), StatisticsCache::in_memory());
    let form = service.form(34).unwrap();
    let field = service.rating_field(&form, "overall").unwrap();

    let fresh = service
        .field_statistics(&form, &field, DateRange::All, None)
        .unwrap();
    let cached = service
        .field_statistics(&form, &field, DateRange::All, None)
        .unwrap();
    assert_eq!(
        serde_json::to_vec(&fresh).unwrap(),
        serde_json::to_vec(&cached).unwrap()
    );

    let key = CacheKey::new(34, "overall", DateRange::All, None);
    assert!(service.cache().get(&key).is_some());
    assert!(service.clear_all_cache());
    assert!(service.cache().get(&key).is_none());
}

// ============================================
// Cache stores
// ============================================

#[test]
fn test_file_store_layout() {
    let dir = TempDir::new().unwrap();
    let cache_dir = dir.path().join("statistics");
    let service = service_over(seeded_db(), StatisticsCache::new(FileStore::new(&cache_dir)));
    let form = service.form(34).unwrap();
    let field = service.rating_field(&form, "overall").unwrap();

    service
        .field_statistics(&form, &field, DateRange::Last30Days, None)
        .unwrap();

    let key = CacheKey::new(34, "overall", DateRange::Last30Days, None);
    let path = cache_dir.join(key.file_name());
    assert!(path.exists(), "expected cache file at {}", path.display());
    assert_eq!(key.file_name().len(), 32 + ".cache".len());
    assert_eq!(service.cache_count(), 1);

    assert!(service.clear_cache_for_form(34));
    assert!(!path.exists());
}

#[test]
fn test_external_store_shared_between_services() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("cache.db");
    let db = seeded_db();

    let writer = service_over(
        db.clone(),
        StatisticsCache::new(ExternalStore::new(SqliteKvStore::open(&store_path).unwrap())),
    );
    let reader = service_over(
        db,
        StatisticsCache::new(ExternalStore::new(SqliteKvStore::open(&store_path).unwrap())),
    );

    let form = writer.form(35).unwrap();
    let field = writer.rating_field(&form, "mood").unwrap();
    let written = writer
        .field_statistics(&form, &field, DateRange::All, None)
        .unwrap();

    let key = CacheKey::new(35, "mood", DateRange::All, None);
    assert_eq!(reader.cache().get(&key), Some(written));
    assert_eq!(reader.cache_count(), 1);
}

// ============================================
// Regeneration
// ============================================

#[test]
fn test_regeneration_through_database_queue() {
    let db = seeded_db();
    let service = Arc::new(service_over(db.clone(), StatisticsCache::in_memory()));

    db.push(&CacheRegenerationJob::master(None, false), None).unwrap();
    let worker = Worker::new(service.clone(), db.clone(), Schedule::Manual);
    let summary = worker.drain(|_| {}).unwrap();

    // Form 34: 2 rating fields x 4 ranges x (ungrouped + branch) = 16
    // Form 35: 1 rating field x 4 ranges = 4
    assert_eq!(summary.completed, 1 + 16 + 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(service.cache_count(), 20);
    assert_eq!(db.pending().unwrap(), 0);
}

#[test]
fn test_batch_for_deleted_form_completes_without_work() {
    let db = seeded_db();
    let service = Arc::new(service_over(db.clone(), StatisticsCache::in_memory()));
    let queue = Arc::new(MemoryQueue::new());

    queue.push(&CacheRegenerationJob::master(Some(35), false), None).unwrap();
    let worker = Worker::new(service.clone(), queue.clone(), Schedule::Manual);
    worker.run_once().unwrap().unwrap();
    assert_eq!(queue.pending().unwrap(), 4);

    db.delete_form(35).unwrap();
    let summary = worker.drain(|_| {}).unwrap();
    assert_eq!(summary.completed, 4);
    assert_eq!(service.cache_count(), 0);
}

#[test]
fn test_submission_events_follow_schedule() {
    let db = seeded_db();
    let service = Arc::new(service_over(db.clone(), StatisticsCache::in_memory()));
    let form = service.form(34).unwrap();
    let field = service.rating_field(&form, "overall").unwrap();
    service
        .field_statistics(&form, &field, DateRange::All, None)
        .unwrap();

    let scheduled = SubmissionEvents::new(service.clone(), Schedule::Daily2am);
    let submission = db
        .insert_submission(34, Utc::now(), values(&[("overall", FieldValue::Number(1.0))]))
        .unwrap();
    assert!(!scheduled.on_submission_saved(34));
    let stale = service
        .field_statistics(&form, &field, DateRange::All, None)
        .unwrap();
    assert_eq!(stale.as_summary().unwrap().total_responses, 5);

    let manual = SubmissionEvents::new(service.clone(), Schedule::Manual);
    assert!(manual.on_submission_saved(34));
    let fresh = service
        .field_statistics(&form, &field, DateRange::All, None)
        .unwrap();
    assert_eq!(fresh.as_summary().unwrap().total_responses, 6);

    db.delete_submission(submission.id).unwrap();
    assert!(manual.on_submission_deleted(34));
    assert_eq!(service.cache_count(), 0);
}

// ============================================
// Exports
// ============================================

#[test]
fn test_grouped_csv_export() {
    let service = service_over(seeded_db(), StatisticsCache::in_memory());
    let form = service.form(34).unwrap();

    let csv = service
        .generate_csv_export(&form, DateRange::All, Some("branch"))
        .unwrap();
    let mut lines = csv.lines();
    assert_eq!(
        lines.next().unwrap(),
        "Branch,Submissions Count,Overall Experience - Average,Overall Experience - Median,\
         Would you recommend us? - NPS Score,Would you recommend us? - Promoters,\
         Would you recommend us? - Passives,Would you recommend us? - Detractors"
    );
    assert_eq!(csv.lines().count(), 4);

    let json = service
        .generate_json_export(&form, DateRange::All, None)
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["form"]["handle"], "customerFeedback");
    assert_eq!(value["submissions"].as_array().unwrap().len(), 5);
    assert_eq!(value["summary"]["overall"]["average"], 4.4);
}
