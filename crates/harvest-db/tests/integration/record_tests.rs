use chrono::{TimeZone, Utc};
use harvest_core::{AppError, RawRecord, RecordStore};
use serde_json::{Map, Value, json};

use crate::common::setup_test_db;

fn record(id: &str, source: &str, data: Value, day: u32) -> RawRecord {
    let data: Map<String, Value> = match data {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let mut record = RawRecord::new(id, source, data);
    record.collected_at = Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap();
    record
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn store_and_fetch_record() {
    let (db, _container) = setup_test_db().await;
    let repo = db.record_repo();

    let stored = record(
        "ch_01234567",
        "companies_house",
        json!({"name": "ACME LIMITED", "address": {"locality": "London"}}),
        1,
    );
    repo.store_raw_record(&stored).await.unwrap();

    let fetched = repo.get_raw_record("ch_01234567").await.unwrap();
    assert_eq!(fetched, stored);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn storing_same_id_replaces_record() {
    let (db, _container) = setup_test_db().await;
    let repo = db.record_repo();

    repo.upsert(&record("oc_gb_1", "opencorporates", json!({"current_status": "Active"}), 1))
        .await
        .unwrap();
    repo.upsert(&record("oc_gb_1", "opencorporates", json!({"current_status": "Dissolved"}), 2))
        .await
        .unwrap();

    let fetched = repo.get("oc_gb_1").await.unwrap();
    assert_eq!(fetched.data["current_status"], "Dissolved");
    assert_eq!(fetched.collected_at.format("%d").to_string(), "02");
    assert_eq!(repo.count_by_source("opencorporates").await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn missing_record_is_not_found() {
    let (db, _container) = setup_test_db().await;

    let err = db.record_repo().get_raw_record("ch_nope").await.unwrap_err();
    assert!(matches!(err, AppError::RecordNotFound(ref id) if id == "ch_nope"));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn list_by_source_is_newest_first_and_limited() {
    let (db, _container) = setup_test_db().await;
    let repo = db.record_repo();

    for (id, day) in [("ch_1", 1), ("ch_2", 3), ("ch_3", 2)] {
        repo.upsert(&record(id, "companies_house", json!({"n": id}), day))
            .await
            .unwrap();
    }
    repo.upsert(&record("oc_gb_9", "opencorporates", json!({}), 5))
        .await
        .unwrap();

    let listed = repo.list_by_source("companies_house", 2).await.unwrap();
    let ids: Vec<_> = listed.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["ch_2", "ch_3"]);
    assert!(listed.iter().all(|r| r.source == "companies_house"));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn health_check_succeeds() {
    let (db, _container) = setup_test_db().await;
    db.health_check().await.unwrap();
}
