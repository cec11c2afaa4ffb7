mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use dbsync::cdc::applier::{CdcApplier, ConflictResolution};
use dbsync::cdc::bridge::{ChangeHandler, ChangeStreamBridge};
use dbsync::cdc::producer::{write_properties_file, SubprocessProducer};
use dbsync::connectors::{Connector, DatabaseType};
use dbsync::models::ChangeEvent;
use dbsync::retry::RetryPolicy;
use dbsync::schema_manager::SchemaManager;

use common::{row, users_schema, MockConnector, MockDatabase};

struct Fixture {
    source_db: Arc<MockDatabase>,
    target_db: Arc<MockDatabase>,
    applier: Arc<CdcApplier>,
}

fn fixture_with(apply_deletes: bool, conflict_resolution: ConflictResolution) -> Fixture {
    let source_db = MockDatabase::new();
    let target_db = MockDatabase::new();
    let source = MockConnector::new(Arc::clone(&source_db), DatabaseType::PostgreSql);
    let target = MockConnector::new(Arc::clone(&target_db), DatabaseType::MySql);

    let schema_manager = Arc::new(SchemaManager::new(
        source as Arc<dyn Connector>,
        target.clone() as Arc<dyn Connector>,
        true,
    ));

    let applier = Arc::new(CdcApplier::new(
        target as Arc<dyn Connector>,
        schema_manager,
        apply_deletes,
        conflict_resolution,
        RetryPolicy::new(3, Duration::from_millis(1), 2.0),
    ));

    Fixture {
        source_db,
        target_db,
        applier,
    }
}

fn fixture() -> Fixture {
    fixture_with(true, ConflictResolution::SourceWins)
}

fn event(op: &str, table: &str, before: serde_json::Value, after: serde_json::Value) -> ChangeEvent {
    ChangeEvent::from_debezium_message(&json!({
        "payload": {
            "op": op,
            "before": before,
            "after": after,
            "source": {"table": table, "ts_ms": 1_700_000_000_000i64},
        }
    }))
}

#[tokio::test]
async fn insert_event_lands_one_row() {
    let fx = fixture();
    fx.source_db.add_table(users_schema("t"), Vec::new());
    fx.target_db.add_table(users_schema("t"), Vec::new());

    let e = event("c", "t", json!(null), json!({"id": 1, "name": "X"}));
    fx.applier.process_event(&e).await.unwrap();

    let rows = fx.target_db.rows("t");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&json!("X")));

    let stats = fx.applier.statistics();
    assert_eq!(stats.inserts, 1);
    assert_eq!(stats.updates, 0);
    assert_eq!(stats.errors, 0);
    assert_eq!(fx.target_db.insert_calls_for("t"), 1);
}

#[tokio::test]
async fn applying_the_same_insert_twice_converges_to_one_row() {
    let fx = fixture();
    fx.source_db.add_table(users_schema("t"), Vec::new());
    fx.target_db.add_table(users_schema("t"), Vec::new());

    let e = event("c", "t", json!(null), json!({"id": 1, "name": "X"}));
    fx.applier.process_event(&e).await.unwrap();
    fx.applier.process_event(&e).await.unwrap();

    assert_eq!(fx.target_db.rows("t").len(), 1);
    let stats = fx.applier.statistics();
    // Second delivery hits the duplicate key and converts to an update.
    assert_eq!(stats.inserts, 1);
    assert_eq!(stats.updates, 1);
    assert!(stats.inserts + stats.updates >= 1);
}

#[tokio::test]
async fn update_without_matching_row_falls_back_to_insert() {
    let fx = fixture();
    fx.source_db.add_table(users_schema("t"), Vec::new());
    fx.target_db.add_table(users_schema("t"), Vec::new());

    let e = event(
        "u",
        "t",
        json!({"id": 7, "name": "old"}),
        json!({"id": 7, "name": "new"}),
    );
    fx.applier.process_event(&e).await.unwrap();

    let rows = fx.target_db.rows("t");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&json!("new")));

    let stats = fx.applier.statistics();
    assert_eq!(stats.inserts, 1);
    assert_eq!(stats.updates, 0);
}

#[tokio::test]
async fn update_with_matching_row_applies_in_place() {
    let fx = fixture();
    fx.source_db.add_table(users_schema("t"), Vec::new());
    fx.target_db.add_table(
        users_schema("t"),
        vec![row(&[("id", json!(7)), ("name", json!("old"))])],
    );

    let e = event(
        "u",
        "t",
        json!({"id": 7, "name": "old"}),
        json!({"id": 7, "name": "new"}),
    );
    fx.applier.process_event(&e).await.unwrap();

    let rows = fx.target_db.rows("t");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&json!("new")));
    assert_eq!(fx.applier.statistics().updates, 1);
}

#[tokio::test]
async fn target_wins_skips_updates_but_not_inserts() {
    let fx = fixture_with(true, ConflictResolution::TargetWins);
    fx.source_db.add_table(users_schema("t"), Vec::new());
    fx.target_db.add_table(
        users_schema("t"),
        vec![row(&[("id", json!(1)), ("name", json!("kept"))])],
    );

    let update = event(
        "u",
        "t",
        json!({"id": 1, "name": "kept"}),
        json!({"id": 1, "name": "overwritten"}),
    );
    fx.applier.process_event(&update).await.unwrap();

    let rows = fx.target_db.rows("t");
    assert_eq!(rows[0].get("name"), Some(&json!("kept")));
    assert_eq!(fx.applier.statistics().updates, 0);

    // Inserts for new rows still apply.
    let insert = event("c", "t", json!(null), json!({"id": 2, "name": "new"}));
    fx.applier.process_event(&insert).await.unwrap();
    assert_eq!(fx.target_db.rows("t").len(), 2);
}

#[tokio::test]
async fn delete_event_removes_the_row() {
    let fx = fixture();
    fx.source_db.add_table(users_schema("t"), Vec::new());
    fx.target_db.add_table(
        users_schema("t"),
        vec![row(&[("id", json!(1)), ("name", json!("X"))])],
    );

    let e = event("d", "t", json!({"id": 1, "name": "X"}), json!(null));
    fx.applier.process_event(&e).await.unwrap();

    assert!(fx.target_db.rows("t").is_empty());
    assert_eq!(fx.applier.statistics().deletes, 1);
}

#[tokio::test]
async fn delete_toggle_off_never_deletes() {
    let fx = fixture_with(false, ConflictResolution::SourceWins);
    fx.source_db.add_table(users_schema("t"), Vec::new());
    fx.target_db.add_table(
        users_schema("t"),
        vec![row(&[("id", json!(1)), ("name", json!("X"))])],
    );

    let e = event("d", "t", json!({"id": 1, "name": "X"}), json!(null));
    fx.applier.process_event(&e).await.unwrap();

    assert_eq!(fx.target_db.rows("t").len(), 1);
    assert_eq!(fx.applier.statistics().deletes, 0);
}

#[tokio::test]
async fn snapshot_read_events_apply_as_inserts() {
    let fx = fixture();
    fx.source_db.add_table(users_schema("t"), Vec::new());
    fx.target_db.add_table(users_schema("t"), Vec::new());

    let e = event("r", "t", json!(null), json!({"id": 3, "name": "snap"}));
    fx.applier.process_event(&e).await.unwrap();

    assert_eq!(fx.target_db.rows("t").len(), 1);
    assert_eq!(fx.applier.statistics().inserts, 1);
}

#[tokio::test]
async fn missing_target_table_is_created_from_source_schema() {
    let fx = fixture();
    fx.source_db.add_table(users_schema("t"), Vec::new());
    // Target knows nothing about "t".

    let e = event("c", "t", json!(null), json!({"id": 1, "name": "X"}));
    fx.applier.process_event(&e).await.unwrap();

    let created = fx.target_db.schema("t").expect("auto-created table");
    // The schema manager ran the converter for the MySQL target.
    assert_eq!(created.get_column("id").unwrap().data_type, "INT");
    assert_eq!(fx.target_db.rows("t").len(), 1);
}

#[tokio::test]
async fn persistent_failure_surfaces_after_retry_budget() {
    let fx = fixture();
    fx.source_db.add_table(users_schema("t"), Vec::new());
    fx.target_db.add_table(users_schema("t"), Vec::new());
    fx.target_db.fail_inserts_on("t");

    let e = event("c", "t", json!(null), json!({"id": 1, "name": "X"}));
    let err = fx.applier.process_event(&e).await.unwrap_err();
    assert!(err.contains("Injected insert failure"));

    // One error recorded per failed attempt.
    assert_eq!(fx.applier.statistics().errors, 3);
    assert_eq!(fx.applier.statistics().inserts, 0);
}

#[tokio::test]
async fn statistics_reset_clears_counters() {
    let fx = fixture();
    fx.source_db.add_table(users_schema("t"), Vec::new());
    fx.target_db.add_table(users_schema("t"), Vec::new());

    let e = event("c", "t", json!(null), json!({"id": 1, "name": "X"}));
    fx.applier.process_event(&e).await.unwrap();
    assert_eq!(fx.applier.statistics().inserts, 1);

    fx.applier.reset_statistics();
    assert_eq!(fx.applier.statistics().inserts, 0);
}

/// Wires the bridge to the applier the same way the engine does.
struct ApplyHandler {
    applier: Arc<CdcApplier>,
}

#[async_trait]
impl ChangeHandler for ApplyHandler {
    async fn handle(&self, envelope: serde_json::Value) -> Result<(), String> {
        if envelope.is_null() {
            return Ok(());
        }
        let event = ChangeEvent::from_debezium_message(&envelope);
        if event.table_name.is_empty() {
            return Ok(());
        }
        self.applier.process_event(&event).await
    }
}

#[tokio::test]
async fn bridge_feeds_wire_envelopes_through_to_the_target() {
    let fx = fixture();
    fx.source_db.add_table(users_schema("t"), Vec::new());
    fx.target_db.add_table(users_schema("t"), Vec::new());

    let bridge = ChangeStreamBridge::new(64);
    let handler = Arc::new(ApplyHandler {
        applier: Arc::clone(&fx.applier),
    });
    bridge.start(handler).await.unwrap();

    let sink = bridge.sink();
    sink.send(
        json!({"payload": {"op": "c", "before": null, "after": {"id": 1, "name": "X"},
               "source": {"table": "t", "ts_ms": 0}}})
        .to_string(),
    )
    .await
    .unwrap();
    sink.send(
        json!({"payload": {"op": "u", "before": {"id": 1, "name": "X"},
               "after": {"id": 1, "name": "Y"},
               "source": {"table": "t", "ts_ms": 1}}})
        .to_string(),
    )
    .await
    .unwrap();
    // An unknown op decodes to READ and applies as an insert.
    sink.send(
        json!({"payload": {"op": "z", "before": null, "after": {"id": 2, "name": "Z"},
               "source": {"table": "t", "ts_ms": 2}}})
        .to_string(),
    )
    .await
    .unwrap();

    // Wait for the single consumer to drain the queue in order.
    for _ in 0..200 {
        if fx.target_db.rows("t").len() == 2
            && fx.target_db.rows("t")[0].get("name") == Some(&json!("Y"))
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bridge.stop().await;

    let rows = fx.target_db.rows("t");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("name"), Some(&json!("Y")));
    assert_eq!(rows[1].get("name"), Some(&json!("Z")));

    let stats = fx.applier.statistics();
    assert_eq!(stats.inserts, 2);
    assert_eq!(stats.updates, 1);
}

#[tokio::test]
async fn subprocess_producer_forwards_envelopes_from_child_stdout() {
    let fx = fixture();
    fx.source_db.add_table(users_schema("t"), Vec::new());
    fx.target_db.add_table(users_schema("t"), Vec::new());

    let dir = tempfile::tempdir().unwrap();
    let fixture_path = dir.path().join("envelopes.jsonl");
    let envelopes = format!(
        "{}\n{}\n",
        json!({"payload": {"op": "c", "before": null, "after": {"id": 10, "name": "a"},
               "source": {"table": "t", "ts_ms": 0}}}),
        json!({"payload": {"op": "c", "before": null, "after": {"id": 11, "name": "b"},
               "source": {"table": "t", "ts_ms": 1}}}),
    );
    std::fs::write(&fixture_path, envelopes).unwrap();

    // The producer host appends the properties path as its last argument;
    // an empty properties file keeps `cat` output to the fixture alone.
    let properties_path = dir.path().join("producer.properties");
    write_properties_file(&properties_path, &std::collections::BTreeMap::new()).unwrap();

    let bridge = ChangeStreamBridge::new(16);
    bridge.set_producer(Arc::new(SubprocessProducer::new(
        &format!("cat {}", fixture_path.display()),
        properties_path,
    )));
    bridge
        .start(Arc::new(ApplyHandler {
            applier: Arc::clone(&fx.applier),
        }))
        .await
        .unwrap();

    for _ in 0..200 {
        if fx.target_db.rows("t").len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bridge.stop().await;

    assert_eq!(fx.target_db.rows("t").len(), 2);
    assert_eq!(fx.applier.statistics().inserts, 2);
}
