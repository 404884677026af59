use grnstore_model::{EntityWrite, HistoryRecord};
use grnstore_storage::{EntityStore, StorageError, StoreConfig};
use grnstore_types::{etag_of, Grn, ManualClock, TenantId};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

const TENANT: TenantId = TenantId::new(7);

fn dashboard(title: &str) -> EntityWrite {
    EntityWrite::new(TENANT, "dashboard", "dash-1")
        .with_json(&json!({"title": title}))
        .with_actor("user:1")
        .with_message(format!("set title to {title}"))
}

fn write_versions(store: &EntityStore, n: usize) -> Grn {
    let mut grn = None;
    for i in 1..=n {
        grn = Some(store.put(dashboard(&format!("v{i}")), None).unwrap().grn);
    }
    grn.unwrap()
}

fn versions(store: &EntityStore, grn: &Grn) -> Vec<i64> {
    store
        .list_versions(grn)
        .unwrap()
        .into_iter()
        .map(|r| r.version)
        .collect()
}

#[test]
fn every_write_appends_a_record() {
    let store = EntityStore::open_in_memory().unwrap();
    let grn = write_versions(&store, 3);

    let records = store.list_versions(&grn).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[1].version, 2);
    assert_eq!(records[1].message, "set title to v2");
    assert_eq!(records[1].updated_by, "user:1");
    let body = records[1].body.clone().unwrap();
    assert_eq!(records[1].etag, etag_of(&body));
    assert_eq!(records[1].size, body.len() as i64);
}

#[test]
fn delete_keeps_history() {
    let store = EntityStore::open_in_memory().unwrap();
    let grn = write_versions(&store, 2);
    store.delete(&grn, None, "user:2").unwrap();

    assert_eq!(versions(&store, &grn), vec![1, 2]);
    assert_eq!(store.history_version(&grn, 2).unwrap().updated_by, "user:1");
}

#[test]
fn history_version_reads_one_record() {
    let store = EntityStore::open_in_memory().unwrap();
    let grn = write_versions(&store, 2);

    let record = store.history_version(&grn, 1).unwrap();
    assert_eq!(record.message, "set title to v1");
    assert!(matches!(
        store.history_version(&grn, 9),
        Err(StorageError::NotFound(_))
    ));
}

#[test]
fn records_are_immutable() {
    let store = EntityStore::open_in_memory().unwrap();
    let grn = write_versions(&store, 1);
    let original = store.history_version(&grn, 1).unwrap();

    let forged = HistoryRecord {
        message: "rewritten".into(),
        ..original.clone()
    };
    let err = store.append_history(&forged).unwrap_err();
    assert!(matches!(err, StorageError::DuplicateVersion { version: 1, .. }));
    assert_eq!(store.history_version(&grn, 1).unwrap(), original);
}

#[test]
fn append_accepts_new_versions() {
    let store = EntityStore::open_in_memory().unwrap();
    let grn = Grn::new(TENANT, "dashboard", "imported").unwrap();
    let record = HistoryRecord {
        grn: grn.clone(),
        version: 4,
        folder: None,
        access: None,
        body: Some(b"{}".to_vec()),
        size: 2,
        etag: etag_of(b"{}"),
        updated_at: 1_000,
        updated_by: "import".into(),
        message: String::new(),
    };
    store.append_history(&record).unwrap();
    assert_eq!(store.list_versions(&grn).unwrap(), vec![record]);
}

// ── Pruning ──────────────────────────────────────────────────────

#[test]
fn prune_keeps_newest_records() {
    let store = EntityStore::open_in_memory().unwrap();
    let grn = write_versions(&store, 5);

    assert_eq!(store.prune_history(&grn, 2).unwrap(), 3);
    assert_eq!(versions(&store, &grn), vec![4, 5]);
    assert_eq!(store.prune_history(&grn, 2).unwrap(), 0);
}

#[test]
fn prune_never_drops_current_version() {
    let store = EntityStore::open_in_memory().unwrap();
    let grn = write_versions(&store, 3);

    assert_eq!(store.prune_history(&grn, 0).unwrap(), 2);
    assert_eq!(versions(&store, &grn), vec![3]);
    assert_eq!(store.get(&grn, None).unwrap().version, 3);
}

#[test]
fn pruned_versions_are_no_longer_readable() {
    let store = EntityStore::open_in_memory().unwrap();
    let grn = write_versions(&store, 3);
    store.prune_history(&grn, 1).unwrap();

    assert!(matches!(store.get(&grn, Some(1)), Err(StorageError::NotFound(_))));
    assert_eq!(store.get(&grn, Some(3)).unwrap().name, "v3");
}

#[test]
fn retention_is_applied_on_write() {
    let config = StoreConfig {
        history_retention: Some(2),
        ..StoreConfig::default()
    };
    let store = EntityStore::open_in_memory_with(config, Arc::new(ManualClock::new(1_000))).unwrap();
    let grn = write_versions(&store, 4);

    assert_eq!(versions(&store, &grn), vec![3, 4]);
}
