use grnstore_model::{EntityWrite, FOLDER_KIND};
use grnstore_storage::{
    spawn_reconciler, EntityStore, ReconcileReport, StorageError, StoreConfig,
};
use grnstore_types::{Grn, SystemClock, TenantId};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TENANT: TenantId = TenantId::new(7);

fn with_panels(uid: &str, panels: &[&str]) -> EntityWrite {
    let nested: Vec<serde_json::Value> = panels
        .iter()
        .map(|p| json!({"kind": "panel", "uid": p}))
        .collect();
    EntityWrite::new(TENANT, "dashboard", uid).with_json(&json!({ "nested": nested }))
}

/// Two dashboards both declaring panel `p1`: the second one's derived rows
/// cannot be written.
fn colliding(store: &EntityStore) -> (Grn, Grn) {
    let first = store.put(with_panels("dash-a", &["p1"]), None).unwrap().grn;
    let second = store.put(with_panels("dash-b", &["p1", "p2"]), None).unwrap().grn;
    (first, second)
}

fn file_store(dir: &TempDir) -> (EntityStore, std::path::PathBuf) {
    let path = dir.path().join("store.db");
    (EntityStore::open(&path).unwrap(), path)
}

fn raw(path: &Path) -> rusqlite::Connection {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.busy_timeout(Duration::from_secs(5)).unwrap();
    conn
}

// ── Queue ────────────────────────────────────────────────────────

#[test]
fn failed_derivation_is_queued_not_raised() {
    let store = EntityStore::open_in_memory().unwrap();
    let (_, second) = colliding(&store);

    // The entity row itself was written.
    assert_eq!(store.get(&second, None).unwrap().version, 1);
    assert!(store.nested_objects(&second).unwrap().is_empty());

    let pending = store.pending_reconciliation().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].grn, second);
    assert_eq!(pending[0].attempts, 1);
    assert!(!pending[0].reason.is_empty());
}

#[test]
fn reconcile_keeps_failing_entries_queued() {
    let store = EntityStore::open_in_memory().unwrap();
    let (_, second) = colliding(&store);

    let report = store.reconcile().unwrap();
    assert_eq!(
        report,
        ReconcileReport {
            still_failing: 1,
            ..ReconcileReport::default()
        }
    );
    let pending = store.pending_reconciliation().unwrap();
    assert_eq!(pending[0].grn, second);
    assert_eq!(pending[0].attempts, 2);
}

#[test]
fn reconcile_rederives_once_conflict_is_gone() {
    let store = EntityStore::open_in_memory().unwrap();
    let (_, second) = colliding(&store);
    store.put(with_panels("dash-a", &[]), None).unwrap();

    let report = store.reconcile().unwrap();
    assert_eq!(report.rederived, 1);
    assert!(store.pending_reconciliation().unwrap().is_empty());

    let uids: Vec<String> = store
        .nested_objects(&second)
        .unwrap()
        .into_iter()
        .map(|n| n.uid)
        .collect();
    assert_eq!(uids, vec!["p1", "p2"]);

    assert_eq!(store.reconcile().unwrap(), ReconcileReport::default());
}

#[test]
fn successful_rewrite_clears_queue_entry() {
    let store = EntityStore::open_in_memory().unwrap();
    colliding(&store);
    store.put(with_panels("dash-b", &["p2"]), None).unwrap();
    assert!(store.pending_reconciliation().unwrap().is_empty());
}

#[test]
fn deleting_queued_entity_clears_its_entry() {
    let store = EntityStore::open_in_memory().unwrap();
    let (_, second) = colliding(&store);
    store.delete(&second, None, "user:1").unwrap();
    assert!(store.pending_reconciliation().unwrap().is_empty());
}

#[test]
fn entries_for_missing_entities_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let (store, path) = file_store(&dir);
    let gone = Grn::new(TENANT, "dashboard", "gone").unwrap();
    raw(&path)
        .execute(
            "INSERT INTO entity_reconcile (grn, tenant_id, reason, queued_at, attempts)
             VALUES (?1, 7, 'lost', 0, 3)",
            [gone.as_str()],
        )
        .unwrap();

    let report = store.reconcile().unwrap();
    assert_eq!(report.dropped, 1);
    assert!(store.pending_reconciliation().unwrap().is_empty());
}

// ── Tree repair ──────────────────────────────────────────────────

fn two_folders(store: &EntityStore) -> (Grn, Grn) {
    let a = store
        .put(EntityWrite::new(TENANT, FOLDER_KIND, "a"), None)
        .unwrap()
        .grn;
    let b = store
        .put(
            EntityWrite::new(TENANT, FOLDER_KIND, "b").with_folder(a.clone()),
            None,
        )
        .unwrap()
        .grn;
    (a, b)
}

#[test]
fn reconcile_reattaches_folders_with_a_parent() {
    let dir = tempfile::tempdir().unwrap();
    let (store, path) = file_store(&dir);
    let (a, b) = two_folders(&store);
    raw(&path)
        .execute("UPDATE entity_folder SET detached = 1 WHERE uid = 'b'", [])
        .unwrap();
    assert!(!store.is_inside(&b, &a).unwrap());

    let report = store.reconcile().unwrap();
    assert_eq!(report.reattached, 1);
    assert!(store.is_inside(&b, &a).unwrap());
    store.check_tree(TENANT).unwrap();
}

#[test]
fn check_tree_detects_tampered_intervals() {
    let dir = tempfile::tempdir().unwrap();
    let (store, path) = file_store(&dir);
    two_folders(&store);
    raw(&path)
        .execute("UPDATE entity_folder SET lft = 9 WHERE uid = 'b'", [])
        .unwrap();

    let err = store.check_tree(TENANT).unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, StorageError::TreeCorruption { tenant_id: 7, .. }));

    assert!(store.rebuild_tree(TENANT).unwrap() >= 1);
    store.check_tree(TENANT).unwrap();
}

#[test]
fn check_tree_detects_missing_rows() {
    let dir = tempfile::tempdir().unwrap();
    let (store, path) = file_store(&dir);
    let (a, b) = two_folders(&store);
    raw(&path)
        .execute("DELETE FROM entity_folder WHERE uid = 'b'", [])
        .unwrap();

    assert!(matches!(
        store.check_tree(TENANT),
        Err(StorageError::TreeCorruption { .. })
    ));
    assert_eq!(store.rebuild_tree(TENANT).unwrap(), 1);
    assert!(store.is_inside(&b, &a).unwrap());
}

// ── Background task ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_reconciler_drains_queue() {
    let config = StoreConfig {
        reconcile_interval_ms: 10,
        ..StoreConfig::default()
    };
    let store = EntityStore::open_in_memory_with(config, Arc::new(SystemClock::new())).unwrap();
    let (_, second) = colliding(&store);
    store.put(with_panels("dash-a", &[]), None).unwrap();

    let handle = spawn_reconciler(store.clone());
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while !store.pending_reconciliation().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    handle.abort();

    assert!(drained.is_ok());
    assert_eq!(store.nested_objects(&second).unwrap().len(), 2);
}
