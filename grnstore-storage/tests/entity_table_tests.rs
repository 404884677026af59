use grnstore_model::{EntityFilter, EntityWrite, Origin};
use grnstore_storage::{EntityStore, StorageError, StoreConfig};
use grnstore_types::{etag_of, Clock, Grn, ManualClock, SystemClock, TenantId};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

const TENANT: TenantId = TenantId::new(7);

fn store() -> EntityStore {
    EntityStore::open_in_memory().unwrap()
}

fn dashboard(uid: &str, title: &str) -> EntityWrite {
    EntityWrite::new(TENANT, "dashboard", uid)
        .with_json(&json!({"title": title}))
        .with_actor("user:1")
}

// ── Put / Get ────────────────────────────────────────────────────

#[test]
fn put_then_get_returns_body() {
    let store = store();
    let write = dashboard("dash-1", "Overview");
    let body = write.body.clone().unwrap();

    let result = store.put(write, None).unwrap();
    assert_eq!(result.version, 1);
    assert_eq!(result.etag, etag_of(&body));
    assert_eq!(result.grn, Grn::new(TENANT, "dashboard", "dash-1").unwrap());

    let entity = store.get(&result.grn, None).unwrap();
    assert_eq!(entity.body.as_deref(), Some(body.as_slice()));
    assert_eq!(entity.version, 1);
    assert_eq!(entity.etag, result.etag);
    assert_eq!(entity.size, body.len() as i64);
    assert_eq!(entity.name, "Overview");
    assert_eq!(entity.slug, "overview");
    assert_eq!(entity.created_by, "user:1");
    assert!(entity.is_active());
}

#[test]
fn update_increments_version_by_one() {
    let store = store();
    let first = store.put(dashboard("dash-1", "A"), None).unwrap();
    let second = store.put(dashboard("dash-1", "B"), Some(first.version)).unwrap();

    assert_eq!(second.version, first.version + 1);
    assert_ne!(second.etag, first.etag);

    let entity = store.get(&second.grn, None).unwrap();
    assert_eq!(entity.name, "B");
    assert_eq!(entity.guid, store.get(&first.grn, None).unwrap().guid);
}

#[test]
fn unchanged_body_keeps_etag() {
    let store = store();
    let first = store.put(dashboard("dash-1", "Same"), None).unwrap();
    let second = store.put(dashboard("dash-1", "Same"), None).unwrap();
    assert_eq!(first.etag, second.etag);
    assert_eq!(second.version, 2);
}

#[test]
fn get_unknown_is_not_found() {
    let store = store();
    let grn = Grn::new(TENANT, "dashboard", "missing").unwrap();
    assert!(matches!(store.get(&grn, None), Err(StorageError::NotFound(_))));
}

#[test]
fn get_older_version_from_history() {
    let store = store();
    let first = store.put(dashboard("dash-1", "First"), None).unwrap();
    store.put(dashboard("dash-1", "Second"), None).unwrap();

    let old = store.get(&first.grn, Some(1)).unwrap();
    assert_eq!(old.version, 1);
    assert_eq!(old.name, "First");
    assert_eq!(old.etag, first.etag);

    assert!(matches!(
        store.get(&first.grn, Some(9)),
        Err(StorageError::NotFound(_))
    ));
}

#[test]
fn summary_errors_are_recorded_not_fatal() {
    let store = store();
    let write = EntityWrite::new(TENANT, "dashboard", "broken").with_body(b"{oops".to_vec());
    let result = store.put(write, None).unwrap();

    let entity = store.get(&result.grn, None).unwrap();
    assert_eq!(entity.name, "broken");
    assert_eq!(entity.errors.len(), 1);
    assert!(entity.errors[0].starts_with("body is not valid JSON"));
}

#[test]
fn empty_uid_is_rejected() {
    let store = store();
    let err = store
        .put(EntityWrite::new(TENANT, "dashboard", ""), None)
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidIdentifier(_)));
}

#[test]
fn folder_of_another_tenant_is_rejected() {
    let store = store();
    let foreign = Grn::new(TenantId::new(8), "folder", "team-a").unwrap();
    let err = store
        .put(dashboard("dash-1", "x").with_folder(foreign), None)
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidData(_)));
}

// ── Optimistic concurrency ───────────────────────────────────────

#[test]
fn expected_zero_requires_absence() {
    let store = store();
    store.put(dashboard("dash-1", "A"), Some(0)).unwrap();

    let err = store.put(dashboard("dash-1", "B"), Some(0)).unwrap_err();
    match err {
        StorageError::VersionConflict {
            expected, actual, ..
        } => {
            assert_eq!(expected, 0);
            assert_eq!(actual, 1);
        }
        other => panic!("expected VersionConflict, got {other:?}"),
    }
}

#[test]
fn stale_expected_version_conflicts() {
    let store = store();
    store.put(dashboard("dash-1", "A"), None).unwrap();
    store.put(dashboard("dash-1", "B"), Some(1)).unwrap();

    let err = store.put(dashboard("dash-1", "C"), Some(1)).unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(err, StorageError::VersionConflict { actual: 2, .. }));

    // The failed write left no trace.
    let grn = Grn::new(TENANT, "dashboard", "dash-1").unwrap();
    assert_eq!(store.get(&grn, None).unwrap().name, "B");
    assert_eq!(store.list_versions(&grn).unwrap().len(), 2);
}

#[test]
fn expected_version_on_missing_entity_conflicts() {
    let store = store();
    let err = store.put(dashboard("dash-1", "A"), Some(3)).unwrap_err();
    assert!(matches!(err, StorageError::VersionConflict { actual: 0, .. }));
}

// ── Origin ───────────────────────────────────────────────────────

fn imported(title: &str, ts: i64) -> EntityWrite {
    dashboard("dash-1", title).with_origin(Origin {
        source: "git".into(),
        key: "dashboards/dash-1.json".into(),
        ts,
    })
}

#[test]
fn older_origin_write_is_rejected() {
    let store = store();
    store.put(imported("v2", 200), None).unwrap();

    let err = store.put(imported("v1", 100), None).unwrap_err();
    assert!(matches!(
        err,
        StorageError::StaleOrigin {
            stored: 200,
            incoming: 100,
            ..
        }
    ));
}

#[test]
fn newer_origin_write_is_accepted() {
    let store = store();
    store.put(imported("v1", 100), None).unwrap();
    let result = store.put(imported("v2", 200), None).unwrap();

    let entity = store.get(&result.grn, None).unwrap();
    assert_eq!(entity.origin.map(|o| o.ts), Some(200));
}

#[test]
fn local_edit_keeps_origin() {
    let store = store();
    store.put(imported("v1", 100), None).unwrap();
    let result = store.put(dashboard("dash-1", "local"), None).unwrap();

    let entity = store.get(&result.grn, None).unwrap();
    assert_eq!(entity.origin.as_ref().map(|o| o.source.as_str()), Some("git"));
    assert!(matches!(
        store.put(imported("old", 50), None),
        Err(StorageError::StaleOrigin { .. })
    ));
}

// ── Delete ───────────────────────────────────────────────────────

#[test]
fn delete_tombstones_without_new_version() {
    let clock = Arc::new(ManualClock::new(1_000));
    let store =
        EntityStore::open_in_memory_with(StoreConfig::default(), clock.clone() as Arc<dyn Clock>)
            .unwrap();
    let result = store.put(dashboard("dash-1", "A"), None).unwrap();

    clock.advance(10);
    store.delete(&result.grn, Some(1), "user:2").unwrap();

    assert!(matches!(
        store.get(&result.grn, None),
        Err(StorageError::NotFound(_))
    ));
    assert_eq!(store.current_version(&result.grn).unwrap(), None);
    // History is untouched by the tombstone.
    assert_eq!(store.list_versions(&result.grn).unwrap().len(), 1);
}

#[test]
fn tombstone_is_terminal() {
    let store = store();
    let result = store.put(dashboard("dash-1", "A"), None).unwrap();
    store.delete(&result.grn, None, "user:1").unwrap();

    let err = store.put(dashboard("dash-1", "again"), None).unwrap_err();
    assert!(matches!(err, StorageError::Tombstoned(_)));
    assert!(matches!(
        store.delete(&result.grn, None, "user:1"),
        Err(StorageError::NotFound(_))
    ));
}

#[test]
fn delete_with_stale_version_conflicts() {
    let store = store();
    let result = store.put(dashboard("dash-1", "A"), None).unwrap();
    store.put(dashboard("dash-1", "B"), None).unwrap();

    let err = store.delete(&result.grn, Some(1), "user:1").unwrap_err();
    assert!(matches!(err, StorageError::VersionConflict { .. }));
    assert!(store.get(&result.grn, None).is_ok());
}

// ── List ─────────────────────────────────────────────────────────

#[test]
fn list_filters_by_tenant_and_kind() {
    let store = store();
    store.put(dashboard("a", "A"), None).unwrap();
    store.put(dashboard("b", "B"), None).unwrap();
    store
        .put(EntityWrite::new(TENANT, "playlist", "p"), None)
        .unwrap();
    store
        .put(EntityWrite::new(TenantId::new(8), "dashboard", "other"), None)
        .unwrap();

    let dashboards: Vec<String> = store
        .list(EntityFilter::for_tenant(TENANT).with_kind("dashboard"))
        .map(|e| e.unwrap().uid)
        .collect();
    let mut sorted = dashboards.clone();
    sorted.sort();
    assert_eq!(sorted, vec!["a", "b"]);

    let everything = store.list(EntityFilter::new()).count();
    assert_eq!(everything, 4);
}

#[test]
fn list_pages_through_all_rows_in_grn_order() {
    let config = StoreConfig {
        list_batch_size: 3,
        ..StoreConfig::default()
    };
    let store = EntityStore::open_in_memory_with(config, Arc::new(SystemClock::new())).unwrap();
    for i in 0..10 {
        store
            .put(dashboard(&format!("dash-{i}"), "x"), None)
            .unwrap();
    }

    let grns: Vec<Grn> = store
        .list(EntityFilter::for_tenant(TENANT))
        .map(|e| e.unwrap().grn)
        .collect();
    assert_eq!(grns.len(), 10);
    assert!(grns.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn list_skips_tombstoned() {
    let store = store();
    let a = store.put(dashboard("a", "A"), None).unwrap();
    store.put(dashboard("b", "B"), None).unwrap();
    store.delete(&a.grn, None, "user:1").unwrap();

    let uids: Vec<String> = store
        .list(EntityFilter::for_tenant(TENANT))
        .map(|e| e.unwrap().uid)
        .collect();
    assert_eq!(uids, vec!["b"]);
}

#[test]
fn list_by_label() {
    let store = store();
    store
        .put(
            EntityWrite::new(TENANT, "dashboard", "prod")
                .with_json(&json!({"labels": {"env": "prod"}, "tags": ["critical"]})),
            None,
        )
        .unwrap();
    store
        .put(
            EntityWrite::new(TENANT, "dashboard", "dev")
                .with_json(&json!({"labels": {"env": "dev"}})),
            None,
        )
        .unwrap();

    let prod: Vec<String> = store
        .list(EntityFilter::for_tenant(TENANT).with_label_value("env", "prod"))
        .map(|e| e.unwrap().uid)
        .collect();
    assert_eq!(prod, vec!["prod"]);

    let with_env = store
        .list(EntityFilter::for_tenant(TENANT).with_label("env"))
        .count();
    assert_eq!(with_env, 2);

    let critical: Vec<String> = store
        .list(EntityFilter::for_tenant(TENANT).with_label("critical"))
        .map(|e| e.unwrap().uid)
        .collect();
    assert_eq!(critical, vec!["prod"]);
}

#[test]
fn list_iterator_is_lazy_and_single_pass() {
    let store = store();
    store.put(dashboard("a", "A"), None).unwrap();

    let mut iter = store.list(EntityFilter::for_tenant(TENANT));
    // Rows written before the first page is fetched are visible.
    store.put(dashboard("b", "B"), None).unwrap();
    assert_eq!(iter.by_ref().count(), 2);
    assert!(iter.next().is_none());
}

// ── Summarizers ──────────────────────────────────────────────────

struct UpperSummarizer;

impl grnstore_model::Summarizer for UpperSummarizer {
    fn summarize(&self, uid: &str, _body: Option<&[u8]>) -> grnstore_model::Summary {
        grnstore_model::Summary::named(&uid.to_uppercase())
    }
}

#[test]
fn registered_summarizer_is_used_for_its_kind() {
    let store = store();
    store
        .register_summarizer("report", Arc::new(UpperSummarizer))
        .unwrap();

    let report = store
        .put(EntityWrite::new(TENANT, "report", "weekly"), None)
        .unwrap();
    let dash = store.put(dashboard("weekly", "Weekly"), None).unwrap();

    assert_eq!(store.get(&report.grn, None).unwrap().name, "WEEKLY");
    assert_eq!(store.get(&dash.grn, None).unwrap().name, "Weekly");
}
