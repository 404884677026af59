//! Table definitions and schema migration.

use crate::error::{StorageError, StorageResult};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

/// Version of the table layout written by this build.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entity (
    grn TEXT PRIMARY KEY,
    guid TEXT NOT NULL UNIQUE,
    tenant_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    uid TEXT NOT NULL,
    folder TEXT NOT NULL DEFAULT '',
    access TEXT,

    meta BLOB,
    body BLOB,
    status BLOB,

    size INTEGER NOT NULL,
    etag TEXT NOT NULL COLLATE BINARY,
    version INTEGER NOT NULL,
    state TEXT NOT NULL DEFAULT 'active',

    created_at INTEGER NOT NULL,
    created_by TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    updated_by TEXT NOT NULL,

    origin TEXT NOT NULL DEFAULT '',
    origin_key TEXT NOT NULL DEFAULT '',
    origin_ts INTEGER NOT NULL DEFAULT 0,

    name TEXT NOT NULL,
    description TEXT,
    slug TEXT NOT NULL,
    labels TEXT NOT NULL DEFAULT '{}',
    fields TEXT,
    errors TEXT NOT NULL DEFAULT '[]',

    UNIQUE(tenant_id, kind, uid)
);
CREATE INDEX IF NOT EXISTS idx_entity_tenant_kind ON entity(tenant_id, kind);
CREATE INDEX IF NOT EXISTS idx_entity_folder ON entity(folder);

CREATE TABLE IF NOT EXISTS entity_history (
    grn TEXT NOT NULL,
    version INTEGER NOT NULL,
    folder TEXT NOT NULL DEFAULT '',
    access TEXT,
    body BLOB,
    size INTEGER NOT NULL,
    etag TEXT NOT NULL COLLATE BINARY,
    updated_at INTEGER NOT NULL,
    updated_by TEXT NOT NULL,
    message TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (grn, version)
);

CREATE TABLE IF NOT EXISTS entity_folder (
    grn TEXT PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    uid TEXT NOT NULL,
    parent_grn TEXT NOT NULL DEFAULT '',
    slug_path TEXT NOT NULL COLLATE BINARY,
    tree TEXT NOT NULL,
    depth INTEGER NOT NULL,
    lft INTEGER NOT NULL,
    rgt INTEGER NOT NULL,
    detached INTEGER NOT NULL DEFAULT 0,
    UNIQUE(tenant_id, uid)
);
CREATE INDEX IF NOT EXISTS idx_entity_folder_interval ON entity_folder(tenant_id, lft);
CREATE INDEX IF NOT EXISTS idx_entity_folder_parent ON entity_folder(parent_grn);

CREATE TABLE IF NOT EXISTS entity_labels (
    grn TEXT NOT NULL,
    label TEXT NOT NULL,
    value TEXT NOT NULL,
    parent_grn TEXT NOT NULL DEFAULT '',
    UNIQUE(grn, label)
);
CREATE INDEX IF NOT EXISTS idx_entity_labels_label ON entity_labels(label, value);
CREATE INDEX IF NOT EXISTS idx_entity_labels_parent ON entity_labels(parent_grn);

CREATE TABLE IF NOT EXISTS entity_ref (
    grn TEXT NOT NULL,
    parent_grn TEXT NOT NULL DEFAULT '',
    family TEXT NOT NULL,
    "type" TEXT,
    id TEXT,
    resolved_ok INTEGER NOT NULL DEFAULT 0,
    resolved_to TEXT NOT NULL DEFAULT '',
    resolved_version INTEGER,
    resolved_warning TEXT NOT NULL DEFAULT '',
    resolved_time INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_entity_ref_grn ON entity_ref(grn);
CREATE INDEX IF NOT EXISTS idx_entity_ref_parent ON entity_ref(parent_grn);
CREATE INDEX IF NOT EXISTS idx_entity_ref_target ON entity_ref(resolved_to);
CREATE INDEX IF NOT EXISTS idx_entity_ref_address ON entity_ref(family, "type", id);

CREATE TABLE IF NOT EXISTS entity_nested (
    grn TEXT PRIMARY KEY,
    parent_grn TEXT NOT NULL,
    tenant_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    uid TEXT NOT NULL,
    folder TEXT NOT NULL DEFAULT '',
    name TEXT NOT NULL,
    description TEXT,
    slug TEXT NOT NULL,
    labels TEXT NOT NULL DEFAULT '{}',
    fields TEXT,
    errors TEXT NOT NULL DEFAULT '[]',
    UNIQUE(tenant_id, kind, uid)
);
CREATE INDEX IF NOT EXISTS idx_entity_nested_parent ON entity_nested(parent_grn);

CREATE TABLE IF NOT EXISTS entity_access_rule (
    policy TEXT NOT NULL,
    scope TEXT NOT NULL,
    role TEXT NOT NULL,
    kind TEXT NOT NULL,
    verb TEXT NOT NULL,
    target TEXT NOT NULL DEFAULT '',
    UNIQUE(policy, scope, role, kind, verb, target)
);
CREATE INDEX IF NOT EXISTS idx_entity_access_rule_scope ON entity_access_rule(scope, role);

CREATE TABLE IF NOT EXISTS entity_reconcile (
    grn TEXT PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    reason TEXT NOT NULL,
    queued_at INTEGER NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 1
);
"#;

/// Creates missing tables and records the schema version.
///
/// Refuses to open a database written by a newer build.
pub(crate) fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    let has_meta: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'store_meta'",
        [],
        |row| row.get(0),
    )?;

    let stored = if has_meta {
        conn.query_row(
            "SELECT value FROM store_meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()?
    } else {
        None
    };

    if let Some(stored) = &stored {
        let stored: i64 = stored
            .parse()
            .map_err(|_| StorageError::Migration(format!("unreadable schema version {stored:?}")))?;
        if stored > SCHEMA_VERSION {
            return Err(StorageError::Migration(format!(
                "database schema v{stored} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
    }

    conn.execute_batch(SCHEMA)?;
    conn.execute(
        "INSERT INTO store_meta (key, value) VALUES ('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![SCHEMA_VERSION.to_string()],
    )?;

    if stored.is_none() {
        info!(version = SCHEMA_VERSION, "initialized entity schema");
    }
    Ok(())
}
