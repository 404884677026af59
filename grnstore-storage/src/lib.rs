//! SQLite storage layer for grnstore.
//!
//! Persists multi-tenant, versioned entities together with the indexes
//! derived from their bodies.
//!
//! # Architecture
//!
//! - `entity` holds the current row per GRN; writes use optimistic concurrency
//! - `entity_history` is an append-only log of every written version
//! - `entity_folder` caches each folder's MPTT interval, renumbered per tenant
//! - `entity_labels`, `entity_ref` and `entity_nested` are rebuilt from the
//!   body summary after the entity row commits; failures land in a
//!   reconciliation queue instead of failing the write
//! - `entity_access_rule` stores policy bindings verbatim
//! - Schema migrations are handled automatically on open

mod access_rules;
mod config;
mod derived;
mod entity_table;
mod error;
mod folder_tree;
mod history;
mod labels;
mod locks;
mod reconcile;
mod references;
mod rows;
mod schema;
mod store;

pub use config::StoreConfig;
pub use entity_table::EntityIter;
pub use error::{StorageError, StorageResult};
pub use folder_tree::validate_intervals;
pub use reconcile::{spawn_reconciler, PendingReconcile, ReconcileReport};
pub use references::{LocalLookup, RefreshReport, ReferenceResolver, ResolvedTarget, TargetLookup};
pub use schema::SCHEMA_VERSION;
pub use store::EntityStore;

/// Open a SQLite connection configured for the store.
///
/// File-backed databases use WAL journaling so readers do not block the
/// single writer. A busy timeout covers other processes holding the file.
pub fn open_sqlite(path: &std::path::Path) -> StorageResult<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        tracing::warn!(path = %path.display(), %mode, "WAL journaling unavailable");
    }
    Ok(conn)
}
