//! Append-only log of entity versions.

use crate::error::{StorageError, StorageResult};
use crate::rows::{grn_at, grn_text, is_constraint_violation, opt_grn_at};
use crate::store::EntityStore;
use grnstore_model::HistoryRecord;
use grnstore_types::Grn;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

const HISTORY_COLUMNS: &str =
    "grn, version, folder, access, body, size, etag, updated_at, updated_by, message";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryRecord> {
    Ok(HistoryRecord {
        grn: grn_at(row, 0)?,
        version: row.get(1)?,
        folder: opt_grn_at(row, 2)?,
        access: row.get(3)?,
        body: row.get(4)?,
        size: row.get(5)?,
        etag: row.get(6)?,
        updated_at: row.get(7)?,
        updated_by: row.get(8)?,
        message: row.get(9)?,
    })
}

pub(crate) fn insert_record(conn: &Connection, record: &HistoryRecord) -> StorageResult<()> {
    let result = conn.execute(
        "INSERT INTO entity_history
             (grn, version, folder, access, body, size, etag, updated_at, updated_by, message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            record.grn.as_str(),
            record.version,
            grn_text(record.folder.as_ref()),
            record.access,
            record.body,
            record.size,
            record.etag,
            record.updated_at,
            record.updated_by,
            record.message,
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(err) if is_constraint_violation(&err) => Err(StorageError::DuplicateVersion {
            grn: record.grn.to_string(),
            version: record.version,
        }),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn select_record(
    conn: &Connection,
    grn: &Grn,
    version: i64,
) -> StorageResult<Option<HistoryRecord>> {
    let sql = format!(
        "SELECT {HISTORY_COLUMNS} FROM entity_history WHERE grn = ?1 AND version = ?2"
    );
    Ok(conn
        .query_row(&sql, params![grn.as_str(), version], record_from_row)
        .optional()?)
}

impl EntityStore {
    /// Appends a snapshot to the history log.
    ///
    /// Fails with [`StorageError::DuplicateVersion`] when the log already
    /// holds `(record.grn, record.version)`; existing records never change.
    pub fn append_history(&self, record: &HistoryRecord) -> StorageResult<()> {
        let conn = self.conn()?;
        insert_record(&conn, record)
    }

    /// All retained versions of `grn`, oldest first.
    pub fn list_versions(&self, grn: &Grn) -> StorageResult<Vec<HistoryRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM entity_history WHERE grn = ?1 ORDER BY version ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![grn.as_str()], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn history_version(&self, grn: &Grn, version: i64) -> StorageResult<HistoryRecord> {
        let conn = self.conn()?;
        select_record(&conn, grn, version)?
            .ok_or_else(|| StorageError::NotFound(format!("{grn} version {version}")))
    }

    /// Drops all but the newest `keep_latest` records of `grn`.
    ///
    /// The record of the entity's current version is always kept. Returns
    /// the number of records removed.
    pub fn prune_history(&self, grn: &Grn, keep_latest: usize) -> StorageResult<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM entity_history
             WHERE grn = ?1
               AND version NOT IN (
                   SELECT version FROM entity_history WHERE grn = ?1
                   ORDER BY version DESC LIMIT ?2)
               AND version <> COALESCE((SELECT version FROM entity WHERE grn = ?1), -1)",
            params![grn.as_str(), keep_latest as i64],
        )?;
        if removed > 0 {
            debug!(grn = %grn, removed, keep_latest, "pruned history");
        }
        Ok(removed)
    }
}
