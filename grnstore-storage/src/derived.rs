//! Indexes rebuilt from a body summary: labels, references and nested objects.
//!
//! These rows are written under a savepoint of the transaction that writes
//! the entity row. When that fails only the savepoint is rolled back, the
//! owner is queued in `entity_reconcile` and the write still succeeds.

use crate::error::{StorageError, StorageResult};
use crate::rows::{grn_text, json_at, opt_json_at};
use crate::store::EntityStore;
use crate::{labels, references};
use grnstore_model::{slugify, NestedSummary, Summary};
use grnstore_types::Grn;
use rusqlite::{params, Connection, Transaction};
use tracing::warn;

/// Removes every derived row owned by `owner`.
pub(crate) fn clear(conn: &Connection, owner: &Grn) -> StorageResult<()> {
    let owner = owner.as_str();
    conn.execute(
        "DELETE FROM entity_labels WHERE grn = ?1 OR parent_grn = ?1",
        params![owner],
    )?;
    conn.execute(
        "DELETE FROM entity_ref WHERE grn = ?1 OR parent_grn = ?1",
        params![owner],
    )?;
    conn.execute(
        "DELETE FROM entity_nested WHERE parent_grn = ?1",
        params![owner],
    )?;
    Ok(())
}

/// Replaces the derived rows of `owner` with those of `summary`.
pub(crate) fn replace(
    conn: &Connection,
    owner: &Grn,
    folder: Option<&Grn>,
    summary: &Summary,
) -> StorageResult<()> {
    clear(conn, owner)?;
    labels::insert_labels(conn, owner, None, &summary.labels)?;
    references::insert_edges(conn, owner, None, &summary.references)?;

    for nested in &summary.nested {
        let grn = Grn::new(owner.tenant_id(), &nested.kind, &nested.uid)?;
        insert_nested(conn, &grn, owner, folder, nested)?;
        labels::insert_labels(conn, &grn, Some(owner), &nested.labels)?;
        references::insert_edges(conn, &grn, Some(owner), &nested.references)?;
    }

    conn.execute(
        "DELETE FROM entity_reconcile WHERE grn = ?1",
        params![owner.as_str()],
    )?;
    Ok(())
}

fn insert_nested(
    conn: &Connection,
    grn: &Grn,
    owner: &Grn,
    folder: Option<&Grn>,
    nested: &NestedSummary,
) -> StorageResult<()> {
    let slug = match slugify(&nested.name) {
        slug if slug.is_empty() => slugify(&nested.uid),
        slug => slug,
    };
    conn.execute(
        "INSERT INTO entity_nested (grn, parent_grn, tenant_id, kind, uid, folder, name,
             description, slug, labels, fields, errors)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            grn.as_str(),
            owner.as_str(),
            owner.tenant_id().get(),
            nested.kind,
            nested.uid,
            grn_text(folder),
            nested.name,
            nested.description,
            slug,
            serde_json::to_string(&nested.labels)?,
            nested.fields.as_ref().map(serde_json::to_string).transpose()?,
            serde_json::to_string(&nested.errors)?,
        ],
    )?;
    Ok(())
}

/// Replaces the derived rows of `owner` under a savepoint of `tx`.
///
/// On failure the savepoint is rolled back and `owner` is queued; the
/// derive error is returned as `Ok(Some(..))` so the caller can still commit.
pub(crate) fn replace_or_queue(
    tx: &mut Transaction<'_>,
    owner: &Grn,
    folder: Option<&Grn>,
    summary: &Summary,
    now: i64,
) -> StorageResult<Option<StorageError>> {
    let failure = {
        let sp = tx.savepoint()?;
        match replace(&sp, owner, folder, summary) {
            Ok(()) => {
                sp.commit()?;
                None
            }
            // Dropping the savepoint rolls it back.
            Err(err) => Some(err),
        }
    };
    if let Some(err) = &failure {
        warn!(grn = %owner, error = %err, "derived index write failed; queued for reconciliation");
        enqueue(tx, owner, &err.to_string(), now)?;
    }
    Ok(failure)
}

pub(crate) fn enqueue(
    conn: &Connection,
    owner: &Grn,
    reason: &str,
    now: i64,
) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO entity_reconcile (grn, tenant_id, reason, queued_at, attempts)
         VALUES (?1, ?2, ?3, ?4, 1)
         ON CONFLICT(grn) DO UPDATE SET
             reason = excluded.reason,
             queued_at = excluded.queued_at,
             attempts = entity_reconcile.attempts + 1",
        params![owner.as_str(), owner.tenant_id().get(), reason, now],
    )?;
    Ok(())
}

impl EntityStore {
    /// Nested objects declared by `owner`'s body, in uid order.
    ///
    /// References are the addresses of the nested object's edges.
    pub fn nested_objects(&self, owner: &Grn) -> StorageResult<Vec<NestedSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT grn, kind, uid, name, description, labels, fields, errors
             FROM entity_nested WHERE parent_grn = ?1 ORDER BY kind, uid",
        )?;
        let rows = stmt
            .query_map(params![owner.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    NestedSummary {
                        kind: row.get(1)?,
                        uid: row.get(2)?,
                        name: row.get(3)?,
                        description: row.get(4)?,
                        labels: json_at(row, 5)?,
                        fields: opt_json_at(row, 6)?,
                        references: Vec::new(),
                        errors: json_at(row, 7)?,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut nested = Vec::with_capacity(rows.len());
        for (grn, mut summary) in rows {
            summary.references = references::addresses_of(&conn, &grn)?;
            nested.push(summary);
        }
        Ok(nested)
    }
}
