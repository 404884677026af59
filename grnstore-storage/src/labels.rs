use crate::error::StorageResult;
use crate::rows::{grn_at, grn_text, opt_grn_at, tenant_range};
use crate::store::EntityStore;
use grnstore_model::LabelEntry;
use grnstore_types::{Grn, TenantId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LabelEntry> {
    Ok(LabelEntry {
        grn: grn_at(row, 0)?,
        label: row.get(1)?,
        value: row.get(2)?,
        parent_grn: opt_grn_at(row, 3)?,
    })
}

pub(crate) fn insert_labels(
    conn: &Connection,
    grn: &Grn,
    parent: Option<&Grn>,
    labels: &BTreeMap<String, String>,
) -> StorageResult<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO entity_labels (grn, label, value, parent_grn) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (label, value) in labels {
        stmt.execute(params![grn.as_str(), label, value, grn_text(parent)])?;
    }
    Ok(())
}

fn select_labels(conn: &Connection, grn: &Grn) -> StorageResult<BTreeMap<String, String>> {
    let mut stmt =
        conn.prepare_cached("SELECT label, value FROM entity_labels WHERE grn = ?1")?;
    let labels = stmt
        .query_map(params![grn.as_str()], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<BTreeMap<_, _>, _>>()?;
    Ok(labels)
}

impl EntityStore {
    /// Labels stored for `grn` (an entity or a nested object), by label.
    pub fn labels_for(&self, grn: &Grn) -> StorageResult<Vec<LabelEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT grn, label, value, parent_grn FROM entity_labels
             WHERE grn = ?1 ORDER BY label",
        )?;
        let entries = stmt
            .query_map(params![grn.as_str()], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Labels of `grn` layered over those of its owning entity.
    ///
    /// For a nested object, labels it does not set itself are inherited from
    /// the entity that declares it. For a top-level entity this equals its
    /// own labels.
    pub fn effective_labels(&self, grn: &Grn) -> StorageResult<BTreeMap<String, String>> {
        let conn = self.conn()?;
        let parent: Option<String> = conn
            .query_row(
                "SELECT parent_grn FROM entity_nested WHERE grn = ?1",
                params![grn.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let mut labels = match parent.as_deref().map(Grn::parse).transpose()? {
            Some(parent) => select_labels(&conn, &parent)?,
            None => BTreeMap::new(),
        };
        labels.extend(select_labels(&conn, grn)?);
        Ok(labels)
    }

    /// Label rows in `tenant_id` carrying `label`, optionally with `value`.
    pub fn find_by_label(
        &self,
        tenant_id: TenantId,
        label: &str,
        value: Option<&str>,
    ) -> StorageResult<Vec<LabelEntry>> {
        let (lo, hi) = tenant_range(tenant_id);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT grn, label, value, parent_grn FROM entity_labels
             WHERE label = ?1 AND (?2 IS NULL OR value = ?2) AND grn >= ?3 AND grn < ?4
             ORDER BY grn",
        )?;
        let entries = stmt
            .query_map(params![label, value, lo, hi], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
