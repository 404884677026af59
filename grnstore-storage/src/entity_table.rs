//! Current-state entity rows: put, get, delete and list.

use crate::error::{StorageError, StorageResult};
use crate::rows::{grn_at, grn_text, json_at, opt_grn_at, opt_json_at, parse_at};
use crate::store::EntityStore;
use crate::{derived, folder_tree, history, references};
use grnstore_model::{
    Entity, EntityFilter, EntityState, EntityWrite, FolderScope, HistoryRecord, LabelPredicate,
    Origin, PutResult, Summary, FOLDER_KIND,
};
use grnstore_types::{etag_of, EntityGuid, Grn, TenantId};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

pub(crate) const ENTITY_COLUMNS: &str = "guid, grn, tenant_id, kind, uid, folder, access, \
     meta, body, status, size, etag, version, state, created_at, created_by, updated_at, \
     updated_by, origin, origin_key, origin_ts, name, description, slug, labels, fields, errors";

pub(crate) fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    let origin_source: String = row.get(18)?;
    let origin = if origin_source.is_empty() {
        None
    } else {
        Some(Origin {
            source: origin_source,
            key: row.get(19)?,
            ts: row.get(20)?,
        })
    };

    Ok(Entity {
        guid: parse_at(row, 0, "guid", |s| EntityGuid::parse(s).ok())?,
        grn: grn_at(row, 1)?,
        tenant_id: TenantId::new(row.get(2)?),
        kind: row.get(3)?,
        uid: row.get(4)?,
        folder: opt_grn_at(row, 5)?,
        access: row.get(6)?,
        meta: row.get(7)?,
        body: row.get(8)?,
        status: row.get(9)?,
        size: row.get(10)?,
        etag: row.get(11)?,
        version: row.get(12)?,
        state: parse_at(row, 13, "entity state", EntityState::parse)?,
        created_at: row.get(14)?,
        created_by: row.get(15)?,
        updated_at: row.get(16)?,
        updated_by: row.get(17)?,
        origin,
        name: row.get(21)?,
        description: row.get(22)?,
        slug: row.get(23)?,
        labels: json_at(row, 24)?,
        fields: opt_json_at(row, 25)?,
        errors: json_at(row, 26)?,
    })
}

pub(crate) fn active_version(conn: &Connection, grn: &Grn) -> StorageResult<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT version FROM entity WHERE grn = ?1 AND state = 'active'",
            params![grn.as_str()],
            |row| row.get(0),
        )
        .optional()?)
}

pub(crate) fn select_entity(conn: &Connection, grn: &Grn) -> StorageResult<Option<Entity>> {
    let sql = format!("SELECT {ENTITY_COLUMNS} FROM entity WHERE grn = ?1");
    Ok(conn
        .query_row(&sql, params![grn.as_str()], entity_from_row)
        .optional()?)
}

/// The columns a write needs to validate its preconditions.
struct Head {
    version: i64,
    state: EntityState,
    origin: Option<Origin>,
}

fn load_head(conn: &Connection, grn: &Grn) -> StorageResult<Option<Head>> {
    Ok(conn
        .query_row(
            "SELECT version, state, origin, origin_key, origin_ts FROM entity WHERE grn = ?1",
            params![grn.as_str()],
            |row| {
                let source: String = row.get(2)?;
                Ok(Head {
                    version: row.get(0)?,
                    state: parse_at(row, 1, "entity state", EntityState::parse)?,
                    origin: if source.is_empty() {
                        None
                    } else {
                        Some(Origin {
                            source,
                            key: row.get(3)?,
                            ts: row.get(4)?,
                        })
                    },
                })
            },
        )
        .optional()?)
}

fn check_write(
    grn: &Grn,
    head: Option<&Head>,
    expected_version: Option<i64>,
    incoming: Option<&Origin>,
) -> StorageResult<()> {
    if head.is_some_and(|h| h.state == EntityState::Tombstoned) {
        return Err(StorageError::Tombstoned(grn.to_string()));
    }

    let actual = head.map_or(0, |h| h.version);
    if let Some(expected) = expected_version {
        if expected != actual {
            return Err(StorageError::VersionConflict {
                grn: grn.to_string(),
                expected,
                actual,
            });
        }
    }

    if let (Some(incoming), Some(stored)) = (incoming, head.and_then(|h| h.origin.as_ref())) {
        if incoming.source == stored.source
            && incoming.key == stored.key
            && incoming.ts < stored.ts
        {
            return Err(StorageError::StaleOrigin {
                grn: grn.to_string(),
                stored: stored.ts,
                incoming: incoming.ts,
            });
        }
    }
    Ok(())
}

fn check_folder_target(write: &EntityWrite) -> StorageResult<()> {
    let Some(folder) = &write.folder else {
        return Ok(());
    };
    if folder.tenant_id() != write.tenant_id {
        return Err(StorageError::InvalidData(format!(
            "folder {folder} belongs to another tenant"
        )));
    }
    if folder.kind() != FOLDER_KIND {
        return Err(StorageError::InvalidData(format!("{folder} is not a folder")));
    }
    Ok(())
}

/// Values shared by the insert and update statements.
struct RowImage<'a> {
    write: &'a EntityWrite,
    summary: &'a Summary,
    origin: Option<&'a Origin>,
    size: i64,
    etag: &'a str,
    labels: String,
    fields: Option<String>,
    errors: String,
}

impl<'a> RowImage<'a> {
    fn new(
        write: &'a EntityWrite,
        summary: &'a Summary,
        origin: Option<&'a Origin>,
        etag: &'a str,
    ) -> StorageResult<Self> {
        Ok(Self {
            write,
            summary,
            origin,
            size: write.body.as_ref().map_or(0, |b| b.len() as i64),
            etag,
            labels: serde_json::to_string(&summary.labels)?,
            fields: summary.fields.as_ref().map(serde_json::to_string).transpose()?,
            errors: serde_json::to_string(&summary.errors)?,
        })
    }

    fn origin_source(&self) -> &str {
        self.origin.map_or("", |o| o.source.as_str())
    }

    fn origin_key(&self) -> &str {
        self.origin.map_or("", |o| o.key.as_str())
    }

    fn origin_ts(&self) -> i64 {
        self.origin.map_or(0, |o| o.ts)
    }
}

fn insert_entity(
    conn: &Connection,
    grn: &Grn,
    image: &RowImage<'_>,
    now: i64,
) -> StorageResult<()> {
    let w = image.write;
    conn.execute(
        "INSERT INTO entity (guid, grn, tenant_id, kind, uid, folder, access, meta, body, status,
             size, etag, version, state, created_at, created_by, updated_at, updated_by,
             origin, origin_key, origin_ts, name, description, slug, labels, fields, errors)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1, 'active', ?13, ?14, ?13, ?14,
             ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
        params![
            EntityGuid::new().to_string(),
            grn.as_str(),
            w.tenant_id.get(),
            w.kind,
            w.uid,
            grn_text(w.folder.as_ref()),
            w.access,
            w.meta,
            w.body,
            w.status,
            image.size,
            image.etag,
            now,
            w.actor,
            image.origin_source(),
            image.origin_key(),
            image.origin_ts(),
            image.summary.name,
            image.summary.description,
            image.summary.slug,
            image.labels,
            image.fields,
            image.errors,
        ],
    )?;
    Ok(())
}

fn update_entity(
    conn: &Connection,
    grn: &Grn,
    image: &RowImage<'_>,
    now: i64,
    current_version: i64,
) -> StorageResult<()> {
    let w = image.write;
    let changed = conn.execute(
        "UPDATE entity SET folder = ?1, access = ?2, meta = ?3, body = ?4, status = ?5,
             size = ?6, etag = ?7, version = version + 1, updated_at = ?8, updated_by = ?9,
             origin = ?10, origin_key = ?11, origin_ts = ?12, name = ?13, description = ?14,
             slug = ?15, labels = ?16, fields = ?17, errors = ?18
         WHERE grn = ?19 AND version = ?20 AND state = 'active'",
        params![
            grn_text(w.folder.as_ref()),
            w.access,
            w.meta,
            w.body,
            w.status,
            image.size,
            image.etag,
            now,
            w.actor,
            image.origin_source(),
            image.origin_key(),
            image.origin_ts(),
            image.summary.name,
            image.summary.description,
            image.summary.slug,
            image.labels,
            image.fields,
            image.errors,
            grn.as_str(),
            current_version,
        ],
    )?;

    if changed == 0 {
        let actual = load_head(conn, grn)?.map_or(0, |h| h.version);
        return Err(StorageError::VersionConflict {
            grn: grn.to_string(),
            expected: current_version,
            actual,
        });
    }
    Ok(())
}

impl EntityStore {
    /// Creates or updates an entity.
    ///
    /// `expected_version` of `Some(0)` requires that the entity does not exist
    /// yet; `Some(v)` requires the current version to be `v`; `None` writes
    /// unconditionally. The entity row, its history record, (for folders)
    /// the tenant's tree renumbering and the derived labels, references and
    /// nested objects commit together. A failure deriving those indexes is
    /// rolled back on its own and queued for reconciliation; it does not fail
    /// the write.
    pub fn put(
        &self,
        write: EntityWrite,
        expected_version: Option<i64>,
    ) -> StorageResult<PutResult> {
        let grn = write.grn()?;
        check_folder_target(&write)?;

        let summary = self
            .summarizer_for(&write.kind)?
            .summarize(&write.uid, write.body.as_deref());
        let etag = etag_of(write.body.as_deref().unwrap_or_default());
        let is_folder = write.kind == FOLDER_KIND;

        let tree_lock = self.tree_lock(write.tenant_id)?;
        let version = {
            let _tree_guard = if is_folder {
                Some(tree_lock.lock().map_err(|_| StorageError::LockPoisoned)?)
            } else {
                None
            };

            let now = self.now_ms();
            let mut conn = self.conn()?;
            let mut tx = conn.transaction()?;

            let head = load_head(&tx, &grn)?;
            check_write(&grn, head.as_ref(), expected_version, write.origin.as_ref())?;

            // A write without origin keeps the stored one.
            let origin = write
                .origin
                .as_ref()
                .or_else(|| head.as_ref().and_then(|h| h.origin.as_ref()));
            let image = RowImage::new(&write, &summary, origin, &etag)?;

            let version = match &head {
                None => {
                    insert_entity(&tx, &grn, &image, now)?;
                    1
                }
                Some(head) => {
                    update_entity(&tx, &grn, &image, now, head.version)?;
                    head.version + 1
                }
            };

            history::insert_record(
                &tx,
                &HistoryRecord {
                    grn: grn.clone(),
                    version,
                    folder: write.folder.clone(),
                    access: write.access.clone(),
                    body: write.body.clone(),
                    size: image.size,
                    etag: etag.clone(),
                    updated_at: now,
                    updated_by: write.actor.clone(),
                    message: write.message.clone(),
                },
            )?;

            if is_folder {
                folder_tree::place(&tx, write.tenant_id, &grn)?;
            }

            derived::replace_or_queue(&mut tx, &grn, write.folder.as_ref(), &summary, now)?;

            tx.commit()?;
            version
        };

        if let Some(keep) = self.config().history_retention {
            if let Err(err) = self.prune_history(&grn, keep) {
                warn!(grn = %grn, error = %err, "history pruning failed");
            }
        }

        debug!(grn = %grn, version, "entity written");
        Ok(PutResult { grn, version, etag })
    }

    /// Reads the current entity, or an older version rebuilt from history.
    ///
    /// Tombstoned entities are not found. Historic versions carry the body,
    /// folder and access of that version with the derived fields recomputed;
    /// `meta` and `status` are those of the current row.
    pub fn get(&self, grn: &Grn, version: Option<i64>) -> StorageResult<Entity> {
        let conn = self.conn()?;
        let entity = select_entity(&conn, grn)?
            .filter(Entity::is_active)
            .ok_or_else(|| StorageError::NotFound(grn.to_string()))?;

        match version {
            None => Ok(entity),
            Some(v) if v == entity.version => Ok(entity),
            Some(v) => {
                let record = history::select_record(&conn, grn, v)?
                    .ok_or_else(|| StorageError::NotFound(format!("{grn} version {v}")))?;
                drop(conn);
                self.entity_at(entity, record)
            }
        }
    }

    fn entity_at(&self, current: Entity, record: HistoryRecord) -> StorageResult<Entity> {
        let summary = self
            .summarizer_for(&current.kind)?
            .summarize(&current.uid, record.body.as_deref());
        Ok(Entity {
            folder: record.folder,
            access: record.access,
            body: record.body,
            size: record.size,
            etag: record.etag,
            version: record.version,
            updated_at: record.updated_at,
            updated_by: record.updated_by,
            name: summary.name,
            description: summary.description,
            slug: summary.slug,
            labels: summary.labels,
            fields: summary.fields,
            errors: summary.errors,
            ..current
        })
    }

    /// Version of the active entity at `grn`, if there is one.
    pub fn current_version(&self, grn: &Grn) -> StorageResult<Option<i64>> {
        let conn = self.conn()?;
        active_version(&conn, grn)
    }

    /// Tombstones an entity.
    ///
    /// The version is not bumped and no history record is written. Labels,
    /// references and nested objects owned by the entity are removed; edges
    /// that resolved to it become dangling. Deleting a folder detaches its
    /// child folders.
    pub fn delete(
        &self,
        grn: &Grn,
        expected_version: Option<i64>,
        actor: &str,
    ) -> StorageResult<()> {
        let tenant_id = grn.tenant_id();
        let is_folder = grn.kind() == FOLDER_KIND;

        let tree_lock = self.tree_lock(tenant_id)?;
        let _tree_guard = if is_folder {
            Some(tree_lock.lock().map_err(|_| StorageError::LockPoisoned)?)
        } else {
            None
        };

        let now = self.now_ms();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let head = load_head(&tx, grn)?
            .filter(|h| h.state == EntityState::Active)
            .ok_or_else(|| StorageError::NotFound(grn.to_string()))?;
        if let Some(expected) = expected_version {
            if expected != head.version {
                return Err(StorageError::VersionConflict {
                    grn: grn.to_string(),
                    expected,
                    actual: head.version,
                });
            }
        }

        tx.execute(
            "UPDATE entity SET state = 'tombstoned', updated_at = ?1, updated_by = ?2
             WHERE grn = ?3 AND version = ?4",
            params![now, actor, grn.as_str(), head.version],
        )?;
        derived::clear(&tx, grn)?;
        let dangling = references::mark_dangling(&tx, grn, now)?;
        tx.execute(
            "DELETE FROM entity_reconcile WHERE grn = ?1",
            params![grn.as_str()],
        )?;
        if is_folder {
            folder_tree::renumber(&tx, tenant_id)?;
        }
        tx.commit()?;

        info!(grn = %grn, version = head.version, dangling, "entity tombstoned");
        Ok(())
    }

    /// Lists active entities matching `filter` in GRN order.
    ///
    /// Rows are fetched lazily in pages of `list_batch_size`. The iterator
    /// is single-pass; start a new listing to read again.
    pub fn list(&self, filter: EntityFilter) -> EntityIter {
        EntityIter {
            store: self.clone(),
            filter,
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }
}

/// Lazy, paged listing of entities. See [`EntityStore::list`].
pub struct EntityIter {
    store: EntityStore,
    filter: EntityFilter,
    after: Option<String>,
    buffer: VecDeque<Entity>,
    exhausted: bool,
}

impl EntityIter {
    fn fetch_page(&mut self) -> StorageResult<()> {
        let limit = self.store.config().list_batch_size.max(1);
        let (sql, values) = page_query(&self.filter, self.after.as_deref(), limit);

        let conn = self.store.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let page = stmt
            .query_map(params_from_iter(values.iter()), entity_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        if page.len() < limit {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.after = Some(last.grn.to_string());
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for EntityIter {
    type Item = StorageResult<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

fn page_query(filter: &EntityFilter, after: Option<&str>, limit: usize) -> (String, Vec<Value>) {
    let mut sql = format!("SELECT {ENTITY_COLUMNS} FROM entity e WHERE e.state = 'active'");
    let mut values = Vec::new();

    if let Some(tenant_id) = filter.tenant_id {
        sql.push_str(" AND e.tenant_id = ?");
        values.push(Value::Integer(tenant_id.get()));
    }

    if !filter.kinds.is_empty() {
        let marks = vec!["?"; filter.kinds.len()].join(", ");
        sql.push_str(&format!(" AND e.kind IN ({marks})"));
        values.extend(filter.kinds.iter().cloned().map(Value::Text));
    }

    match &filter.folder {
        None => {}
        Some(FolderScope::Root) => sql.push_str(" AND e.folder = ''"),
        Some(FolderScope::Direct(folder)) => {
            sql.push_str(" AND e.folder = ?");
            values.push(Value::Text(folder.to_string()));
        }
        Some(FolderScope::Subtree(folder)) => {
            sql.push_str(
                " AND e.folder IN (SELECT d.grn FROM entity_folder d
                   JOIN entity_folder a ON a.tenant_id = d.tenant_id
                   WHERE a.grn = ? AND a.detached = 0 AND d.detached = 0
                     AND d.lft >= a.lft AND d.rgt <= a.rgt)",
            );
            values.push(Value::Text(folder.to_string()));
        }
    }

    for predicate in &filter.labels {
        match predicate {
            LabelPredicate::Exists(label) => {
                sql.push_str(
                    " AND EXISTS (SELECT 1 FROM entity_labels l
                       WHERE l.grn = e.grn AND l.label = ?)",
                );
                values.push(Value::Text(label.clone()));
            }
            LabelPredicate::Equals(label, value) => {
                sql.push_str(
                    " AND EXISTS (SELECT 1 FROM entity_labels l
                       WHERE l.grn = e.grn AND l.label = ? AND l.value = ?)",
                );
                values.push(Value::Text(label.clone()));
                values.push(Value::Text(value.clone()));
            }
        }
    }

    if let Some(after) = after {
        sql.push_str(" AND e.grn > ?");
        values.push(Value::Text(after.to_string()));
    }

    sql.push_str(" ORDER BY e.grn LIMIT ?");
    values.push(Value::Integer(limit as i64));
    (sql, values)
}
