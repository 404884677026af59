//! Reference edges and their resolution cache.
//!
//! Edges are extracted from bodies on every write and start unresolved. A
//! [`ReferenceResolver`] asks a [`TargetLookup`] where each address points
//! and caches the answer on the edge, failures included. Cached answers are
//! advisory: they go stale after `reference_ttl_ms` or when the target's
//! version moves.

use crate::entity_table::active_version;
use crate::error::{StorageError, StorageResult};
use crate::rows::{grn_at, grn_text, opt_grn_at, tenant_range};
use crate::store::EntityStore;
use async_trait::async_trait;
use grnstore_model::{RefAddress, ReferenceEdge};
use grnstore_types::{Grn, TenantId};
use rusqlite::{params, Connection, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const EDGE_COLUMNS: &str = "r.grn, r.parent_grn, r.family, r.\"type\", r.id, r.resolved_ok, \
     r.resolved_to, r.resolved_version, r.resolved_warning, r.resolved_time";

pub(crate) const WARN_TARGET_DELETED: &str = "target deleted";
pub(crate) const WARN_NOT_FOUND: &str = "target not found";
pub(crate) const WARN_NO_ID: &str = "reference has no id";

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<ReferenceEdge> {
    Ok(ReferenceEdge {
        grn: grn_at(row, 0)?,
        parent_grn: opt_grn_at(row, 1)?,
        family: row.get(2)?,
        ref_type: row.get(3)?,
        id: row.get(4)?,
        resolved_ok: row.get(5)?,
        resolved_to: opt_grn_at(row, 6)?,
        resolved_version: row.get(7)?,
        resolved_warning: row.get(8)?,
        resolved_time: row.get(9)?,
    })
}

pub(crate) fn insert_edges(
    conn: &Connection,
    grn: &Grn,
    parent: Option<&Grn>,
    addresses: &[RefAddress],
) -> StorageResult<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO entity_ref (grn, parent_grn, family, \"type\", id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for address in addresses {
        stmt.execute(params![
            grn.as_str(),
            grn_text(parent),
            address.family,
            address.ref_type,
            address.id,
        ])?;
    }
    Ok(())
}

pub(crate) fn addresses_of(conn: &Connection, grn: &str) -> StorageResult<Vec<RefAddress>> {
    let mut stmt = conn.prepare_cached(
        "SELECT family, \"type\", id FROM entity_ref WHERE grn = ?1 ORDER BY rowid",
    )?;
    let addresses = stmt
        .query_map(params![grn], |row| {
            Ok(RefAddress {
                family: row.get(0)?,
                ref_type: row.get(1)?,
                id: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(addresses)
}

/// Turns every edge resolved to `target` into a dangling one.
pub(crate) fn mark_dangling(conn: &Connection, target: &Grn, now: i64) -> StorageResult<usize> {
    Ok(conn.execute(
        "UPDATE entity_ref SET resolved_ok = 0, resolved_version = NULL,
             resolved_warning = ?1, resolved_time = ?2
         WHERE resolved_to = ?3",
        params![WARN_TARGET_DELETED, now, target.as_str()],
    )?)
}

fn store_resolution(conn: &Connection, edge: &ReferenceEdge) -> StorageResult<()> {
    conn.execute(
        "UPDATE entity_ref SET resolved_ok = ?1, resolved_to = ?2, resolved_version = ?3,
             resolved_warning = ?4, resolved_time = ?5
         WHERE grn = ?6 AND family = ?7 AND \"type\" IS ?8 AND id IS ?9",
        params![
            edge.resolved_ok,
            grn_text(edge.resolved_to.as_ref()),
            edge.resolved_version,
            edge.resolved_warning,
            edge.resolved_time,
            edge.grn.as_str(),
            edge.family,
            edge.ref_type,
            edge.id,
        ],
    )?;
    Ok(())
}

impl EntityStore {
    /// Edges declared by `grn` and by the nested objects it owns.
    pub fn references(&self, grn: &Grn) -> StorageResult<Vec<ReferenceEdge>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM entity_ref r
             WHERE r.grn = ?1 OR r.parent_grn = ?1 ORDER BY r.rowid"
        );
        let mut stmt = conn.prepare(&sql)?;
        let edges = stmt
            .query_map(params![grn.as_str()], edge_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(edges)
    }

    /// Edges whose cached resolution points at `target`.
    pub fn references_to(&self, target: &Grn) -> StorageResult<Vec<ReferenceEdge>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM entity_ref r WHERE r.resolved_to = ?1 ORDER BY r.grn"
        );
        let mut stmt = conn.prepare(&sql)?;
        let edges = stmt
            .query_map(params![target.as_str()], edge_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(edges)
    }

    /// Edges in `tenant_id` whose cached resolution can no longer be trusted.
    pub fn stale_references(&self, tenant_id: TenantId) -> StorageResult<Vec<ReferenceEdge>> {
        let (lo, hi) = tenant_range(tenant_id);
        let now = self.now_ms();
        let ttl = self.config().reference_ttl_ms;

        let conn = self.conn()?;
        let sql = format!(
            "SELECT {EDGE_COLUMNS}, t.version FROM entity_ref r
             LEFT JOIN entity t ON t.grn = r.resolved_to AND t.state = 'active'
             WHERE r.grn >= ?1 AND r.grn < ?2
             ORDER BY r.grn, r.rowid"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![lo, hi], |row| {
                Ok((edge_from_row(row)?, row.get::<_, Option<i64>>(10)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stale = Vec::new();
        for (edge, resolved_version) in rows {
            // A failed lookup is compared against the entity its address names.
            let target_version = match local_target(&edge.grn, &edge.address()) {
                Some(target) if !edge.resolved_ok => active_version(&conn, &target)?,
                _ => resolved_version,
            };
            if edge.is_stale(now, ttl, target_version) {
                stale.push(edge);
            }
        }
        Ok(stale)
    }

    fn save_resolution(&self, edge: &ReferenceEdge) -> StorageResult<()> {
        let conn = self.conn()?;
        store_resolution(&conn, edge)
    }
}

/// Milliseconds in `duration`, saturating at `u64::MAX`.
fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// The entity `address` names inside `source`'s tenant: `family` as kind
/// and `id` as uid.
fn local_target(source: &Grn, address: &RefAddress) -> Option<Grn> {
    let id = address.id.as_deref()?;
    Grn::new(source.tenant_id(), &address.family, id).ok()
}

/// Where an address currently points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub grn: Grn,
    pub version: i64,
}

/// Answers "what does this address refer to?".
///
/// `Ok(None)` means the address is well-formed but points at nothing.
#[async_trait]
pub trait TargetLookup: Send + Sync {
    async fn lookup(
        &self,
        source: &Grn,
        address: &RefAddress,
    ) -> StorageResult<Option<ResolvedTarget>>;
}

/// Resolves addresses against entities of the same store.
///
/// `family` is read as the target kind and `id` as its uid, within the
/// tenant of the referencing entity.
#[derive(Debug, Clone)]
pub struct LocalLookup {
    store: EntityStore,
}

impl LocalLookup {
    pub fn new(store: EntityStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TargetLookup for LocalLookup {
    async fn lookup(
        &self,
        source: &Grn,
        address: &RefAddress,
    ) -> StorageResult<Option<ResolvedTarget>> {
        let Some(grn) = local_target(source, address) else {
            return Ok(None);
        };
        Ok(self
            .store
            .current_version(&grn)?
            .map(|version| ResolvedTarget { grn, version }))
    }
}

/// Outcome of [`ReferenceResolver::refresh_stale`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub checked: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub timed_out: usize,
}

/// Resolves reference edges and caches the results in the store.
pub struct ReferenceResolver {
    store: EntityStore,
    lookup: Arc<dyn TargetLookup>,
    timeout: Duration,
}

impl ReferenceResolver {
    pub fn new(store: EntityStore, lookup: Arc<dyn TargetLookup>) -> Self {
        let timeout = store.config().resolve_timeout();
        Self {
            store,
            lookup,
            timeout,
        }
    }

    /// A resolver backed by [`LocalLookup`] on the same store.
    pub fn local(store: EntityStore) -> Self {
        let lookup = Arc::new(LocalLookup::new(store.clone()));
        Self::new(store, lookup)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolves one edge and stores the result.
    ///
    /// A lookup that exceeds the timeout is cached as a failed resolution
    /// and reported as [`StorageError::ResolutionTimeout`].
    pub async fn resolve_one(&self, edge: &ReferenceEdge) -> StorageResult<ReferenceEdge> {
        let attempt = self.attempt(edge).await?;
        if attempt.timed_out {
            return Err(StorageError::ResolutionTimeout {
                grn: edge.grn.to_string(),
                family: edge.family.clone(),
                timeout_ms: whole_millis(self.timeout),
            });
        }
        Ok(attempt.edge)
    }

    /// Resolves every edge declared by `grn` and its nested objects.
    ///
    /// Timed-out edges come back as cached failures; lookup errors abort.
    pub async fn resolve(&self, grn: &Grn) -> StorageResult<Vec<ReferenceEdge>> {
        let edges = self.store.references(grn)?;
        let mut resolved = Vec::with_capacity(edges.len());
        for edge in &edges {
            resolved.push(self.attempt(edge).await?.edge);
        }
        Ok(resolved)
    }

    /// Re-resolves the stale edges of a tenant.
    pub async fn refresh_stale(&self, tenant_id: TenantId) -> StorageResult<RefreshReport> {
        let stale = self.store.stale_references(tenant_id)?;
        let mut report = RefreshReport {
            checked: stale.len(),
            ..RefreshReport::default()
        };

        for edge in &stale {
            let attempt = self.attempt(edge).await?;
            if attempt.timed_out {
                report.timed_out += 1;
            } else if attempt.edge.resolved_ok {
                report.resolved += 1;
            } else {
                report.unresolved += 1;
            }
        }

        debug!(
            tenant_id = %tenant_id,
            checked = report.checked,
            resolved = report.resolved,
            timed_out = report.timed_out,
            "refreshed stale references"
        );
        Ok(report)
    }

    async fn attempt(&self, edge: &ReferenceEdge) -> StorageResult<Attempt> {
        let address = edge.address();
        let outcome =
            tokio::time::timeout(self.timeout, self.lookup.lookup(&edge.grn, &address)).await;

        let mut resolved = edge.clone();
        resolved.resolved_time = self.store.now_ms();
        resolved.resolved_ok = false;
        resolved.resolved_to = None;
        resolved.resolved_version = None;

        let timed_out = match outcome {
            Ok(Ok(Some(target))) => {
                resolved.resolved_ok = true;
                resolved.resolved_to = Some(target.grn);
                resolved.resolved_version = Some(target.version);
                resolved.resolved_warning.clear();
                false
            }
            Ok(Ok(None)) => {
                resolved.resolved_warning = if address.id.is_none() {
                    WARN_NO_ID.to_string()
                } else {
                    WARN_NOT_FOUND.to_string()
                };
                false
            }
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                resolved.resolved_warning =
                    format!("resolution timed out after {}ms", whole_millis(self.timeout));
                warn!(grn = %edge.grn, family = %edge.family, "reference resolution timed out");
                true
            }
        };

        self.store.save_resolution(&resolved)?;
        Ok(Attempt {
            edge: resolved,
            timed_out,
        })
    }
}

struct Attempt {
    edge: ReferenceEdge,
    timed_out: bool,
}
