//! Repair of derived state that fell behind the entity rows.
//!
//! A reconciliation pass re-derives labels, references and nested objects
//! for every queued entity, then renumbers each tenant that has detached
//! folders so those whose parent reappeared are attached again.

use crate::entity_table::select_entity;
use crate::error::StorageResult;
use crate::rows::grn_at;
use crate::store::EntityStore;
use crate::{derived, folder_tree};
use grnstore_model::Entity;
use grnstore_types::{Grn, TenantId};
use rusqlite::params;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Outcome of one [`EntityStore::reconcile`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Queued entities whose derived rows were rewritten.
    pub rederived: usize,
    /// Queued entities that failed again and stay queued.
    pub still_failing: usize,
    /// Queue entries dropped because the entity is gone.
    pub dropped: usize,
    /// Folders that went from detached to attached.
    pub reattached: usize,
}

enum Rederive {
    Written,
    Failed,
    Gone,
}

/// One entry of the reconciliation queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReconcile {
    pub grn: Grn,
    pub reason: String,
    pub attempts: i64,
}

impl EntityStore {
    /// Entities waiting for their derived rows, oldest first.
    pub fn pending_reconciliation(&self) -> StorageResult<Vec<PendingReconcile>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT grn, reason, attempts FROM entity_reconcile ORDER BY queued_at, grn",
        )?;
        let pending = stmt
            .query_map([], |row| {
                Ok(PendingReconcile {
                    grn: grn_at(row, 0)?,
                    reason: row.get(1)?,
                    attempts: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pending)
    }

    /// Runs one reconciliation pass.
    pub fn reconcile(&self) -> StorageResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for pending in self.pending_reconciliation()? {
            match self.rederive(&pending.grn)? {
                Rederive::Written => report.rederived += 1,
                Rederive::Failed => report.still_failing += 1,
                Rederive::Gone => report.dropped += 1,
            }
        }

        let tenants = {
            let conn = self.conn()?;
            folder_tree::tenants_with_detached(&conn)?
        };
        for tenant_id in tenants {
            let before = self.detached_count(tenant_id)?;
            self.renumber_tenant(tenant_id)?;
            let after = self.detached_count(tenant_id)?;
            report.reattached += before.saturating_sub(after);
        }

        if report != ReconcileReport::default() {
            info!(
                rederived = report.rederived,
                still_failing = report.still_failing,
                dropped = report.dropped,
                reattached = report.reattached,
                "reconciliation pass finished"
            );
        }
        Ok(report)
    }

    /// Re-derives one queued entity.
    ///
    /// The entity row is read and its derived rows rewritten in one
    /// transaction, so a concurrent `put` or `delete` is either fully before
    /// or fully after it.
    fn rederive(&self, grn: &Grn) -> StorageResult<Rederive> {
        let now = self.now_ms();
        let mut conn = self.conn()?;
        let mut tx = conn.transaction()?;

        let Some(entity) = select_entity(&tx, grn)?.filter(Entity::is_active) else {
            tx.execute(
                "DELETE FROM entity_reconcile WHERE grn = ?1",
                params![grn.as_str()],
            )?;
            tx.commit()?;
            return Ok(Rederive::Gone);
        };

        let summary = self
            .summarizer_for(&entity.kind)?
            .summarize(&entity.uid, entity.body.as_deref());
        let failure =
            derived::replace_or_queue(&mut tx, grn, entity.folder.as_ref(), &summary, now)?;
        tx.commit()?;

        Ok(match failure {
            None => Rederive::Written,
            Some(err) => {
                warn!(grn = %grn, error = %err, "derived index still failing");
                Rederive::Failed
            }
        })
    }

    fn detached_count(&self, tenant_id: TenantId) -> StorageResult<usize> {
        let conn = self.conn()?;
        folder_tree::count_detached(&conn, tenant_id)
    }
}

/// Runs [`EntityStore::reconcile`] every `reconcile_interval_ms` until the
/// returned handle is aborted.
///
/// Passes run on the blocking pool. A failed pass is logged and retried on
/// the next tick.
pub fn spawn_reconciler(store: EntityStore) -> JoinHandle<()> {
    let period: Duration = store.config().reconcile_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let pass = store.clone();
            match tokio::task::spawn_blocking(move || pass.reconcile()).await {
                Ok(Ok(report)) => debug!(?report, "reconciler tick"),
                Ok(Err(err)) => warn!(error = %err, "reconciliation pass failed"),
                Err(err) => {
                    warn!(error = %err, "reconciliation task panicked; stopping");
                    break;
                }
            }
        }
    })
}
