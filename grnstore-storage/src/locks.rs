//! Per-tenant serialization of folder tree mutations.
//!
//! Renumbering rewrites the intervals of a whole tenant, so two concurrent
//! moves in one tenant must not interleave. Reads of the tree do not take
//! these locks. Lock order: tenant lock first, then the connection.

use crate::error::{StorageError, StorageResult};
use grnstore_types::TenantId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub(crate) struct TenantLocks {
    locks: Mutex<HashMap<TenantId, Arc<Mutex<()>>>>,
}

impl TenantLocks {
    /// The mutex guarding tree mutations of `tenant_id`.
    pub(crate) fn handle(&self, tenant_id: TenantId) -> StorageResult<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(Arc::clone(locks.entry(tenant_id).or_default()))
    }
}
