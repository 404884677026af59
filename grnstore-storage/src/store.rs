use crate::config::StoreConfig;
use crate::error::{StorageError, StorageResult};
use crate::locks::TenantLocks;
use crate::schema::initialize_schema;
use grnstore_model::{JsonSummarizer, Summarizer};
use grnstore_types::{Clock, SystemClock, TenantId};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// Entity store backed by one SQLite connection.
///
/// Cheap to clone; clones share the connection, the clock and the registered
/// summarizers. Operations are synchronous and serialize on the connection.
/// The table-specific operations live in the sibling modules.
#[derive(Clone)]
pub struct EntityStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    conn: Mutex<Connection>,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    default_summarizer: Arc<dyn Summarizer>,
    summarizers: RwLock<HashMap<String, Arc<dyn Summarizer>>>,
    tree_locks: TenantLocks,
}

impl EntityStore {
    /// Opens (or creates) a store at the given path with default settings.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with(path, StoreConfig::default(), Arc::new(SystemClock::new()))
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::open_in_memory_with(StoreConfig::default(), Arc::new(SystemClock::new()))
    }

    pub fn open_with(
        path: &Path,
        config: StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> StorageResult<Self> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = crate::open_sqlite(path)?;
        Self::from_connection(conn, config, clock)
    }

    pub fn open_in_memory_with(config: StoreConfig, clock: Arc<dyn Clock>) -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, config, clock)
    }

    fn from_connection(
        conn: Connection,
        config: StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> StorageResult<Self> {
        initialize_schema(&conn)?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(conn),
                config,
                clock,
                default_summarizer: Arc::new(JsonSummarizer),
                summarizers: RwLock::new(HashMap::new()),
                tree_locks: TenantLocks::default(),
            }),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Current logical time of the store's clock (ms).
    pub fn now_ms(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    /// Registers the summarizer used for bodies of `kind`.
    ///
    /// Kinds without a registration use [`JsonSummarizer`].
    pub fn register_summarizer(
        &self,
        kind: impl Into<String>,
        summarizer: Arc<dyn Summarizer>,
    ) -> StorageResult<()> {
        let mut map = self
            .inner
            .summarizers
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        map.insert(kind.into(), summarizer);
        Ok(())
    }

    pub(crate) fn summarizer_for(&self, kind: &str) -> StorageResult<Arc<dyn Summarizer>> {
        let map = self
            .inner
            .summarizers
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(map
            .get(kind)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.inner.default_summarizer)))
    }

    pub(crate) fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.inner.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    pub(crate) fn tree_lock(&self, tenant_id: TenantId) -> StorageResult<Arc<Mutex<()>>> {
        self.inner.tree_locks.handle(tenant_id)
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
