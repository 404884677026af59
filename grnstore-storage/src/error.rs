//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite. Surfaced unchanged.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed GRN, kind or uid.
    #[error(transparent)]
    InvalidIdentifier(#[from] grnstore_types::Error),

    /// Entity (or requested version) not found, or tombstoned.
    #[error("entity not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency check failed. Retry with a fresh read.
    #[error("version conflict on {grn}: expected {expected}, found {actual}")]
    VersionConflict {
        grn: String,
        expected: i64,
        actual: i64,
    },

    /// A history record for `(grn, version)` already exists.
    #[error("history already has version {version} of {grn}")]
    DuplicateVersion { grn: String, version: i64 },

    /// The write would make a folder its own ancestor.
    #[error("folder {folder} would become its own ancestor")]
    CycleDetected { folder: String },

    /// Interval invariants of a tenant's folder tree do not hold.
    #[error("folder tree of tenant {tenant_id} is corrupt: {detail}")]
    TreeCorruption { tenant_id: i64, detail: String },

    /// The reference target lookup did not answer in time.
    #[error("resolving {family} reference of {grn} timed out after {timeout_ms}ms")]
    ResolutionTimeout {
        grn: String,
        family: String,
        timeout_ms: u64,
    },

    /// The entity was deleted; tombstones are terminal.
    #[error("entity is tombstoned: {0}")]
    Tombstoned(String),

    /// An import carried an older origin timestamp than the stored row.
    #[error("stale origin write for {grn}: stored ts {stored}, incoming ts {incoming}")]
    StaleOrigin {
        grn: String,
        stored: i64,
        incoming: i64,
    },

    /// A store mutex was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Invalid data.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl StorageError {
    /// Whether the caller may retry the operation (after a fresh read).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::VersionConflict { .. } | Self::ResolutionTimeout { .. }
        )
    }

    /// Whether the error invalidates an index rather than a single request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TreeCorruption { .. })
    }
}
