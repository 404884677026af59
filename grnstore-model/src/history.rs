use grnstore_types::Grn;
use serde::{Deserialize, Serialize};

/// Immutable snapshot of one written version of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub grn: Grn,
    pub version: i64,
    pub folder: Option<Grn>,
    pub access: Option<String>,
    pub body: Option<Vec<u8>>,
    pub size: i64,
    pub etag: String,
    pub updated_at: i64,
    pub updated_by: String,
    /// Commit message; empty when none was given.
    pub message: String,
}
