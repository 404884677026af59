use grnstore_types::{Grn, TenantId};
use serde::{Deserialize, Serialize};

/// Kind of the entities that form the folder tree.
pub const FOLDER_KIND: &str = "folder";

/// One step of a folder's path from the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub uid: String,
    pub title: String,
}

/// Cached position of a folder entity in its tenant's tree.
///
/// `left`/`right` are MPTT interval bounds: for attached nodes, A is an
/// ancestor of B iff `A.left < B.left && B.right < A.right`. A detached node
/// (some ancestor is missing) keeps its last-known coordinates but takes no
/// part in containment queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderNode {
    pub grn: Grn,
    pub tenant_id: TenantId,
    pub uid: String,
    pub parent: Option<Grn>,
    /// `/slug/slug/slug/`, root first, including this folder.
    pub slug_path: String,
    /// Path from the root down to and including this folder.
    pub tree: Vec<TreeEntry>,
    /// Root folders have depth 1.
    pub depth: i64,
    pub left: i64,
    pub right: i64,
    pub detached: bool,
}

impl FolderNode {
    /// True if `self` is a strict ancestor of `other` in the same tenant.
    pub fn is_ancestor_of(&self, other: &FolderNode) -> bool {
        !self.detached
            && !other.detached
            && self.tenant_id == other.tenant_id
            && self.left < other.left
            && other.right < self.right
    }

    /// Number of folders in the subtree rooted here, including this one.
    pub fn subtree_size(&self) -> i64 {
        (self.right - self.left + 1) / 2
    }
}
