use grnstore_types::{Grn, TenantId};
use serde::{Deserialize, Serialize};

/// Which part of the folder tree a listing covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderScope {
    /// Entities not inside any folder.
    Root,
    /// Entities directly inside the folder.
    Direct(Grn),
    /// Entities inside the folder or any of its attached descendants.
    Subtree(Grn),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelPredicate {
    Exists(String),
    Equals(String, String),
}

/// Predicates for listing entities. All set predicates must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFilter {
    pub tenant_id: Option<TenantId>,
    /// Empty means any kind.
    pub kinds: Vec<String>,
    pub folder: Option<FolderScope>,
    pub labels: Vec<LabelPredicate>,
}

impl EntityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kinds.push(kind.into());
        self
    }

    pub fn at_root(mut self) -> Self {
        self.folder = Some(FolderScope::Root);
        self
    }

    pub fn in_folder(mut self, folder: Grn) -> Self {
        self.folder = Some(FolderScope::Direct(folder));
        self
    }

    pub fn in_subtree(mut self, folder: Grn) -> Self {
        self.folder = Some(FolderScope::Subtree(folder));
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(LabelPredicate::Exists(label.into()));
        self
    }

    pub fn with_label_value(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels
            .push(LabelPredicate::Equals(label.into(), value.into()));
        self
    }
}
