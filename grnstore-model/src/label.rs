use grnstore_types::Grn;
use serde::{Deserialize, Serialize};

/// One `(grn, label)` pair of the label index.
///
/// `parent_grn` is set when the labelled object is nested inside another
/// entity; lookups can then fall back to the parent's labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub grn: Grn,
    pub label: String,
    pub value: String,
    pub parent_grn: Option<Grn>,
}
