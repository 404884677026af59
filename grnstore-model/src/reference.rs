use grnstore_types::Grn;
use serde::{Deserialize, Serialize};

/// A cross-entity address as authored in a body. May be invalid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefAddress {
    pub family: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ref_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl RefAddress {
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            ref_type: None,
            id: None,
        }
    }

    pub fn with_type(mut self, ref_type: impl Into<String>) -> Self {
        self.ref_type = Some(ref_type.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A reference extracted from an entity body plus the cached result of the
/// last attempt to resolve it.
///
/// The cache is advisory. Callers that need certainty re-resolve instead of
/// trusting `resolved_to`; see [`ReferenceEdge::is_stale`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEdge {
    /// Source entity (or nested object) declaring the reference.
    pub grn: Grn,
    /// Owning entity when the source is a nested object.
    pub parent_grn: Option<Grn>,

    pub family: String,
    pub ref_type: Option<String>,
    pub id: Option<String>,

    pub resolved_ok: bool,
    pub resolved_to: Option<Grn>,
    /// Version of the target observed when the edge was resolved.
    pub resolved_version: Option<i64>,
    pub resolved_warning: String,
    /// Logical time of the last resolution attempt; 0 when never attempted.
    pub resolved_time: i64,
}

impl ReferenceEdge {
    /// A fresh, never-resolved edge.
    pub fn unresolved(grn: Grn, parent_grn: Option<Grn>, address: &RefAddress) -> Self {
        Self {
            grn,
            parent_grn,
            family: address.family.clone(),
            ref_type: address.ref_type.clone(),
            id: address.id.clone(),
            resolved_ok: false,
            resolved_to: None,
            resolved_version: None,
            resolved_warning: String::new(),
            resolved_time: 0,
        }
    }

    pub fn address(&self) -> RefAddress {
        RefAddress {
            family: self.family.clone(),
            ref_type: self.ref_type.clone(),
            id: self.id.clone(),
        }
    }

    /// Whether the cached resolution can no longer be trusted.
    ///
    /// `target_version` is the current version of the entity the edge points
    /// at (`None` when there is none): `resolved_to` for a successful
    /// resolution, the entity the address names for a failed one. An edge is
    /// stale when it was never resolved or its last attempt is older than
    /// `ttl_ms`. It is also stale when that target's version no longer
    /// matches the cached answer, including a failed lookup whose target has
    /// since been created.
    pub fn is_stale(&self, now_ms: i64, ttl_ms: i64, target_version: Option<i64>) -> bool {
        if self.resolved_time == 0 {
            return true;
        }
        if now_ms.saturating_sub(self.resolved_time) > ttl_ms {
            return true;
        }
        if self.resolved_ok {
            target_version != self.resolved_version
        } else {
            target_version.is_some()
        }
    }
}
