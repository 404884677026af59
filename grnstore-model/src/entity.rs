use grnstore_types::{EntityGuid, Grn, TenantId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle of an entity row. Tombstoning is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    Active,
    Tombstoned,
}

impl EntityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Tombstoned => "tombstoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "tombstoned" => Some(Self::Tombstoned),
            _ => None,
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External system of record an entity was imported or synced from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub source: String,
    pub key: String,
    /// Modification time in the origin system (ms since epoch).
    pub ts: i64,
}

/// The current state of one logical object.
///
/// `body` is the source of truth. `name`, `description`, `slug`, `labels`,
/// `fields` and `errors` are a projection of it, recomputed on every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub guid: EntityGuid,
    pub grn: Grn,
    pub tenant_id: TenantId,
    pub kind: String,
    pub uid: String,
    pub folder: Option<Grn>,
    pub access: Option<String>,

    pub meta: Option<Vec<u8>>,
    pub body: Option<Vec<u8>>,
    pub status: Option<Vec<u8>>,

    pub size: i64,
    pub etag: String,
    pub version: i64,
    pub state: EntityState,

    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub updated_by: String,

    pub origin: Option<Origin>,

    pub name: String,
    pub description: Option<String>,
    pub slug: String,
    pub labels: BTreeMap<String, String>,
    pub fields: Option<serde_json::Value>,
    pub errors: Vec<String>,
}

impl Entity {
    /// Parses the body as JSON, if there is one and it is valid.
    pub fn body_json(&self) -> Option<serde_json::Value> {
        self.body
            .as_deref()
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
    }

    /// Extract a string value from the body using a JSON pointer (e.g., "/title").
    pub fn get_str(&self, pointer: &str) -> Option<String> {
        self.body_json()?
            .pointer(pointer)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn is_folder(&self) -> bool {
        self.kind == crate::FOLDER_KIND
    }

    pub fn is_active(&self) -> bool {
        self.state == EntityState::Active
    }
}

/// A request to create or update an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityWrite {
    pub tenant_id: TenantId,
    pub kind: String,
    pub uid: String,
    pub folder: Option<Grn>,
    pub body: Option<Vec<u8>>,
    pub meta: Option<Vec<u8>>,
    pub status: Option<Vec<u8>>,
    pub access: Option<String>,
    pub origin: Option<Origin>,
    pub actor: String,
    /// Commit message recorded in the history log.
    pub message: String,
}

impl EntityWrite {
    pub fn new(tenant_id: TenantId, kind: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            tenant_id,
            kind: kind.into(),
            uid: uid.into(),
            folder: None,
            body: None,
            meta: None,
            status: None,
            access: None,
            origin: None,
            actor: String::new(),
            message: String::new(),
        }
    }

    /// Derives the GRN this write targets.
    pub fn grn(&self) -> grnstore_types::Result<Grn> {
        Grn::new(self.tenant_id, &self.kind, &self.uid)
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_json(self, value: &serde_json::Value) -> Self {
        self.with_body(value.to_string())
    }

    pub fn with_folder(mut self, folder: Grn) -> Self {
        self.folder = Some(folder);
        self
    }

    pub fn with_meta(mut self, meta: impl Into<Vec<u8>>) -> Self {
        self.meta = Some(meta.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<Vec<u8>>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_access(mut self, access: impl Into<String>) -> Self {
        self.access = Some(access.into());
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Outcome of a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResult {
    pub grn: Grn,
    pub version: i64,
    pub etag: String,
}
