//! Global Resource Names.
//!
//! A GRN is the primary key of every entity row. It is derived from the
//! `(tenant_id, kind, uid)` triple:
//!
//! ```text
//! grn:{tenant_id}/{kind}/{digest}
//! ```
//!
//! `digest` is the first 16 bytes of SHA-256 over the length-prefixed triple,
//! hex encoded. The tenant and kind stay readable so per-tenant prefix scans
//! and debugging work; the uid only contributes through the digest, which
//! keeps arbitrary uids inside the fixed key budget.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Maximum encoded length of a GRN, in bytes.
pub const MAX_GRN_LEN: usize = 256;

const SCHEME: &str = "grn:";
const DIGEST_BYTES: usize = 16;

/// Tenant (organization) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(i64);

impl TenantId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for TenantId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<i64>()
            .map(Self)
            .map_err(|e| Error::InvalidIdentifier(format!("tenant id {s:?}: {e}")))
    }
}

/// Global Resource Name: the deterministic composite key of an entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Grn {
    raw: String,
    tenant_id: TenantId,
}

impl Grn {
    /// Derives the GRN for `(tenant_id, kind, uid)`.
    ///
    /// Fails with [`Error::InvalidIdentifier`] when `kind` or `uid` is empty,
    /// when `kind` contains `/`, or when the encoded name exceeds
    /// [`MAX_GRN_LEN`] bytes.
    pub fn new(tenant_id: TenantId, kind: &str, uid: &str) -> Result<Self> {
        if kind.is_empty() {
            return Err(Error::InvalidIdentifier("kind must not be empty".into()));
        }
        if uid.is_empty() {
            return Err(Error::InvalidIdentifier("uid must not be empty".into()));
        }
        if kind.contains('/') {
            return Err(Error::InvalidIdentifier(format!(
                "kind {kind:?} must not contain '/'"
            )));
        }

        let raw = format!("{SCHEME}{tenant_id}/{kind}/{}", digest(tenant_id, kind, uid));
        if raw.len() > MAX_GRN_LEN {
            return Err(Error::InvalidIdentifier(format!(
                "encoded grn is {} bytes, limit is {MAX_GRN_LEN}",
                raw.len()
            )));
        }
        Ok(Self { raw, tenant_id })
    }

    /// Parses and validates the textual form of a GRN.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = |why: &str| Error::InvalidIdentifier(format!("grn {s:?}: {why}"));

        if s.len() > MAX_GRN_LEN {
            return Err(invalid("too long"));
        }
        let rest = s.strip_prefix(SCHEME).ok_or_else(|| invalid("missing grn: scheme"))?;
        let mut parts = rest.splitn(3, '/');
        let tenant = parts.next().ok_or_else(|| invalid("missing tenant"))?;
        let kind = parts.next().ok_or_else(|| invalid("missing kind"))?;
        let hash = parts.next().ok_or_else(|| invalid("missing digest"))?;

        let tenant_id: TenantId = tenant.parse().map_err(|_| invalid("tenant is not an integer"))?;
        if kind.is_empty() {
            return Err(invalid("empty kind"));
        }
        if hash.len() != DIGEST_BYTES * 2
            || !hash.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(invalid("digest must be 32 lowercase hex characters"));
        }

        Ok(Self {
            raw: s.to_string(),
            tenant_id,
        })
    }

    /// Prefix shared by every GRN of `tenant_id`.
    #[must_use]
    pub fn tenant_prefix(tenant_id: TenantId) -> String {
        format!("{SCHEME}{tenant_id}/")
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub const fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// The entity kind embedded in the name.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.raw[SCHEME.len()..].split('/').nth(1).unwrap_or_default()
    }
}

fn digest(tenant_id: TenantId, kind: &str, uid: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.get().to_be_bytes());
    for part in [kind, uid] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(&hasher.finalize()[..DIGEST_BYTES])
}

impl fmt::Display for Grn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Grn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Grn {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Grn> for String {
    fn from(grn: Grn) -> Self {
        grn.raw
    }
}

impl AsRef<str> for Grn {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}
