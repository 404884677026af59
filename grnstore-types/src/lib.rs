//! Core type definitions for grnstore.
//!
//! This crate defines the storage-agnostic types every other layer builds on:
//! - Global Resource Names ([`Grn`]) derived from `(tenant, kind, uid)`
//! - Tenant and entity identifiers (UUID v7 guids)
//! - Content hashing for entity etags
//! - The logical clock used for provenance and cache timestamps
//!
//! Nothing here touches the database; the storage crate owns persistence.

mod clock;
mod grn;
mod hash;
mod ids;

pub use clock::{Clock, ManualClock, SystemClock};
pub use grn::{Grn, TenantId, MAX_GRN_LEN};
pub use hash::{etag_of, ETAG_LEN};
pub use ids::EntityGuid;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),
}
