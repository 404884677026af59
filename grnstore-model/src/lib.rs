//! Entity model for grnstore.
//!
//! Defines the plain data types shared by the storage engine and its callers:
//! - [`Entity`] / [`EntityWrite`]: the canonical versioned record and a write request
//! - [`Summary`] / [`Summarizer`]: the projection of a body into derived fields
//! - [`FolderNode`]: cached folder tree position (MPTT interval)
//! - [`LabelEntry`], [`ReferenceEdge`], [`HistoryRecord`], [`AccessRule`]: index rows
//! - [`EntityFilter`]: list predicates
//!
//! None of these types own persistence; they are what the storage layer reads
//! and writes.

mod access;
mod entity;
mod filter;
mod folder;
mod history;
mod label;
mod reference;
mod summary;

pub use access::AccessRule;
pub use entity::{Entity, EntityState, EntityWrite, Origin, PutResult};
pub use filter::{EntityFilter, FolderScope, LabelPredicate};
pub use folder::{FolderNode, TreeEntry, FOLDER_KIND};
pub use history::HistoryRecord;
pub use label::LabelEntry;
pub use reference::{RefAddress, ReferenceEdge};
pub use summary::{slugify, JsonSummarizer, NestedSummary, Summarizer, Summary};
