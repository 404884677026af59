//! Column conversions shared by the table modules.
//!
//! Optional GRN columns are stored as `''` when absent so they can take part
//! in `NOT NULL` indexes.

use grnstore_types::{Grn, TenantId};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::de::DeserializeOwned;

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

pub(crate) fn grn_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Grn> {
    let raw: String = row.get(idx)?;
    Grn::parse(&raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_grn_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Grn>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(raw) if raw.is_empty() => Ok(None),
        Some(raw) => Grn::parse(&raw).map(Some).map_err(|e| conversion_error(idx, e)),
    }
}

pub(crate) fn json_at<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_json_at<T: DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| conversion_error(idx, e)),
    }
}

pub(crate) fn parse_at<T>(
    row: &Row<'_>,
    idx: usize,
    what: &str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion_error(idx, format!("unknown {what} {raw:?}")))
}

pub(crate) fn grn_text(grn: Option<&Grn>) -> &str {
    grn.map(Grn::as_str).unwrap_or_default()
}

/// Half-open key range `[lo, hi)` covering every GRN of a tenant.
pub(crate) fn tenant_range(tenant_id: TenantId) -> (String, String) {
    let lo = Grn::tenant_prefix(tenant_id);
    // '0' is the byte after '/'
    let hi = format!("{}0", &lo[..lo.len() - 1]);
    (lo, hi)
}

pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
