//! Projection of an entity body into its derived summary fields.
//!
//! The summary is never authoritative: the storage layer recomputes it from
//! `body` on every write and writes labels, nested rows and reference edges
//! from it. Extraction problems are collected into `errors` instead of failing
//! the write.

use crate::reference::RefAddress;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const MAX_SLUG_LEN: usize = 189;

/// Derived fields of an entity (or of an object nested in its body).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub name: String,
    pub description: Option<String>,
    pub slug: String,
    pub labels: BTreeMap<String, String>,
    pub fields: Option<Value>,
    pub references: Vec<RefAddress>,
    pub nested: Vec<NestedSummary>,
    pub errors: Vec<String>,
}

impl Summary {
    /// An empty summary named after the uid.
    pub fn named(uid: &str) -> Self {
        Self {
            name: uid.to_string(),
            slug: slugify(uid),
            ..Self::default()
        }
    }
}

/// Summary of an object embedded in a parent body (e.g. a panel in a dashboard).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NestedSummary {
    pub kind: String,
    pub uid: String,
    pub name: String,
    pub description: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub fields: Option<Value>,
    pub references: Vec<RefAddress>,
    pub errors: Vec<String>,
}

/// Computes the summary of a body for one entity kind.
///
/// Kinds without a registered summarizer use [`JsonSummarizer`]. Implementations
/// must be pure: the same `(uid, body)` always yields the same summary.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, uid: &str, body: Option<&[u8]>) -> Summary;
}

/// Default summarizer for JSON object bodies.
///
/// Recognized keys: `name` (or `title`), `description`, `labels` (string map),
/// `tags` (string array, stored as labels with an empty value), `fields`
/// (object), `references` (array of `{family, type?, id?}`), and `nested`
/// (array of objects with `kind` and `uid` plus the same keys).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSummarizer;

impl Summarizer for JsonSummarizer {
    fn summarize(&self, uid: &str, body: Option<&[u8]>) -> Summary {
        let mut summary = Summary::named(uid);
        let Some(bytes) = body else {
            return summary;
        };

        let value: Value = match serde_json::from_slice(bytes) {
            Ok(value) => value,
            Err(e) => {
                summary.errors.push(format!("body is not valid JSON: {e}"));
                return summary;
            }
        };
        let Some(object) = value.as_object() else {
            summary.errors.push("body is not a JSON object".into());
            return summary;
        };

        let common = Common::read(object, "", &mut summary.errors);
        if let Some(name) = common.name {
            let slug = slugify(&name);
            if !slug.is_empty() {
                summary.slug = slug;
            }
            summary.name = name;
        }
        summary.description = common.description;
        summary.labels = common.labels;
        summary.fields = common.fields;
        summary.references = common.references;

        match object.get("nested") {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    if let Some(nested) = read_nested(item, i, &mut summary.errors) {
                        summary.nested.push(nested);
                    }
                }
            }
            Some(_) => summary.errors.push("nested: expected an array".into()),
        }

        summary
    }
}

/// Keys shared by top-level and nested objects.
struct Common {
    name: Option<String>,
    description: Option<String>,
    labels: BTreeMap<String, String>,
    fields: Option<Value>,
    references: Vec<RefAddress>,
}

impl Common {
    fn read(object: &Map<String, Value>, path: &str, errors: &mut Vec<String>) -> Self {
        let name = object
            .get("name")
            .and_then(Value::as_str)
            .or_else(|| object.get("title").and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let description = object
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut labels = BTreeMap::new();
        match object.get("labels") {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (key, value) in map {
                    match value.as_str() {
                        Some(_) if key.is_empty() => {
                            errors.push(format!("{path}labels: empty label name"));
                        }
                        Some(v) => {
                            labels.insert(key.clone(), v.to_string());
                        }
                        None => errors.push(format!("{path}labels.{key}: expected a string")),
                    }
                }
            }
            Some(_) => errors.push(format!("{path}labels: expected an object")),
        }
        match object.get("tags") {
            None | Some(Value::Null) => {}
            Some(Value::Array(tags)) => {
                for tag in tags {
                    match tag.as_str() {
                        Some(t) if !t.is_empty() => {
                            labels.entry(t.to_string()).or_default();
                        }
                        _ => errors.push(format!("{path}tags: expected non-empty strings")),
                    }
                }
            }
            Some(_) => errors.push(format!("{path}tags: expected an array")),
        }

        let fields = match object.get("fields") {
            None | Some(Value::Null) => None,
            Some(value @ Value::Object(_)) => Some(value.clone()),
            Some(_) => {
                errors.push(format!("{path}fields: expected an object"));
                None
            }
        };

        let mut references: Vec<RefAddress> = Vec::new();
        match object.get("references") {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    match read_reference(item) {
                        Ok(address) => {
                            if !references.contains(&address) {
                                references.push(address);
                            }
                        }
                        Err(why) => errors.push(format!("{path}references[{i}]: {why}")),
                    }
                }
            }
            Some(_) => errors.push(format!("{path}references: expected an array")),
        }

        Self {
            name,
            description,
            labels,
            fields,
            references,
        }
    }
}

fn read_reference(item: &Value) -> Result<RefAddress, &'static str> {
    let object = item.as_object().ok_or("expected an object")?;
    let family = object
        .get("family")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or("missing family")?;
    let optional = |key: &str| -> Result<Option<String>, &'static str> {
        match object.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err("type and id must be strings"),
        }
    };
    Ok(RefAddress {
        family: family.to_string(),
        ref_type: optional("type")?,
        id: optional("id")?,
    })
}

fn read_nested(item: &Value, index: usize, errors: &mut Vec<String>) -> Option<NestedSummary> {
    let path = format!("nested[{index}].");
    let Some(object) = item.as_object() else {
        errors.push(format!("nested[{index}]: expected an object"));
        return None;
    };
    let kind = object.get("kind").and_then(Value::as_str).unwrap_or_default();
    let uid = object.get("uid").and_then(Value::as_str).unwrap_or_default();
    if kind.is_empty() || uid.is_empty() {
        errors.push(format!("nested[{index}]: kind and uid are required"));
        return None;
    }

    let mut nested_errors = Vec::new();
    let common = Common::read(object, &path, &mut nested_errors);
    errors.extend(nested_errors.iter().cloned());

    Some(NestedSummary {
        kind: kind.to_string(),
        uid: uid.to_string(),
        name: common.name.unwrap_or_else(|| uid.to_string()),
        description: common.description,
        labels: common.labels,
        fields: common.fields,
        references: common.references,
        errors: nested_errors,
    })
}

/// Lowercase, dash-separated slug of a display name.
///
/// ASCII letters and digits are kept, every other run of characters becomes a
/// single `-`. Bounded to 189 bytes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    slug.truncate(MAX_SLUG_LEN);
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
