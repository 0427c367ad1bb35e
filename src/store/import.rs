//! Import/export payload handling.
//!
//! The accepted document is either a bare array of entry-like objects or an
//! object exposing an `entries` (or legacy `expenses`) array. Explicit imports
//! are all-or-nothing: a record that is not object-shaped, or that would need
//! any repair, rejects the whole payload so a full replace stays trustworthy.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::entry::{normalize, Entry};
use crate::errors::{CoreError, Result};

/// Pulls the record array out of an import document.
pub fn extract_records(document: &Value) -> Result<&Vec<Value>> {
    if let Some(records) = document.as_array() {
        return Ok(records);
    }
    if let Some(object) = document.as_object() {
        for key in ["entries", "expenses"] {
            if let Some(records) = object.get(key).and_then(Value::as_array) {
                return Ok(records);
            }
        }
    }
    Err(CoreError::Import(
        "payload is neither an array nor an object with an `entries`/`expenses` array".into(),
    ))
}

/// Normalizes every record, failing on the first one that is malformed or
/// would require repair.
pub fn strict_normalize(records: &[Value], now: DateTime<Utc>) -> Result<Vec<Entry>> {
    let mut entries = Vec::with_capacity(records.len());
    for (position, record) in records.iter().enumerate() {
        let normalized = normalize(record, now).ok_or_else(|| {
            CoreError::Import(format!("record {} is not an object", position))
        })?;
        if normalized.requires_resync {
            return Err(CoreError::Import(format!(
                "record {} is malformed and cannot be imported verbatim",
                position
            )));
        }
        entries.push(normalized.entry);
    }
    Ok(entries)
}

/// Parses caller-supplied text into a JSON document.
pub fn parse_document(text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|err| CoreError::Parse(err.to_string()))
}

/// Pretty-printed JSON array of canonical entries, the export wire format.
pub fn export_json(entries: &[Entry]) -> Result<String> {
    serde_json::to_string_pretty(entries).map_err(|err| CoreError::Storage(err.to_string()))
}
