//! Serialized payload columns.
//!
//! Entity documents and processing caches are stored as JSON text. The store
//! never looks inside them; it only needs each pair below to round-trip.

use crate::error::Result;
use crate::model::{Entity, JsonObject};

pub fn serialize_entity(entity: &Entity) -> Result<String> {
    Ok(serde_json::to_string(entity)?)
}

pub fn deserialize_entity(raw: &str) -> Result<Entity> {
    Ok(serde_json::from_str(raw)?)
}

/// Absent and empty caches are both stored as `{}`.
pub fn serialize_cache(state: Option<&JsonObject>) -> Result<String> {
    match state {
        Some(state) if !state.is_empty() => Ok(serde_json::to_string(state)?),
        _ => Ok("{}".to_string()),
    }
}

pub fn deserialize_cache(raw: Option<&str>) -> Result<Option<JsonObject>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
    }
}

/// Stable content hash of an entity: BLAKE3 over the canonical JSON form.
///
/// Object keys are sorted, so documents that differ only in key order hash
/// the same.
pub fn entity_hash(entity: &Entity) -> Result<String> {
    let canonical = canonicalize(serde_json::to_value(entity)?).to_string();
    Ok(blake3::hash(canonical.as_bytes()).to_hex().to_string())
}

fn canonicalize(value: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
