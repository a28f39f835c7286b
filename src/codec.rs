//! Mapping between logical JSON values and the bytes the engine stores.

use serde_json::{Map, Value};

/// Canonical JSON encoding of a value. A null value stores nothing: the
/// absence of an entry is its representation, so callers skip the engine
/// write entirely.
pub fn to_stored_bytes(value: &Value) -> Result<Option<Vec<u8>>, serde_json::Error> {
    if value.is_null() {
        return Ok(None);
    }
    serde_json::to_vec(value).map(Some)
}

/// Decodes stored bytes back into a value. Empty bytes decode to `{}`,
/// which is also what a lookup of a missing key reports when routed
/// through the replicated apply path.
pub fn from_stored_bytes(bytes: &[u8]) -> Result<Value, serde_json::Error> {
    if bytes.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(bytes)
}
