use std::io::Cursor;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raft node identifier. The human-facing name lives in [`NodeMeta`].
pub type NodeId = u64;

/// Node metadata stored in the membership config and used by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    /// Human-friendly node name.
    pub name: String,
    /// Base URL peers use to reach this node's Raft RPC listener.
    pub raft_addr: String,
}

/// Payload of a replicated command, as it appears inside a log entry.
///
/// Wire field names are capitalized for compatibility with existing
/// clients; unknown fields are tolerated and a missing `Value` is null.
/// The log-entry application data is raw JSON (`serde_json::Value`), so a
/// payload that does not match this shape still replicates and is
/// discarded at apply time instead of failing the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    #[serde(rename = "Operation")]
    pub operation: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value", default)]
    pub value: Value,
}

impl CommandPayload {
    pub fn set(key: String, value: Value) -> Self {
        Self {
            operation: "SET".to_string(),
            key,
            value,
        }
    }

    pub fn delete(key: String) -> Self {
        Self {
            operation: "DELETE".to_string(),
            key,
            value: Value::Null,
        }
    }
}

/// What applying one committed entry produced on this node.
///
/// Only the node that submitted the entry observes this; it never becomes
/// part of the replicated state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApplyOutcome {
    /// A command was interpreted. `error` carries the engine failure, if
    /// any; `data` is the value written (SET), read (GET, `{}` when
    /// absent), or null (DELETE).
    Applied {
        error: Option<String>,
        data: Value,
    },
    /// Non-command entry, malformed payload, or unknown operation.
    Ignored,
}

/// OpenRaft type configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TypeConfig;

impl openraft::RaftTypeConfig for TypeConfig {
    type D = Value;
    type R = ApplyOutcome;

    type NodeId = NodeId;
    type Node = NodeMeta;

    type Entry = openraft::impls::Entry<TypeConfig>;
    type Responder = openraft::impls::OneshotResponder<TypeConfig>;
    type AsyncRuntime = openraft::impls::TokioRuntime;

    // Requires tokio `io-util` for AsyncRead/Write/Seek impls on Cursor.
    type SnapshotData = Cursor<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn payload_wire_names_are_capitalized() {
        let payload = CommandPayload::set("k".to_string(), json!(1));
        let wire = serde_json::to_value(&payload).unwrap();
        assert_eq!(wire, json!({"Operation": "SET", "Key": "k", "Value": 1}));
    }

    #[test]
    fn missing_value_decodes_to_null() {
        let payload: CommandPayload =
            serde_json::from_value(json!({"Operation": "DELETE", "Key": "k"})).unwrap();
        assert_eq!(payload.value, Value::Null);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let payload: CommandPayload = serde_json::from_value(
            json!({"Operation": "SET", "Key": "k", "Value": 2, "Extra": true}),
        )
        .unwrap();
        assert_eq!(payload.value, json!(2));
    }
}
