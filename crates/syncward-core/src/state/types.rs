// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! State message and persisted-state types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identifies one stream of a connection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Stream name
    pub name: String,
    /// Optional namespace (schema, database, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl StreamDescriptor {
    /// Create a descriptor.
    pub fn new(name: impl Into<String>, namespace: Option<&str>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.map(str::to_string),
        }
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}.{}", namespace, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Tag of a state message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateType {
    /// Pre per-stream state, one opaque blob.
    Legacy,
    /// One payload shared by all streams.
    Global,
    /// One payload per stream.
    Stream,
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StateType::Legacy => "legacy",
            StateType::Global => "global",
            StateType::Stream => "stream",
        })
    }
}

/// A checkpoint emitted by the upstream producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateMessage {
    /// Legacy single-blob state.
    Legacy {
        /// Opaque payload
        data: Value,
    },
    /// Global state covering every stream.
    Global {
        /// Opaque payload
        data: Value,
    },
    /// State of a single stream.
    Stream {
        /// Stream the state belongs to
        stream_descriptor: StreamDescriptor,
        /// Opaque payload
        stream_state: Value,
    },
}

impl StateMessage {
    /// Build a stream state message.
    pub fn stream(stream: StreamDescriptor, state: Value) -> Self {
        StateMessage::Stream {
            stream_descriptor: stream,
            stream_state: state,
        }
    }

    /// Tag of this message.
    pub fn state_type(&self) -> StateType {
        match self {
            StateMessage::Legacy { .. } => StateType::Legacy,
            StateMessage::Global { .. } => StateType::Global,
            StateMessage::Stream { .. } => StateType::Stream,
        }
    }
}

/// Persisted state type as reported by the state API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStateType {
    /// Legacy single-blob state
    Legacy,
    /// Global state
    Global,
    /// Per-stream state
    Stream,
    /// No state persisted yet
    NotSet,
}

/// Persisted state of one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamState {
    /// Stream the state belongs to
    pub stream_descriptor: StreamDescriptor,
    /// Opaque payload
    pub stream_state: Option<Value>,
}

/// State of a connection, as exchanged with the state persistence API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    /// Connection the state belongs to
    pub connection_id: Uuid,
    /// Which of the payload fields is populated
    pub state_type: ConnectionStateType,
    /// Legacy payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    /// Per-stream payloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_state: Option<Vec<StreamState>>,
    /// Global payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_state: Option<Value>,
}

impl ConnectionState {
    /// State of a connection that has never persisted anything.
    pub fn not_set(connection_id: Uuid) -> Self {
        Self {
            connection_id,
            state_type: ConnectionStateType::NotSet,
            state: None,
            stream_state: None,
            global_state: None,
        }
    }

    /// Payload of `stream`, if present.
    pub fn stream(&self, stream: &StreamDescriptor) -> Option<&Value> {
        self.stream_state
            .iter()
            .flatten()
            .find(|s| &s.stream_descriptor == stream)
            .and_then(|s| s.stream_state.as_ref())
    }

    /// Whether the legacy `state` blob is missing, null or an empty object or array.
    pub fn is_state_empty(&self) -> bool {
        match &self.state {
            None | Some(Value::Null) => true,
            Some(Value::Object(map)) => map.is_empty(),
            Some(Value::Array(items)) => items.is_empty(),
            Some(_) => false,
        }
    }
}

/// How a configured stream is synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Every sync re-reads the whole stream.
    FullRefresh,
    /// Syncs resume from persisted state.
    Incremental,
}

/// A stream selected for replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfiguredStream {
    /// Stream identity
    pub stream: StreamDescriptor,
    /// Sync mode
    pub sync_mode: SyncMode,
}

/// The set of streams a sync replicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredCatalog {
    /// Configured streams
    pub streams: Vec<ConfiguredStream>,
}

impl ConfiguredCatalog {
    /// Streams synced incrementally.
    pub fn incremental_streams(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams
            .iter()
            .filter(|s| s.sync_mode == SyncMode::Incremental)
            .map(|s| &s.stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_message_wire_format() {
        let message: StateMessage = serde_json::from_value(json!({
            "type": "STREAM",
            "stream_descriptor": { "name": "users", "namespace": "public" },
            "stream_state": { "cursor": 10 }
        }))
        .unwrap();

        assert_eq!(message.state_type(), StateType::Stream);
        assert_eq!(
            message,
            StateMessage::stream(
                StreamDescriptor::new("users", Some("public")),
                json!({ "cursor": 10 })
            )
        );
    }

    #[test]
    fn test_connection_state_uses_camel_case() {
        let id = Uuid::new_v4();
        let value = serde_json::to_value(ConnectionState::not_set(id)).unwrap();

        assert_eq!(value["connectionId"], json!(id.to_string()));
        assert_eq!(value["stateType"], json!("not_set"));
        assert!(value.get("streamState").is_none());
    }

    #[test]
    fn test_incremental_streams() {
        let catalog = ConfiguredCatalog {
            streams: vec![
                ConfiguredStream {
                    stream: StreamDescriptor::new("users", None),
                    sync_mode: SyncMode::Incremental,
                },
                ConfiguredStream {
                    stream: StreamDescriptor::new("orders", None),
                    sync_mode: SyncMode::FullRefresh,
                },
            ],
        };

        let names: Vec<_> = catalog.incremental_streams().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["users"]);
    }
}
