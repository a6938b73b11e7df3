use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Phoenix and Realtime event names
pub mod events {
    pub const JOIN: &str = "phx_join";
    pub const REPLY: &str = "phx_reply";
    pub const LEAVE: &str = "phx_leave";
    pub const ERROR: &str = "phx_error";
    pub const CLOSE: &str = "phx_close";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const POSTGRES_CHANGES: &str = "postgres_changes";
    pub const SYSTEM: &str = "system";
}

/// Topic used by connection level messages such as heartbeats
pub const PHOENIX_TOPIC: &str = "phoenix";

/// A full message received or sent over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub message_ref: Option<String>,
}

impl RealtimeMessage {
    pub fn new(topic: &str, event: &str, payload: Value, message_ref: Option<String>) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            message_ref,
        }
    }

    pub fn heartbeat(message_ref: String) -> Self {
        Self::new(PHOENIX_TOPIC, events::HEARTBEAT, Value::Object(Default::default()), Some(message_ref))
    }

    /// Status of a `phx_reply` (`ok` / `error`)
    pub fn reply_status(&self) -> Option<&str> {
        self.payload.get("status").and_then(Value::as_str)
    }
}

/// Kind of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// A row change delivered on a `postgres_changes` event
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PostgresChange {
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub commit_timestamp: Option<String>,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// The new row, for inserts and updates
    #[serde(default)]
    pub record: Value,
    /// The previous row (only the primary key unless replica identity is full)
    #[serde(default)]
    pub old_record: Value,
}

impl PostgresChange {
    /// Extract the change from the payload of a `postgres_changes` message
    pub fn from_payload(payload: &Value) -> Result<Self, Error> {
        let data = payload
            .get("data")
            .ok_or_else(|| Error::realtime("postgres_changes payload without data"))?;
        Ok(serde_json::from_value(data.clone())?)
    }
}
