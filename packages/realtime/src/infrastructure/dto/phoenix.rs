//! Phoenix channel frames used by hosted realtime services.
//!
//! Every frame is `{topic, event, payload, ref, join_ref}` encoded as JSON text.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::domain::{ChannelOptions, EventBinding};

pub const PHX_JOIN: &str = "phx_join";
pub const PHX_LEAVE: &str = "phx_leave";
pub const PHX_REPLY: &str = "phx_reply";
pub const PHX_CLOSE: &str = "phx_close";
pub const PHX_ERROR: &str = "phx_error";
pub const BROADCAST: &str = "broadcast";
pub const POSTGRES_CHANGES: &str = "postgres_changes";
pub const ACCESS_TOKEN: &str = "access_token";

/// Prefix the server expects in front of channel names
pub const TOPIC_PREFIX: &str = "realtime:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixFrame {
    pub topic: String,
    pub event: String,
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub join_ref: Option<String>,
}

impl PhoenixFrame {
    pub fn new(topic: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            event: event.into(),
            payload,
            reference: None,
            join_ref: None,
        }
    }

    pub fn with_refs(mut self, reference: String, join_ref: Option<String>) -> Self {
        self.reference = Some(reference);
        self.join_ref = join_ref;
        self
    }
}

/// Reply to a join (or any pushed frame)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplyPayload {
    pub status: String,
    #[serde(default)]
    pub response: Value,
}

impl ReplyPayload {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// Best-effort reason text of an error reply
    pub fn reason(&self) -> String {
        self.response
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.response.to_string())
    }
}

/// Inner payload of a `broadcast` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

/// Inner payload of a `postgres_changes` frame
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PostgresChangesEnvelope {
    pub data: PostgresChangeData,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PostgresChangeData {
    #[serde(rename = "type")]
    pub change_type: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub record: Value,
}

pub fn topic_for(channel_name: &str) -> String {
    format!("{}{}", TOPIC_PREFIX, channel_name)
}

/// Payload of `phx_join` for a channel configured with `bindings`
pub fn join_payload(
    options: &ChannelOptions,
    bindings: &[EventBinding],
    access_token: Option<&str>,
) -> Value {
    let postgres_changes: Vec<Value> = bindings
        .iter()
        .filter_map(|binding| match binding {
            EventBinding::DatabaseChange {
                event,
                schema,
                table,
                filter,
            } => {
                let mut entry = json!({
                    "event": event,
                    "schema": schema,
                    "table": table,
                });
                if let Some(filter) = filter {
                    entry["filter"] = json!(filter);
                }
                Some(entry)
            }
            EventBinding::Broadcast { .. } => None,
        })
        .collect();

    let mut payload = json!({
        "config": {
            "broadcast": {
                "self": options.broadcast_self,
                "ack": options.broadcast_ack,
            },
            "presence": { "key": "" },
            "postgres_changes": postgres_changes,
        }
    });
    if let Some(token) = access_token {
        payload[ACCESS_TOKEN] = json!(token);
    }
    payload
}

pub fn broadcast_payload(event: &str, payload: Value) -> Value {
    json!({
        "type": BROADCAST,
        "event": event,
        "payload": payload,
    })
}
