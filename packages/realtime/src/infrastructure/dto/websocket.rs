//! Wire records exchanged over the realtime channel.
//!
//! A message reaches the client in two shapes:
//! - as a database row streamed by the change feed (snake_case fields)
//! - as a broadcast payload sent by another client (camelCase fields)

use serde::{Deserialize, Serialize};

/// Broadcast event announcing a confirmed message
pub const EVENT_MESSAGE_CREATED: &str = "message:created";
/// Broadcast event: someone started typing
pub const EVENT_TYPING_START: &str = "typing:start";
/// Broadcast event: someone stopped typing
pub const EVENT_TYPING_STOP: &str = "typing:stop";
/// Keep-alive broadcast
pub const EVENT_HEARTBEAT: &str = "heartbeat";

/// Database schema and table carrying conversation messages
pub const MESSAGES_SCHEMA: &str = "public";
pub const MESSAGES_TABLE: &str = "messages";

/// Row of the `messages` table as streamed by the change feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    pub sender_type: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Payload of a `message:created` broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessagePayload {
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    pub sender_type: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Either wire shape of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireRecord {
    Row(MessageRow),
    Broadcast(BroadcastMessagePayload),
}

/// Payload of `typing:start` / `typing:stop`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub sender_type: Option<String>,
    #[serde(default)]
    pub is_typing: Option<bool>,
}

/// Payload of the keep-alive broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_record_detects_database_row() {
        // テスト項目: snake_case のレコードはデータベース行として解釈される
        // given (前提条件):
        let json = r#"{"id":"m1","conversation_id":"C1","content":"hi","sender_type":"agent"}"#;

        // when (操作):
        let record: WireRecord = serde_json::from_str(json).unwrap();

        // then (期待する結果):
        assert!(matches!(record, WireRecord::Row(_)));
    }

    #[test]
    fn test_wire_record_detects_broadcast_payload() {
        // テスト項目: camelCase のレコードはブロードキャストとして解釈される
        // given (前提条件):
        let json = r#"{"id":"m1","conversationId":"C1","content":"hi","senderType":"agent","senderName":"Ann"}"#;

        // when (操作):
        let record: WireRecord = serde_json::from_str(json).unwrap();

        // then (期待する結果):
        match record {
            WireRecord::Broadcast(payload) => {
                assert_eq!(payload.sender_name.as_deref(), Some("Ann"));
            }
            other => panic!("unexpected record: {:?}", other),
        }
    }

    #[test]
    fn test_typing_payload_serializes_camel_case() {
        // テスト項目: タイピング通知が camelCase でシリアライズされる
        // given (前提条件):
        let payload = TypingPayload {
            conversation_id: Some("C1".to_string()),
            user_id: "v1".to_string(),
            sender_type: Some("visitor".to_string()),
            is_typing: Some(true),
        };

        // when (操作):
        let json = serde_json::to_value(&payload).unwrap();

        // then (期待する結果):
        assert_eq!(json["conversationId"], "C1");
        assert_eq!(json["userId"], "v1");
        assert_eq!(json["isTyping"], true);
    }
}
