//! Domain message model shared by every component.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value_object::{ConversationId, MessageId};

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Visitor,
    Agent,
    AiAssistant,
    System,
}

impl SenderType {
    /// Parse a wire value; anything unknown is treated as a system message.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "visitor" => Self::Visitor,
            "agent" => Self::Agent,
            "ai_assistant" => Self::AiAssistant,
            _ => Self::System,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Visitor => "visitor",
            Self::Agent => "agent",
            Self::AiAssistant => "ai_assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for SenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Parse a wire value; a record that reached us from the server is at least `sent`.
    pub fn from_wire(value: Option<&str>) -> Self {
        match value {
            Some("pending") => Self::Pending,
            Some("delivered") => Self::Delivered,
            Some("read") => Self::Read,
            Some("failed") => Self::Failed,
            _ => Self::Sent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }
}

/// A chat message as seen by the widget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub content: String,
    pub sender_type: SenderType,
    pub sender_name: String,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
}

impl Message {
    /// Create a local placeholder shown before the server confirms the message.
    pub fn optimistic(
        conversation_id: ConversationId,
        content: impl Into<String>,
        sender_type: SenderType,
        sender_name: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::temporary(),
            conversation_id,
            content: content.into(),
            sender_type,
            sender_name: sender_name.into(),
            created_at,
            status: MessageStatus::Pending,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        self.id.is_temporary()
    }

    pub fn set_status(&mut self, status: MessageStatus) {
        self.status = status;
    }
}

/// Someone started or stopped typing in the conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEvent {
    pub user_id: String,
    pub sender_type: SenderType,
    pub is_typing: bool,
}

/// Ordered, id-deduplicated view of a conversation kept by the consumer.
///
/// Realtime delivery is at-least-once: the same message can arrive as a
/// broadcast and as a database change. `insert` drops the second copy.
#[derive(Debug, Default, Clone)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message unless one with the same id is already present.
    ///
    /// Returns `true` when the message was added.
    pub fn insert(&mut self, message: Message) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Replace the optimistic placeholder `temp_id` with the confirmed copy.
    ///
    /// If the confirmed id already arrived through realtime, the placeholder
    /// is dropped instead. When no placeholder exists the confirmed message is
    /// inserted like any other.
    pub fn reconcile(&mut self, temp_id: &MessageId, confirmed: Message) {
        let placeholder = self.messages.iter().position(|m| &m.id == temp_id);
        let already_present = self.contains(&confirmed.id);

        match (placeholder, already_present) {
            (Some(index), true) => {
                self.messages.remove(index);
            }
            (Some(index), false) => {
                self.messages[index] = confirmed;
            }
            (None, _) => {
                self.insert(confirmed);
            }
        }
    }

    /// Mark a placeholder as failed so the UI can offer a manual retry.
    ///
    /// Returns `false` if the placeholder is unknown.
    pub fn mark_failed(&mut self, temp_id: &MessageId) -> bool {
        match self.messages.iter_mut().find(|m| &m.id == temp_id) {
            Some(message) => {
                message.set_status(MessageStatus::Failed);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| &m.id == id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
