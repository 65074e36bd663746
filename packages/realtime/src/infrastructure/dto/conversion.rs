//! Conversion logic between wire records and domain entities.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::domain::{
    ChannelEvent, ConfirmedMessage, ConversationId, Message, MessageId, MessageStatus,
    SenderType, TypingEvent,
};

use super::websocket::{
    BroadcastMessagePayload, EVENT_HEARTBEAT, EVENT_MESSAGE_CREATED, EVENT_TYPING_START,
    EVENT_TYPING_STOP, MESSAGES_TABLE, MessageRow, TypingPayload, WireRecord,
};

/// Inbound channel event after translation
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Message(Message),
    Typing(TypingEvent),
    Heartbeat,
}

/// Stateless translator between wire shapes and the domain `Message`
pub struct MessageTranslator;

impl MessageTranslator {
    /// Normalize either wire shape into a `Message`.
    ///
    /// Total on well-formed records: unknown sender types become `system`,
    /// unknown statuses become `sent`, and an unreadable timestamp becomes the
    /// Unix epoch.
    pub fn to_domain(record: WireRecord) -> Message {
        match record {
            WireRecord::Row(row) => Self::assemble(
                row.id,
                row.conversation_id,
                row.content,
                &row.sender_type,
                row.sender_name,
                row.created_at.as_deref(),
                row.status.as_deref(),
            ),
            WireRecord::Broadcast(payload) => Self::assemble(
                payload.id,
                payload.conversation_id,
                payload.content,
                &payload.sender_type,
                payload.sender_name,
                payload.created_at.as_deref(),
                payload.status.as_deref(),
            ),
        }
    }

    /// Payload of the `message:created` broadcast for a confirmed message
    pub fn to_broadcast(message: &Message) -> BroadcastMessagePayload {
        BroadcastMessagePayload {
            id: message.id.as_str().to_string(),
            conversation_id: message.conversation_id.as_str().to_string(),
            content: message.content.clone(),
            sender_type: message.sender_type.as_str().to_string(),
            sender_name: Some(message.sender_name.clone()),
            created_at: Some(
                message
                    .created_at
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            status: Some(message.status.as_str().to_string()),
        }
    }

    /// Database-row shape of a message
    pub fn to_row(message: &Message) -> MessageRow {
        let payload = Self::to_broadcast(message);
        MessageRow {
            id: payload.id,
            conversation_id: payload.conversation_id,
            content: payload.content,
            sender_type: payload.sender_type,
            sender_name: payload.sender_name,
            created_at: payload.created_at,
            status: payload.status,
        }
    }

    /// Build the domain message from the HTTP API acknowledgement.
    ///
    /// The API only echoes `{id, content, createdAt, status}`; the rest comes
    /// from the request.
    pub fn from_confirmed(
        confirmed: ConfirmedMessage,
        conversation_id: ConversationId,
        sender_type: SenderType,
        sender_name: String,
    ) -> Message {
        Message {
            id: MessageId::new(confirmed.id),
            conversation_id,
            content: confirmed.content,
            sender_type,
            sender_name,
            created_at: parse_timestamp(confirmed.created_at.as_deref()),
            status: MessageStatus::from_wire(confirmed.status.as_deref()),
        }
    }

    /// Decode a typing broadcast. The event name decides start/stop.
    pub fn typing_to_domain(event: &str, payload: &Value) -> Option<TypingEvent> {
        let is_typing = match event {
            EVENT_TYPING_START => true,
            EVENT_TYPING_STOP => false,
            _ => return None,
        };

        let payload: TypingPayload = match serde_json::from_value(payload.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Ignoring malformed '{}' payload: {}", event, e);
                return None;
            }
        };

        Some(TypingEvent {
            user_id: payload.user_id,
            sender_type: payload
                .sender_type
                .as_deref()
                .map(SenderType::from_wire)
                .unwrap_or(SenderType::Agent),
            is_typing,
        })
    }

    /// Translate a channel event into what the host cares about.
    ///
    /// Status events and unrelated broadcasts yield `None`.
    pub fn inbound(event: &ChannelEvent) -> Option<InboundEvent> {
        match event {
            ChannelEvent::Broadcast { event, payload } => match event.as_str() {
                EVENT_MESSAGE_CREATED => Self::decode_record(event, payload).map(InboundEvent::Message),
                EVENT_TYPING_START | EVENT_TYPING_STOP => {
                    Self::typing_to_domain(event, payload).map(InboundEvent::Typing)
                }
                EVENT_HEARTBEAT => Some(InboundEvent::Heartbeat),
                other => {
                    tracing::trace!("Ignoring broadcast event '{}'", other);
                    None
                }
            },
            ChannelEvent::DatabaseChange {
                change_type,
                table,
                record,
            } if change_type == "INSERT" && table == MESSAGES_TABLE => {
                Self::decode_record("postgres_changes", record).map(InboundEvent::Message)
            }
            ChannelEvent::DatabaseChange { change_type, table, .. } => {
                tracing::trace!("Ignoring {} on table '{}'", change_type, table);
                None
            }
            ChannelEvent::Status(_) => None,
        }
    }

    fn decode_record(origin: &str, value: &Value) -> Option<Message> {
        match serde_json::from_value::<WireRecord>(value.clone()) {
            Ok(record) => Some(Self::to_domain(record)),
            Err(e) => {
                tracing::warn!("Ignoring malformed message record from '{}': {}", origin, e);
                None
            }
        }
    }

    fn assemble(
        id: String,
        conversation_id: String,
        content: String,
        sender_type: &str,
        sender_name: Option<String>,
        created_at: Option<&str>,
        status: Option<&str>,
    ) -> Message {
        let sender_type = SenderType::from_wire(sender_type);
        Message {
            id: MessageId::new(id),
            conversation_id: ConversationId::from_wire(conversation_id),
            content,
            sender_type,
            sender_name: sender_name.unwrap_or_else(|| default_sender_name(sender_type).to_string()),
            created_at: parse_timestamp(created_at),
            status: MessageStatus::from_wire(status),
        }
    }
}

fn default_sender_name(sender_type: SenderType) -> &'static str {
    match sender_type {
        SenderType::Visitor => "Visitor",
        SenderType::Agent => "Support",
        SenderType::AiAssistant => "Assistant",
        SenderType::System => "System",
    }
}

/// Accept RFC 3339 and the Postgres text format (`2024-01-01 12:00:00.123+00`).
fn parse_timestamp(value: Option<&str>) -> DateTime<Utc> {
    let Some(value) = value else {
        return DateTime::UNIX_EPOCH;
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return parsed.with_timezone(&Utc);
    }
    if let Ok(parsed) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return parsed.with_timezone(&Utc);
    }

    tracing::debug!("Unreadable timestamp '{}', using the Unix epoch", value);
    DateTime::UNIX_EPOCH
}
