//! Backend messaging API interface (durable delivery path).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    error::ApiError,
    message::SenderType,
    value_object::ConversationId,
};

/// Body of `POST /messages`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub content: String,
    pub sender_type: SenderType,
    pub sender_name: String,
}

/// Server acknowledgement of `POST /messages`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedMessage {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Body of `POST /typing`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub conversation_id: ConversationId,
    pub is_typing: bool,
    pub visitor_id: String,
}

/// HTTP messaging API collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagingApi: Send + Sync {
    async fn post_message(&self, message: NewMessage) -> Result<ConfirmedMessage, ApiError>;

    /// Durable typing state for hosts that persist it; the realtime core
    /// broadcasts typing and never calls this.
    async fn post_typing(&self, update: TypingUpdate) -> Result<(), ApiError>;
}
