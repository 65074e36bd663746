//! Pub/sub transport interface.
//!
//! The transport exposes named channels. A channel is configured with
//! [`ChannelHandle::on`], joined with [`ChannelHandle::subscribe`], and reports
//! both its subscription status and inbound events on the stream returned by
//! [`ChannelHandle::events`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{error::TransportError, value_object::ChannelName};

/// Join state of a channel as tracked by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Joining,
    Joined,
    Leaving,
    Errored,
}

/// Subscription status reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeStatus {
    Subscribed,
    TimedOut,
    Closed,
    ChannelError(String),
}

/// Something the transport delivered on a channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Status(SubscribeStatus),
    /// Client-originated broadcast, e.g. `message:created`
    Broadcast { event: String, payload: Value },
    /// Row change streamed from the database
    DatabaseChange {
        change_type: String,
        table: String,
        record: Value,
    },
}

/// Interest registered on a channel before subscribing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBinding {
    Broadcast {
        event: String,
    },
    DatabaseChange {
        event: String,
        schema: String,
        table: String,
        filter: Option<String>,
    },
}

/// Options used when the channel is created
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelOptions {
    /// Receive our own broadcasts back
    pub broadcast_self: bool,
    /// Ask the server to acknowledge broadcasts
    pub broadcast_ack: bool,
}

/// Outbound broadcast frame
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastMessage {
    pub event: String,
    pub payload: Value,
}

impl BroadcastMessage {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

/// A channel created by a [`RealtimeTransport`]
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    fn name(&self) -> &ChannelName;

    fn state(&self) -> ChannelState;

    fn is_joined(&self) -> bool {
        self.state() == ChannelState::Joined
    }

    /// Register interest in an event kind. Must be called before `subscribe`.
    fn on(&self, binding: EventBinding);

    /// New receiver for status changes and inbound events of this channel
    fn events(&self) -> broadcast::Receiver<ChannelEvent>;

    /// Start joining. The outcome arrives as [`ChannelEvent::Status`].
    async fn subscribe(&self) -> Result<(), TransportError>;

    async fn send(&self, message: BroadcastMessage) -> Result<(), TransportError>;
}

/// Pub/sub transport collaborator
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Set the bearer token used for subsequent joins
    async fn set_auth(&self, token: &str);

    fn channel(&self, name: &ChannelName, options: ChannelOptions) -> Arc<dyn ChannelHandle>;

    /// Tear a channel down. Must be idempotent and safe on dead handles.
    async fn remove_channel(&self, handle: Arc<dyn ChannelHandle>) -> Result<(), TransportError>;
}
