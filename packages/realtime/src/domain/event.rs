//! Outbound event interface between the connection manager and its host.

use tokio::sync::mpsc;

use super::{
    connection::{ConnectionChange, ConnectionState},
    message::{Message, TypingEvent},
};

/// Receives everything the connection manager emits.
///
/// Messages are delivered at least once: the same message may arrive both as
/// a broadcast and as a database change. Hosts deduplicate by message id,
/// e.g. with [`MessageLog`](super::message::MessageLog).
pub trait RealtimeEventHandler: Send + Sync {
    fn on_message(&self, message: Message);

    fn on_typing(&self, typing: TypingEvent);

    fn on_connection_change(&self, change: ConnectionChange);

    /// Every state machine transition, in order
    fn on_state_change(&self, _state: ConnectionState) {}
}

/// Event forwarded by [`ChannelEventHandler`]
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Message(Message),
    Typing(TypingEvent),
    ConnectionChanged(ConnectionChange),
    StateChanged(ConnectionState),
}

/// Handler that forwards every event into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelEventHandler {
    sender: mpsc::UnboundedSender<RealtimeEvent>,
}

impl ChannelEventHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RealtimeEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn forward(&self, event: RealtimeEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("Realtime event receiver dropped, discarding event");
        }
    }
}

impl RealtimeEventHandler for ChannelEventHandler {
    fn on_message(&self, message: Message) {
        self.forward(RealtimeEvent::Message(message));
    }

    fn on_typing(&self, typing: TypingEvent) {
        self.forward(RealtimeEvent::Typing(typing));
    }

    fn on_connection_change(&self, change: ConnectionChange) {
        self.forward(RealtimeEvent::ConnectionChanged(change));
    }

    fn on_state_change(&self, state: ConnectionState) {
        self.forward(RealtimeEvent::StateChanged(state));
    }
}
