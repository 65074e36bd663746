//! Domain layer
//!
//! Pure types and the collaborator interfaces (transport, identity,
//! messaging API, probe). Implementations live in the infrastructure layer.

pub mod auth;
pub mod connection;
pub mod error;
pub mod event;
pub mod message;
pub mod messaging;
pub mod probe;
pub mod transport;
pub mod value_object;

pub use auth::{AnonymousMetadata, AuthToken, IdentityProvider, Session};
pub use connection::{ConnectionChange, ConnectionState, RetryPolicy};
pub use error::{
    ApiError, AuthError, BroadcastError, ConnectionError, DomainError, IdentityError, ProbeError,
    SendError, SubscriptionError, TransportError,
};
pub use event::{ChannelEventHandler, RealtimeEvent, RealtimeEventHandler};
pub use message::{Message, MessageLog, MessageStatus, SenderType, TypingEvent};
pub use messaging::{ConfirmedMessage, MessagingApi, NewMessage, TypingUpdate};
pub use probe::NetworkProbe;
pub use transport::{
    BroadcastMessage, ChannelEvent, ChannelHandle, ChannelOptions, ChannelState, EventBinding,
    RealtimeTransport, SubscribeStatus,
};
pub use value_object::{ChannelName, ConversationId, MessageId, OrganizationId};
