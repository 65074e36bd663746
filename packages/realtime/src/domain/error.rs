//! Error types for the realtime connection subsystem.
//!
//! Connection-level errors (`AuthError`, `ProbeError`, `SubscriptionError`) are
//! retried by the connection manager and never reach the caller directly.
//! `SendError` is returned from `send_message`; `BroadcastError` is only logged.

use thiserror::Error;

/// Invalid value object input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// The identifier is empty or whitespace only
    #[error("{kind} must not be empty")]
    EmptyId { kind: &'static str },

    /// The identifier contains the channel-name separator
    #[error("{kind} '{value}' must not contain ':'")]
    InvalidIdCharacter { kind: &'static str, value: String },
}

/// Errors reported by the identity collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// There is no session to refresh
    #[error("No active session")]
    NoSession,

    /// The identity service rejected the request
    #[error("Identity service rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The identity service could not be reached
    #[error("Identity request failed: {0}")]
    Request(String),
}

/// Errors raised while obtaining a usable bearer token
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Session retrieval failed and anonymous sign-in failed too
    #[error("Anonymous sign-in failed: {0}")]
    AnonymousSignIn(IdentityError),

    /// The session was expired and refreshing it failed
    #[error("Session refresh failed: {0}")]
    Refresh(IdentityError),

    /// The identity provider handed out a token that is already expired
    #[error("Token expired at {expires_at} (now {now})")]
    Expired { expires_at: i64, now: i64 },

    /// The identity provider handed out a token whose expiry cannot be read
    #[error("Token is malformed: {0}")]
    MalformedToken(String),
}

/// The pre-connection network test failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The endpoint could not be reached
    #[error("Realtime endpoint unreachable: {0}")]
    Unreachable(String),

    /// The endpoint answered with a server error
    #[error("Realtime endpoint unhealthy (status {0})")]
    Unhealthy(u16),

    /// No answer within the probe timeout
    #[error("Network probe timed out after {0}ms")]
    TimedOut(u64),
}

/// Errors reported by the pub/sub transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The socket could not be opened
    #[error("Transport connection failed: {0}")]
    Connect(String),

    /// The channel is not joined, so nothing can be sent on it
    #[error("Channel '{0}' is not joined")]
    NotJoined(String),

    /// A frame could not be written
    #[error("Transport send failed: {0}")]
    Send(String),

    /// A frame could not be encoded
    #[error("Frame encoding failed: {0}")]
    Encode(String),
}

/// The channel subscription did not reach the joined state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// The transport reported the channel as closed
    #[error("Channel closed")]
    Closed,

    /// The transport (or the subscribe timeout) reported a timeout
    #[error("Channel subscription timed out")]
    TimedOut,

    /// The server refused the join or reported a channel error
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// The transport failed before a status was reported
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Any failure of a single connection attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

/// Errors reported by the backend messaging API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The API answered with a non-success status
    #[error("Messaging API returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The request did not complete
    #[error("Messaging API request failed: {0}")]
    Request(String),

    /// The response body could not be decoded
    #[error("Messaging API response invalid: {0}")]
    InvalidResponse(String),
}

/// Durable message delivery failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// `send_message` was called before any conversation was connected
    #[error("No conversation selected")]
    NoConversation,

    /// The message was rejected or not delivered by the HTTP API
    #[error("Message delivery failed: {0}")]
    Delivery(#[from] ApiError),
}

/// Realtime fan-out failed after a successful durable send
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BroadcastError {
    #[error("Broadcast of '{event}' failed: {source}")]
    Transport {
        event: String,
        #[source]
        source: TransportError,
    },

    #[error("Broadcast payload could not be encoded: {0}")]
    Encode(String),
}
