//! Realtime connection core of the tsunagi support-chat widget.
//!
//! Keeps a visitor subscribed to the channel of their conversation: probes the
//! network, obtains a token, joins the channel, keeps it alive with heartbeats,
//! retries with exponential backoff and degrades to HTTP-only delivery when the
//! realtime service stays unreachable.

// layers
pub mod domain;
pub mod infrastructure;
pub mod usecase;

pub mod config;
pub mod testing;

pub use config::RealtimeConfig;
pub use usecase::{
    AuthSessionProvider, ChannelRegistry, ConnectionManager, MetricsSnapshot,
    TypingIndicatorController, TypingSink,
};
