//! UseCase layer
//!
//! Connection supervision built on the domain interfaces.

pub mod auth_session;
pub mod channel_registry;
pub mod connection_manager;
pub mod metrics;
pub mod typing_indicator;

pub use auth_session::AuthSessionProvider;
pub use channel_registry::{AcquiredChannel, ChannelRegistry};
pub use connection_manager::ConnectionManager;
pub use metrics::{ConnectionMetrics, MetricsSnapshot};
pub use typing_indicator::{TypingIndicatorController, TypingSink};
