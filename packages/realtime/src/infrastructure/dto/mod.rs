//! Data Transfer Objects
//!
//! Wire formats and their conversion to domain types.

pub mod conversion;
pub mod phoenix;
pub mod websocket;

pub use conversion::{InboundEvent, MessageTranslator};
