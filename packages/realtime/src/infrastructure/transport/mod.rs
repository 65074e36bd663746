//! Realtime transport implementations

pub mod websocket;

pub use websocket::{WebSocketTransport, WsChannel};
