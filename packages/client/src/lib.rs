//! Terminal client for tsunagi.
//!
//! A visitor-side support chat in the terminal: inbound messages, typing
//! indicators and connection changes are printed as they arrive, and every
//! input line is sent through the connection manager.

mod command;
mod error;
mod formatter;
mod runner;
mod session;
mod ui;

pub use error::ClientError;
pub use runner::{ClientOptions, run_client};
