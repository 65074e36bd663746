//! Shared utilities for the tsunagi packages.
//!
//! - `logger`: tracing subscriber setup for binaries
//! - `time`: clock abstraction and timestamp formatting

pub mod logger;
pub mod time;
