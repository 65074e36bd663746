//! Error types for the terminal client.

use thiserror::Error;

/// Client-specific errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// An organization or conversation id given on the command line is invalid
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The JSON config file could not be read or parsed
    #[error("Config error: {0}")]
    Config(String),

    /// An adapter could not be constructed
    #[error("Setup error: {0}")]
    Setup(String),
}
