//! Infrastructure layer
//!
//! Concrete adapters for the domain collaborator traits.

pub mod dto;
pub mod http;
pub mod transport;
