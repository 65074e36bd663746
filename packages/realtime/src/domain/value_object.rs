//! Value objects: identifiers and the channel name.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Prefix of placeholder ids assigned to optimistic messages.
pub const TEMP_ID_PREFIX: &str = "temp-";

fn validate_segment(kind: &'static str, value: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::EmptyId { kind });
    }
    if value.contains(':') {
        return Err(DomainError::InvalidIdCharacter {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}

macro_rules! segment_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                validate_segment($kind, &value)?;
                Ok(Self(value))
            }

            /// Accept a server-provided value without validation.
            ///
            /// Only for ids read from wire records; never use for ids that
            /// end up in a channel name.
            #[allow(dead_code)]
            pub(crate) fn from_wire(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

segment_id!(
    /// Tenant that owns the widget installation
    OrganizationId,
    "organization id"
);

segment_id!(
    /// Support conversation between a visitor and the organization
    ConversationId,
    "conversation id"
);

/// Message identifier, either server-assigned or a `temp-` placeholder
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a placeholder id for an optimistic message
    pub fn temporary() -> Self {
        Self(format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4()))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical channel name `org:{organizationId}:conv:{conversationId}`.
///
/// The format must match what server-side broadcasters publish to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn for_conversation(
        organization_id: &OrganizationId,
        conversation_id: &ConversationId,
    ) -> Self {
        Self(format!(
            "org:{}:conv:{}",
            organization_id.as_str(),
            conversation_id.as_str()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
