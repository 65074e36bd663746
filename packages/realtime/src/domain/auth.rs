//! Bearer tokens and the identity collaborator interface.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use super::{error::IdentityError, value_object::OrganizationId};

/// Bearer token together with its decoded expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub value: String,
    pub expires_at_epoch_seconds: i64,
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: i64,
}

impl AuthToken {
    /// Decode the `exp` claim from a three-part token.
    ///
    /// The signature is not verified; the server does that. Only the expiry is
    /// needed to decide whether a refresh is due.
    pub fn decode(value: &str) -> Result<Self, String> {
        let mut parts = value.split('.');
        let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err("expected three dot-separated segments".to_string()),
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| format!("payload is not base64url: {}", e))?;
        let claim: ExpiryClaim = serde_json::from_slice(&bytes)
            .map_err(|e| format!("payload has no numeric exp: {}", e))?;

        Ok(Self {
            value: value.to_string(),
            expires_at_epoch_seconds: claim.exp,
        })
    }

    /// A token expiring exactly now is already unusable.
    pub fn is_expired_at(&self, now_epoch_seconds: i64) -> bool {
        self.expires_at_epoch_seconds <= now_epoch_seconds
    }
}

/// Session as returned by the identity collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
}

/// Metadata attached to an anonymous visitor session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnonymousMetadata {
    pub organization_id: OrganizationId,
    pub visitor_id: String,
}

/// Identity provider collaborator
///
/// `get_session` returning `Ok(None)` means no session exists yet.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn get_session(&self) -> Result<Option<Session>, IdentityError>;

    async fn sign_in_anonymously(
        &self,
        metadata: AnonymousMetadata,
    ) -> Result<Session, IdentityError>;

    async fn refresh_session(&self) -> Result<Session, IdentityError>;
}
