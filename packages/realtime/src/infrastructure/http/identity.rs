//! HTTP identity provider keeping the session in memory.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{build_client, endpoint};
use crate::domain::{AnonymousMetadata, IdentityError, IdentityProvider, Session};

#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Serialize)]
struct SignUpRequest<'a> {
    data: &'a AnonymousMetadata,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Clone)]
struct StoredSession {
    access_token: String,
    refresh_token: Option<String>,
}

/// reqwest implementation of [`IdentityProvider`]
///
/// - anonymous sign-up: `POST {auth}/signup` with `{"data": metadata}`
/// - refresh: `POST {auth}/token?grant_type=refresh_token` with `{"refresh_token"}`
///
/// The session lives only as long as this value.
#[derive(Debug)]
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    auth_url: String,
    session: Mutex<Option<StoredSession>>,
}

impl HttpIdentityProvider {
    pub fn new(auth_url: impl Into<String>, api_key: Option<&str>) -> Result<Self, IdentityError> {
        let client = build_client(api_key).map_err(IdentityError::Request)?;
        Ok(Self {
            client,
            auth_url: auth_url.into(),
            session: Mutex::new(None),
        })
    }

    fn stored(&self) -> Option<StoredSession> {
        match self.session.lock() {
            Ok(session) => session.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store(&self, token: TokenResponse) -> Session {
        let stored = StoredSession {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
        };
        let session = Session {
            access_token: stored.access_token.clone(),
        };
        match self.session.lock() {
            Ok(mut current) => *current = Some(stored),
            Err(poisoned) => *poisoned.into_inner() = Some(stored),
        }
        session
    }

    async fn request_token<B: Serialize + Sync>(
        &self,
        url: String,
        body: &B,
    ) -> Result<TokenResponse, IdentityError> {
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| IdentityError::Request(e.to_string()))?;

        let status = response.status();
        tracing::debug!(status = %status, "POST {}", url);
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IdentityError::Rejected {
                status: status.as_u16(),
                message: rejection_message(&body),
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| IdentityError::Request(format!("invalid token response: {}", e)))
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn get_session(&self) -> Result<Option<Session>, IdentityError> {
        Ok(self.stored().map(|stored| Session {
            access_token: stored.access_token,
        }))
    }

    async fn sign_in_anonymously(
        &self,
        metadata: AnonymousMetadata,
    ) -> Result<Session, IdentityError> {
        let url = endpoint(&self.auth_url, "signup");
        let token = self
            .request_token(url, &SignUpRequest { data: &metadata })
            .await?;
        tracing::info!("Signed in anonymously as visitor {}", metadata.visitor_id);
        Ok(self.store(token))
    }

    async fn refresh_session(&self) -> Result<Session, IdentityError> {
        let refresh_token = self
            .stored()
            .and_then(|stored| stored.refresh_token)
            .ok_or(IdentityError::NoSession)?;

        let url = endpoint(&self.auth_url, "token?grant_type=refresh_token");
        let token = self
            .request_token(
                url,
                &RefreshRequest {
                    refresh_token: &refresh_token,
                },
            )
            .await?;
        tracing::debug!("Session refreshed");
        Ok(self.store(token))
    }
}

/// Pick the human-readable part of an auth error body
fn rejection_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["msg", "error_description", "message", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.to_string())
}
