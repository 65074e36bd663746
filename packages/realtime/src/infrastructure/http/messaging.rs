//! HTTP messaging API (durable delivery path)

use async_trait::async_trait;

use super::{build_client, endpoint};
use crate::domain::{ApiError, ConfirmedMessage, MessagingApi, NewMessage, TypingUpdate};

/// reqwest implementation of [`MessagingApi`]
///
/// - `POST {base}/messages` with a camelCase [`NewMessage`]
/// - `POST {base}/typing` with a camelCase [`TypingUpdate`]
#[derive(Debug, Clone)]
pub struct HttpMessagingApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMessagingApi {
    pub fn new(base_url: impl Into<String>, api_key: Option<&str>) -> Result<Self, ApiError> {
        let client = build_client(api_key).map_err(ApiError::Request)?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn post<B: serde::Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ApiError> {
        let url = endpoint(&self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;

        let status = response.status();
        tracing::debug!(status = %status, "POST {}", url);
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl MessagingApi for HttpMessagingApi {
    async fn post_message(&self, message: NewMessage) -> Result<ConfirmedMessage, ApiError> {
        let response = self.post("messages", &message).await?;
        response
            .json::<ConfirmedMessage>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    async fn post_typing(&self, update: TypingUpdate) -> Result<(), ApiError> {
        self.post("typing", &update).await?;
        Ok(())
    }
}
