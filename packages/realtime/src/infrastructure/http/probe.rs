//! HTTP reachability probe

use async_trait::async_trait;

use super::build_client;
use crate::domain::{NetworkProbe, ProbeError};

/// `GET` on a health URL. Any status below 500 counts as reachable, since
/// the endpoint may legitimately answer 401/404 to an anonymous request.
#[derive(Debug, Clone)]
pub struct HttpNetworkProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpNetworkProbe {
    pub fn new(url: impl Into<String>, api_key: Option<&str>) -> Result<Self, ProbeError> {
        let client = build_client(api_key).map_err(ProbeError::Unreachable)?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NetworkProbe for HttpNetworkProbe {
    async fn probe(&self) -> Result<(), ProbeError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ProbeError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            tracing::debug!(status = %status, "Probe answered with a server error");
            return Err(ProbeError::Unhealthy(status.as_u16()));
        }
        Ok(())
    }
}
