//! reqwest-based adapters for the backend HTTP services

pub mod identity;
pub mod messaging;
pub mod probe;

pub use identity::HttpIdentityProvider;
pub use messaging::HttpMessagingApi;
pub use probe::HttpNetworkProbe;

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

/// Default request timeout of the HTTP adapters
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a client that sends `apikey` on every request when a key is given.
fn build_client(api_key: Option<&str>) -> Result<reqwest::Client, String> {
    let mut headers = HeaderMap::new();
    if let Some(key) = api_key {
        let value =
            HeaderValue::from_str(key).map_err(|e| format!("invalid api key header value: {}", e))?;
        headers.insert("apikey", value);
    }

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| format!("failed to build HTTP client: {}", e))
}

/// Join a base URL and a path without doubling the slash
fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}
