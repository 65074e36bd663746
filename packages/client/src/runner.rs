//! Client entry point: resolves command-line options and runs the session.

use std::path::{Path, PathBuf};

use tsunagi_realtime::{
    RealtimeConfig,
    domain::{ConversationId, OrganizationId},
};

use super::{error::ClientError, session::run_client_session};

/// Raw options as given on the command line
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Realtime WebSocket endpoint
    pub realtime_url: String,
    /// Base URL of the messaging REST API
    pub rest_url: String,
    /// Base URL of the identity service
    pub auth_url: String,
    /// URL probed before each connection attempt (defaults to `rest_url`)
    pub probe_url: Option<String>,
    /// Public API key sent with every request
    pub api_key: Option<String>,
    pub organization_id: String,
    pub conversation_id: Option<String>,
    /// Overrides `sender_name` of the config
    pub display_name: Option<String>,
    /// JSON file with `RealtimeConfig` overrides
    pub config_path: Option<PathBuf>,
}

/// Validated settings used to build a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub realtime_url: String,
    pub rest_url: String,
    pub auth_url: String,
    pub probe_url: String,
    pub api_key: Option<String>,
    pub organization_id: OrganizationId,
    pub conversation_id: Option<ConversationId>,
    pub config: RealtimeConfig,
}

impl ClientOptions {
    /// Validate ids, load the config file and apply overrides
    ///
    /// # Returns
    ///
    /// * `Ok(SessionSettings)` - Settings ready for [`run_client_session`]
    /// * `Err(ClientError)` - An id is invalid or the config file is unusable
    pub fn resolve(self) -> Result<SessionSettings, ClientError> {
        let organization_id = OrganizationId::new(self.organization_id)
            .map_err(|e| ClientError::InvalidArgument(e.to_string()))?;
        let conversation_id = self
            .conversation_id
            .map(ConversationId::new)
            .transpose()
            .map_err(|e| ClientError::InvalidArgument(e.to_string()))?;

        let mut config = load_config(self.config_path.as_deref())?;
        if let Some(name) = self.display_name {
            config.sender_name = name;
        }

        Ok(SessionSettings {
            realtime_url: realtime_endpoint(&self.realtime_url, self.api_key.as_deref()),
            probe_url: self.probe_url.unwrap_or_else(|| self.rest_url.clone()),
            rest_url: self.rest_url,
            auth_url: self.auth_url,
            api_key: self.api_key,
            organization_id,
            conversation_id,
            config,
        })
    }
}

/// Load `RealtimeConfig` from a JSON file, or defaults when no file is given
pub fn load_config(path: Option<&Path>) -> Result<RealtimeConfig, ClientError> {
    let Some(path) = path else {
        return Ok(RealtimeConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))?;
    RealtimeConfig::from_json(&json)
        .map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))
}

/// Add the protocol version and API key to the realtime URL unless present
pub fn realtime_endpoint(url: &str, api_key: Option<&str>) -> String {
    let mut endpoint = url.to_string();
    let mut add_param = |key: &str, value: &str| {
        if endpoint.contains(&format!("{}=", key)) {
            return;
        }
        let separator = if endpoint.contains('?') { '&' } else { '?' };
        endpoint.push_str(&format!("{}{}={}", separator, key, value));
    };

    if let Some(api_key) = api_key {
        add_param("apikey", api_key);
    }
    add_param("vsn", "1.0.0");
    endpoint
}

/// Run the terminal client until the visitor quits
pub async fn run_client(options: ClientOptions) -> Result<(), Box<dyn std::error::Error>> {
    let settings = options.resolve()?;

    tracing::info!(
        "Starting client for organization '{}' as '{}'",
        settings.organization_id,
        settings.config.sender_name
    );

    run_client_session(settings).await?;
    tracing::info!("Client session ended normally");
    Ok(())
}
