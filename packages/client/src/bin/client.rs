//! Terminal support-chat client.
//!
//! Joins a conversation of an organization through the realtime connection
//! core and sends messages typed at the prompt. When live updates are
//! unavailable the client keeps sending over HTTP; `/conversation <id>`
//! switches to another conversation.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin tsunagi-client -- --organization O1 --conversation C1
//! cargo run --bin tsunagi-client -- -o O1 -n Aki --config realtime.json
//! ```

use std::path::PathBuf;

use clap::Parser;

use tsunagi_client::{ClientOptions, run_client};
use tsunagi_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "tsunagi-client")]
#[command(about = "Visitor-side support chat client with realtime updates", long_about = None)]
struct Args {
    /// Organization that owns the widget installation
    #[arg(short = 'o', long)]
    organization: String,

    /// Conversation to join on start
    #[arg(short = 'c', long)]
    conversation: Option<String>,

    /// Display name attached to sent messages
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Realtime WebSocket endpoint
    #[arg(long, default_value = "ws://127.0.0.1:54321/realtime/v1/websocket")]
    realtime_url: String,

    /// Messaging REST API base URL
    #[arg(long, default_value = "http://127.0.0.1:54321/rest/v1")]
    rest_url: String,

    /// Identity service base URL
    #[arg(long, default_value = "http://127.0.0.1:54321/auth/v1")]
    auth_url: String,

    /// URL probed before connecting (defaults to the REST URL)
    #[arg(long)]
    probe_url: Option<String>,

    /// Public API key
    #[arg(short = 'k', long, env = "TSUNAGI_API_KEY")]
    api_key: Option<String>,

    /// JSON file with realtime config overrides
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();
    let options = ClientOptions {
        realtime_url: args.realtime_url,
        rest_url: args.rest_url,
        auth_url: args.auth_url,
        probe_url: args.probe_url,
        api_key: args.api_key,
        organization_id: args.organization,
        conversation_id: args.conversation,
        display_name: args.name,
        config_path: args.config,
    };

    if let Err(e) = run_client(options).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}
