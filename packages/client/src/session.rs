//! Terminal chat session on top of the connection manager.

use std::sync::Arc;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::{Mutex, mpsc};

use tsunagi_realtime::{
    ChannelRegistry, ConnectionManager, TypingIndicatorController,
    domain::{
        ChannelEventHandler, Message, MessageLog, OrganizationId, RealtimeEvent, SenderType,
    },
    infrastructure::{
        http::{HttpIdentityProvider, HttpMessagingApi, HttpNetworkProbe},
        transport::WebSocketTransport,
    },
    usecase::AuthSessionProvider,
};
use tsunagi_shared::time::SystemClock;

use super::{
    command::{Input, parse_input},
    error::ClientError,
    formatter::MessageFormatter,
    runner::SessionSettings,
    ui::redisplay_prompt,
};

/// Everything the input loop needs to act on one line
struct InputContext {
    manager: ConnectionManager,
    typing: TypingIndicatorController,
    log: Arc<Mutex<MessageLog>>,
    organization_id: OrganizationId,
    sender_name: String,
}

/// Run the terminal session until the visitor quits
pub async fn run_client_session(
    settings: SessionSettings,
) -> Result<(), Box<dyn std::error::Error>> {
    let transport = Arc::new(WebSocketTransport::new(settings.realtime_url.clone()));
    let registry = Arc::new(ChannelRegistry::new(transport));
    let identity = HttpIdentityProvider::new(settings.auth_url.clone(), settings.api_key.as_deref())
        .map_err(|e| ClientError::Setup(e.to_string()))?;
    let auth = Arc::new(AuthSessionProvider::new(
        Arc::new(identity),
        Arc::new(SystemClock),
    ));
    let probe = HttpNetworkProbe::new(settings.probe_url.clone(), settings.api_key.as_deref())
        .map_err(|e| ClientError::Setup(e.to_string()))?;
    let api = HttpMessagingApi::new(settings.rest_url.clone(), settings.api_key.as_deref())
        .map_err(|e| ClientError::Setup(e.to_string()))?;

    let (handler, events) = ChannelEventHandler::new();
    let sender_name = settings.config.sender_name.clone();
    let debounce = settings.config.typing_debounce();
    let manager = ConnectionManager::new(
        registry,
        auth,
        Arc::new(probe),
        Arc::new(api),
        Arc::new(handler),
        settings.config,
    );
    let typing = TypingIndicatorController::new(Arc::new(manager.clone()), debounce);
    let log = Arc::new(Mutex::new(MessageLog::new()));

    println!(
        "\nYou are '{}'. Type messages and press Enter to send. \
         Use /conversation <id> to switch, /status to inspect, Ctrl+C to exit.\n",
        sender_name
    );
    if settings.conversation_id.is_none() {
        println!("No conversation yet. Use /conversation <id> to join one.\n");
    }
    manager
        .connect(settings.organization_id.clone(), settings.conversation_id)
        .await;

    let mut event_task = tokio::spawn(print_events(
        events,
        log.clone(),
        manager.visitor_id().to_string(),
        sender_name.clone(),
    ));

    // Create channel for rustyline input
    let (input_tx, input_rx) = mpsc::unbounded_channel::<String>();
    let prompt = format!("{}> ", sender_name);

    // Spawn a blocking thread for rustyline (synchronous readline)
    let _readline_handle = std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("Failed to initialize readline: {}", e);
                return;
            }
        };

        loop {
            match rl.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        rl.add_history_entry(line).ok();
                        if input_tx.send(line.to_string()).is_err() {
                            break;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    tracing::info!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    tracing::info!("EOF");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });

    let context = InputContext {
        manager: manager.clone(),
        typing,
        log,
        organization_id: settings.organization_id,
        sender_name,
    };
    let mut input_task = tokio::spawn(handle_input(input_rx, context));

    tokio::select! {
        _ = &mut input_task => {
            event_task.abort();
        }
        _ = &mut event_task => {
            input_task.abort();
        }
    }

    manager.disconnect().await;
    Ok(())
}

/// Print realtime events, deduplicating messages through the log
async fn print_events(
    mut events: mpsc::UnboundedReceiver<RealtimeEvent>,
    log: Arc<Mutex<MessageLog>>,
    visitor_id: String,
    prompt_name: String,
) {
    while let Some(event) = events.recv().await {
        let output = match event {
            RealtimeEvent::Message(message) => {
                let inserted = log.lock().await.insert(message.clone());
                inserted.then(|| MessageFormatter::format_message(&message))
            }
            RealtimeEvent::Typing(typing) if typing.user_id != visitor_id => {
                MessageFormatter::format_typing(&typing)
            }
            RealtimeEvent::Typing(_) => None,
            RealtimeEvent::ConnectionChanged(change) => {
                Some(MessageFormatter::format_connection(&change))
            }
            RealtimeEvent::StateChanged(state) => {
                tracing::debug!("Connection state: {}", state);
                None
            }
        };

        if let Some(output) = output {
            print!("{}", output);
            redisplay_prompt(&prompt_name);
        }
    }
}

/// Act on each input line until the visitor quits or stdin closes
async fn handle_input(mut input_rx: mpsc::UnboundedReceiver<String>, context: InputContext) {
    while let Some(line) = input_rx.recv().await {
        match parse_input(&line) {
            Input::Message(content) => send_line(&context, content).await,
            Input::SwitchConversation(conversation_id) => {
                context.typing.notify_stopped().await;
                *context.log.lock().await = MessageLog::new();
                println!("Switching to conversation '{}'", conversation_id);
                context
                    .manager
                    .connect(context.organization_id.clone(), Some(conversation_id))
                    .await;
            }
            Input::Status => {
                print!(
                    "{}",
                    MessageFormatter::format_status(
                        context.manager.state(),
                        &context.manager.status_message(),
                        &context.manager.metrics(),
                    )
                );
            }
            Input::Quit => break,
            Input::Invalid(reason) => println!("{}", reason),
        }
    }
    context.typing.notify_stopped().await;
}

/// Send one line with an optimistic placeholder in the log
async fn send_line(context: &InputContext, content: String) {
    let Some(conversation_id) = context.manager.conversation_id() else {
        print!(
            "{}",
            MessageFormatter::format_failed(&content, "No conversation selected")
        );
        return;
    };

    context.typing.notify_typing().await;

    let placeholder = Message::optimistic(
        conversation_id,
        content.clone(),
        SenderType::Visitor,
        context.sender_name.clone(),
        chrono::Utc::now(),
    );
    let temp_id = placeholder.id.clone();
    context.log.lock().await.insert(placeholder);

    let result = context
        .manager
        .send_message(content.clone(), SenderType::Visitor)
        .await;
    context.typing.notify_stopped().await;

    match result {
        Ok(confirmed) => {
            print!("{}", MessageFormatter::format_sent_confirmation(&confirmed));
            context.log.lock().await.reconcile(&temp_id, confirmed);
        }
        Err(e) => {
            tracing::warn!("Failed to send message: {}", e);
            context.log.lock().await.mark_failed(&temp_id);
            print!("{}", MessageFormatter::format_failed(&content, &e.to_string()));
        }
    }
}
