//! Reusable test doubles for driving the connection core without a network.
//!
//! Hosts embedding the crate can use these in their own tests:
//! - [`MemoryTransport`] / [`MemoryChannel`]: scripted subscribe outcomes, recorded sends,
//!   and server-side event injection
//! - [`ScriptedProbe`]: a probe that fails, succeeds, or hangs on demand
//! - [`FakeIdentityProvider`]: sessions and tokens under test control
//! - [`RecordingMessagingApi`]: records posted messages and answers with confirmed copies
//! - [`token_expiring_at`]: builds a bearer token with a given `exp`

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::{Value, json};
use tokio::sync::broadcast;

use crate::{
    domain::{
        AnonymousMetadata, ApiError, BroadcastMessage, ChannelEvent, ChannelHandle, ChannelName,
        ChannelOptions, ChannelState, ConfirmedMessage, EventBinding, IdentityError,
        IdentityProvider, Message, MessagingApi, NetworkProbe, NewMessage, ProbeError,
        RealtimeTransport, Session, SubscribeStatus, TransportError, TypingUpdate,
    },
    infrastructure::dto::{
        MessageTranslator,
        websocket::{EVENT_MESSAGE_CREATED, MESSAGES_TABLE},
    },
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Build an unsigned three-part token whose payload carries `exp`.
pub fn token_expiring_at(exp_epoch_seconds: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({ "sub": "visitor", "exp": exp_epoch_seconds }).to_string());
    format!("{}.{}.c2lnbmF0dXJl", header, payload)
}

/// What a [`MemoryChannel`] does when `subscribe` is called
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeScript {
    /// Join and report `Subscribed`
    Succeed,
    /// Report the given status without joining
    Report(SubscribeStatus),
    /// Accept the join but never report a status
    Silent,
    /// Fail the `subscribe` call itself
    Fail(TransportError),
}

#[derive(Default)]
struct MemoryState {
    scripts: VecDeque<SubscribeScript>,
    default_script: Option<SubscribeScript>,
    channels: Vec<Arc<MemoryChannel>>,
    removed: Vec<ChannelName>,
    auth_tokens: Vec<String>,
    sent: Vec<(ChannelName, BroadcastMessage)>,
    fail_sends: bool,
}

/// In-memory [`RealtimeTransport`]
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    /// Transport whose channels join successfully unless scripted otherwise
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next `subscribe` calls, in order
    pub fn script_subscribe(&self, outcomes: impl IntoIterator<Item = SubscribeScript>) {
        lock(&self.state).scripts.extend(outcomes);
    }

    /// Outcome used once the queued scripts run out
    pub fn set_default_subscribe(&self, outcome: SubscribeScript) {
        lock(&self.state).default_script = Some(outcome);
    }

    /// Make every `send` fail with a transport error
    pub fn fail_sends(&self, fail: bool) {
        lock(&self.state).fail_sends = fail;
    }

    pub fn channels_created(&self) -> usize {
        lock(&self.state).channels.len()
    }

    pub fn channels(&self) -> Vec<Arc<MemoryChannel>> {
        lock(&self.state).channels.clone()
    }

    pub fn last_channel(&self) -> Option<Arc<MemoryChannel>> {
        lock(&self.state).channels.last().cloned()
    }

    /// Channels currently joined, across all names
    pub fn joined_channels(&self) -> usize {
        lock(&self.state)
            .channels
            .iter()
            .filter(|channel| channel.state() == ChannelState::Joined)
            .count()
    }

    /// Names passed to `remove_channel`, in call order
    pub fn removed(&self) -> Vec<ChannelName> {
        lock(&self.state).removed.clone()
    }

    pub fn auth_tokens(&self) -> Vec<String> {
        lock(&self.state).auth_tokens.clone()
    }

    /// Every successfully sent broadcast
    pub fn sent(&self) -> Vec<(ChannelName, BroadcastMessage)> {
        lock(&self.state).sent.clone()
    }

    /// Sent broadcasts with the given event name
    pub fn sent_events(&self, event: &str) -> Vec<BroadcastMessage> {
        lock(&self.state)
            .sent
            .iter()
            .filter(|(_, message)| message.event == event)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

#[async_trait]
impl RealtimeTransport for MemoryTransport {
    async fn set_auth(&self, token: &str) {
        lock(&self.state).auth_tokens.push(token.to_string());
    }

    fn channel(&self, name: &ChannelName, options: ChannelOptions) -> Arc<dyn ChannelHandle> {
        let (events, _) = broadcast::channel(64);
        let channel = Arc::new(MemoryChannel {
            name: name.clone(),
            options,
            state: Mutex::new(ChannelState::Closed),
            bindings: Mutex::new(Vec::new()),
            subscribe_calls: Mutex::new(0),
            events,
            transport: self.state.clone(),
        });
        lock(&self.state).channels.push(channel.clone());
        channel
    }

    async fn remove_channel(&self, handle: Arc<dyn ChannelHandle>) -> Result<(), TransportError> {
        let channel = {
            let mut state = lock(&self.state);
            state.removed.push(handle.name().clone());
            state
                .channels
                .iter()
                .find(|channel| {
                    std::ptr::addr_eq(Arc::as_ptr(*channel), Arc::as_ptr(&handle))
                })
                .cloned()
        };
        if let Some(channel) = channel.filter(|channel| channel.state() != ChannelState::Closed) {
            channel.set_state(ChannelState::Closed);
            channel.emit(ChannelEvent::Status(SubscribeStatus::Closed));
        }
        Ok(())
    }
}

/// Channel created by [`MemoryTransport`]
pub struct MemoryChannel {
    name: ChannelName,
    options: ChannelOptions,
    state: Mutex<ChannelState>,
    bindings: Mutex<Vec<EventBinding>>,
    subscribe_calls: Mutex<usize>,
    events: broadcast::Sender<ChannelEvent>,
    transport: Arc<Mutex<MemoryState>>,
}

impl MemoryChannel {
    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    pub fn bindings(&self) -> Vec<EventBinding> {
        lock(&self.bindings).clone()
    }

    pub fn subscribe_calls(&self) -> usize {
        *lock(&self.subscribe_calls)
    }

    fn set_state(&self, state: ChannelState) {
        *lock(&self.state) = state;
    }

    /// Push a raw event as if the server had sent it
    pub fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    /// Deliver a message as a database INSERT on the messages table
    pub fn deliver_row(&self, message: &Message) {
        let record = serde_json::to_value(MessageTranslator::to_row(message)).unwrap_or(Value::Null);
        self.emit(ChannelEvent::DatabaseChange {
            change_type: "INSERT".to_string(),
            table: MESSAGES_TABLE.to_string(),
            record,
        });
    }

    /// Deliver a message as a `message:created` broadcast
    pub fn deliver_broadcast(&self, message: &Message) {
        let payload =
            serde_json::to_value(MessageTranslator::to_broadcast(message)).unwrap_or(Value::Null);
        self.emit(ChannelEvent::Broadcast {
            event: EVENT_MESSAGE_CREATED.to_string(),
            payload,
        });
    }

    /// Close the channel from the server side
    pub fn close_from_server(&self) {
        self.set_state(ChannelState::Closed);
        self.emit(ChannelEvent::Status(SubscribeStatus::Closed));
    }
}

#[async_trait]
impl ChannelHandle for MemoryChannel {
    fn name(&self) -> &ChannelName {
        &self.name
    }

    fn state(&self) -> ChannelState {
        *lock(&self.state)
    }

    fn on(&self, binding: EventBinding) {
        lock(&self.bindings).push(binding);
    }

    fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    async fn subscribe(&self) -> Result<(), TransportError> {
        *lock(&self.subscribe_calls) += 1;
        let script = {
            let mut transport = lock(&self.transport);
            transport
                .scripts
                .pop_front()
                .or_else(|| transport.default_script.clone())
                .unwrap_or(SubscribeScript::Succeed)
        };

        match script {
            SubscribeScript::Succeed => {
                self.set_state(ChannelState::Joined);
                self.emit(ChannelEvent::Status(SubscribeStatus::Subscribed));
            }
            SubscribeScript::Report(status) => {
                self.set_state(match status {
                    SubscribeStatus::Closed => ChannelState::Closed,
                    _ => ChannelState::Errored,
                });
                self.emit(ChannelEvent::Status(status));
            }
            SubscribeScript::Silent => self.set_state(ChannelState::Joining),
            SubscribeScript::Fail(error) => {
                self.set_state(ChannelState::Errored);
                return Err(error);
            }
        }
        Ok(())
    }

    async fn send(&self, message: BroadcastMessage) -> Result<(), TransportError> {
        if self.state() != ChannelState::Joined {
            return Err(TransportError::NotJoined(self.name.as_str().to_string()));
        }
        let mut transport = lock(&self.transport);
        if transport.fail_sends {
            return Err(TransportError::Send("scripted send failure".to_string()));
        }
        transport.sent.push((self.name.clone(), message));
        Ok(())
    }
}

/// What a [`ScriptedProbe`] call does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeScript {
    Pass,
    Fail(ProbeError),
    /// Never answer, so the caller's timeout fires
    Hang,
}

/// [`NetworkProbe`] answering from a script, then passing
#[derive(Default)]
pub struct ScriptedProbe {
    script: Mutex<VecDeque<ProbeScript>>,
    calls: Mutex<usize>,
}

impl ScriptedProbe {
    pub fn new(script: impl IntoIterator<Item = ProbeScript>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(0),
        }
    }

    /// Probe failing `count` times as unreachable, then passing
    pub fn failing(count: usize) -> Self {
        Self::new(
            (0..count).map(|i| ProbeScript::Fail(ProbeError::Unreachable(format!("scripted failure {}", i + 1)))),
        )
    }

    pub fn calls(&self) -> usize {
        *lock(&self.calls)
    }
}

#[async_trait]
impl NetworkProbe for ScriptedProbe {
    async fn probe(&self) -> Result<(), ProbeError> {
        *lock(&self.calls) += 1;
        let next = lock(&self.script).pop_front().unwrap_or(ProbeScript::Pass);
        match next {
            ProbeScript::Pass => Ok(()),
            ProbeScript::Fail(error) => Err(error),
            ProbeScript::Hang => std::future::pending().await,
        }
    }
}

struct IdentityState {
    session: Option<String>,
    anonymous: Result<String, IdentityError>,
    refresh: Result<String, IdentityError>,
    sign_ins: Vec<AnonymousMetadata>,
    refreshes: usize,
}

/// [`IdentityProvider`] with tokens under test control
pub struct FakeIdentityProvider {
    state: Mutex<IdentityState>,
}

impl FakeIdentityProvider {
    /// No session yet; anonymous sign-in and refresh hand out `token`
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            state: Mutex::new(IdentityState {
                session: None,
                anonymous: Ok(token.clone()),
                refresh: Ok(token),
                sign_ins: Vec::new(),
                refreshes: 0,
            }),
        }
    }

    pub fn set_session(&self, token: Option<String>) {
        lock(&self.state).session = token;
    }

    pub fn set_anonymous(&self, result: Result<String, IdentityError>) {
        lock(&self.state).anonymous = result;
    }

    pub fn set_refresh(&self, result: Result<String, IdentityError>) {
        lock(&self.state).refresh = result;
    }

    pub fn sign_ins(&self) -> Vec<AnonymousMetadata> {
        lock(&self.state).sign_ins.clone()
    }

    pub fn refreshes(&self) -> usize {
        lock(&self.state).refreshes
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn get_session(&self) -> Result<Option<Session>, IdentityError> {
        Ok(lock(&self.state)
            .session
            .clone()
            .map(|access_token| Session { access_token }))
    }

    async fn sign_in_anonymously(
        &self,
        metadata: AnonymousMetadata,
    ) -> Result<Session, IdentityError> {
        let mut state = lock(&self.state);
        state.sign_ins.push(metadata);
        let token = state.anonymous.clone()?;
        state.session = Some(token.clone());
        Ok(Session {
            access_token: token,
        })
    }

    async fn refresh_session(&self) -> Result<Session, IdentityError> {
        let mut state = lock(&self.state);
        state.refreshes += 1;
        let token = state.refresh.clone()?;
        state.session = Some(token.clone());
        Ok(Session {
            access_token: token,
        })
    }
}

/// [`MessagingApi`] recording requests and confirming them as `msg-{n}`
#[derive(Default)]
pub struct RecordingMessagingApi {
    posted: Mutex<Vec<NewMessage>>,
    typing: Mutex<Vec<TypingUpdate>>,
    failure: Mutex<Option<ApiError>>,
}

/// Timestamp the recording API stamps on confirmed messages
pub const CONFIRMED_AT: &str = "2024-05-01T12:00:00.000Z";

impl RecordingMessagingApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every following `post_message` with `error`
    pub fn fail_with(&self, error: ApiError) {
        *lock(&self.failure) = Some(error);
    }

    pub fn posted(&self) -> Vec<NewMessage> {
        lock(&self.posted).clone()
    }

    pub fn typing_updates(&self) -> Vec<TypingUpdate> {
        lock(&self.typing).clone()
    }
}

#[async_trait]
impl MessagingApi for RecordingMessagingApi {
    async fn post_message(&self, message: NewMessage) -> Result<ConfirmedMessage, ApiError> {
        if let Some(error) = lock(&self.failure).clone() {
            return Err(error);
        }
        let mut posted = lock(&self.posted);
        posted.push(message.clone());
        Ok(ConfirmedMessage {
            id: format!("msg-{}", posted.len()),
            content: message.content,
            created_at: Some(CONFIRMED_AT.to_string()),
            status: Some("sent".to_string()),
        })
    }

    async fn post_typing(&self, update: TypingUpdate) -> Result<(), ApiError> {
        lock(&self.typing).push(update);
        Ok(())
    }
}
