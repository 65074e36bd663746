//! UseCase: 接続のライフサイクル管理
//!
//! 1 つの会話チャンネルへの接続を、事前のネットワーク確認からトークン取得、
//! チャンネル参加、ハートビート、切断時の再試行とフォールバックまで管理します。
//!
//! ## 状態遷移
//!
//! ```text
//! idle ─connect─▶ connecting ─probe ok─▶ authenticating ─token─▶ subscribing ─subscribed─▶ connected
//!                     │                        │                      │                       │
//!                     └────────── failure ─────┴──────────────────────┴─────── lost ──────────┘
//!                                              ▼
//!                        retrying (count < max) ─delay─▶ connecting
//!                        fallback (count >= max)
//! ```
//!
//! ## 並行性
//!
//! - 状態はすべて 1 つの同期 Mutex の中にあり、`.await` をまたいで保持しない
//! - `disconnect()` と会話の切り替えは `epoch` を進める。中断していた処理は再開後に
//!   `epoch` を確認し、古ければ何もせずに終わる
//! - 生成したタスクは `Weak` しか持たないため、所有者が破棄されたあとに
//!   タイマーが接続を復活させることはない
//! - ハンドラーの呼び出しは必ずロックを外してから行う

use std::{
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use async_trait::async_trait;
use serde::Serialize;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, timeout},
};
use tsunagi_shared::time::get_utc_timestamp;

use crate::{
    config::RealtimeConfig,
    domain::{
        BroadcastError, BroadcastMessage, ChannelEvent, ChannelHandle, ChannelName,
        ChannelOptions, ConnectionChange, ConnectionError, ConnectionState, ConversationId,
        EventBinding, Message, MessagingApi, NetworkProbe, NewMessage, OrganizationId,
        ProbeError, RealtimeEventHandler, SendError, SenderType, SubscribeStatus,
        SubscriptionError,
    },
    infrastructure::dto::{
        InboundEvent, MessageTranslator,
        websocket::{
            EVENT_HEARTBEAT, EVENT_MESSAGE_CREATED, EVENT_TYPING_START, EVENT_TYPING_STOP,
            HeartbeatPayload, MESSAGES_SCHEMA, MESSAGES_TABLE, TypingPayload,
        },
    },
};

use super::{
    auth_session::AuthSessionProvider,
    channel_registry::ChannelRegistry,
    metrics::{ConnectionMetrics, MetricsSnapshot},
    typing_indicator::TypingSink,
};

/// 接続先の組織と会話
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    organization_id: OrganizationId,
    conversation_id: ConversationId,
}

impl Target {
    fn channel_name(&self) -> ChannelName {
        ChannelName::for_conversation(&self.organization_id, &self.conversation_id)
    }
}

/// 接続試行に必要な協調オブジェクト
#[derive(Clone)]
struct Collaborators {
    registry: Arc<ChannelRegistry>,
    auth: Arc<AuthSessionProvider>,
    probe: Arc<dyn NetworkProbe>,
    config: RealtimeConfig,
}

/// ロックを外したあとにハンドラーへ届ける通知
enum Notice {
    State(ConnectionState),
    Connection(ConnectionChange),
}

struct ManagerState {
    connection: ConnectionState,
    target: Option<Target>,
    retry_count: u32,
    /// 接続試行（または予約済みのリトライ）が進行中
    is_connecting: bool,
    epoch: u64,
    channel: Option<Arc<dyn ChannelHandle>>,
    driver: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
    /// 最後に on_connection_change で報告した値
    reported_connected: Option<bool>,
    status_message: String,
    metrics: ConnectionMetrics,
}

impl ManagerState {
    fn new() -> Self {
        Self {
            connection: ConnectionState::Idle,
            target: None,
            retry_count: 0,
            is_connecting: false,
            epoch: 0,
            channel: None,
            driver: None,
            heartbeat: None,
            listener: None,
            reported_connected: None,
            status_message: status_line(ConnectionState::Idle).to_string(),
            metrics: ConnectionMetrics::new(),
        }
    }

    fn transition(&mut self, next: ConnectionState, notices: &mut Vec<Notice>) -> bool {
        if !self.connection.can_transition_to(next) {
            tracing::warn!("Rejected transition {} -> {}", self.connection, next);
            return false;
        }
        tracing::debug!("Connection state {} -> {}", self.connection, next);
        self.connection = next;
        self.status_message = status_line(next).to_string();
        notices.push(Notice::State(next));
        true
    }

    fn report_connection(&mut self, connected: bool, notices: &mut Vec<Notice>) {
        self.reported_connected = Some(connected);
        notices.push(Notice::Connection(ConnectionChange {
            connected,
            state: self.connection,
            status: self.status_message.clone(),
        }));
    }

    fn stop_tasks(&mut self) {
        for task in [
            self.driver.take(),
            self.heartbeat.take(),
            self.listener.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }

    /// 失敗を記録し、リトライするなら待ち時間を返す（しないならフォールバックに入る）
    fn schedule_retry(
        &mut self,
        error: &str,
        config: &RealtimeConfig,
        notices: &mut Vec<Notice>,
    ) -> Option<Duration> {
        let policy = config.retry;
        if !policy.should_retry(self.retry_count) {
            self.enter_fallback(error, notices);
            return None;
        }

        let delay = policy.delay_for(self.retry_count);
        self.retry_count = self.retry_count.saturating_add(1);
        self.metrics.set_retry_count(self.retry_count);
        tracing::warn!(
            "Realtime connection failed: {} (retry {}/{} in {}ms)",
            error,
            self.retry_count,
            policy.max_retries,
            delay.as_millis()
        );
        self.transition(ConnectionState::Retrying, notices);
        self.status_message = format!(
            "Reconnecting in {}s (attempt {}/{})",
            delay.as_secs(),
            self.retry_count,
            policy.max_retries
        );
        Some(delay)
    }

    fn enter_fallback(&mut self, error: &str, notices: &mut Vec<Notice>) {
        tracing::error!(
            "Realtime unavailable after {} retries, falling back: {}",
            self.retry_count,
            error
        );
        self.is_connecting = false;
        self.metrics.activate_fallback();
        self.transition(ConnectionState::Fallback, notices);
        self.status_message = "Live updates unavailable; messages are still delivered".to_string();
        if self.reported_connected != Some(false) {
            self.report_connection(false, notices);
        }
    }
}

fn status_line(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Idle => "Waiting for a conversation",
        ConnectionState::Connecting => "Connecting",
        ConnectionState::Authenticating => "Authenticating",
        ConnectionState::Subscribing => "Joining conversation",
        ConnectionState::Connected => "Connected",
        ConnectionState::Retrying => "Reconnecting",
        ConnectionState::Fallback => "Live updates unavailable",
        ConnectionState::Closed => "Disconnected",
    }
}

struct Inner {
    deps: Collaborators,
    api: Arc<dyn MessagingApi>,
    handler: Arc<dyn RealtimeEventHandler>,
    state: Mutex<ManagerState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ManagerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify(&self, notices: Vec<Notice>) {
        for notice in notices {
            match notice {
                Notice::State(state) => self.handler.on_state_change(state),
                Notice::Connection(change) => self.handler.on_connection_change(change),
            }
        }
    }

    fn dispatch(&self, event: &ChannelEvent) {
        match MessageTranslator::inbound(event) {
            Some(InboundEvent::Message(message)) => self.handler.on_message(message),
            Some(InboundEvent::Typing(typing)) => self.handler.on_typing(typing),
            Some(InboundEvent::Heartbeat) | None => {}
        }
    }

    fn on_connected(
        &self,
        weak: &Weak<Inner>,
        epoch: u64,
        handle: Arc<dyn ChannelHandle>,
        events: broadcast::Receiver<ChannelEvent>,
        elapsed: Duration,
    ) -> bool {
        let mut notices = Vec::new();
        {
            let mut state = self.state();
            if state.epoch != epoch || !state.transition(ConnectionState::Connected, &mut notices) {
                return false;
            }
            state.channel = Some(handle.clone());
            state.retry_count = 0;
            state.is_connecting = false;
            state.metrics.record_success(elapsed);
            // 自分を実行しているタスクなので手放すだけ
            state.driver = None;
            state.heartbeat = Some(tokio::spawn(heartbeat(
                handle.clone(),
                self.deps.config.heartbeat_interval(),
            )));
            state.listener = Some(tokio::spawn(listen(weak.clone(), epoch, events, handle)));
            state.report_connection(true, &mut notices);
        }
        tracing::info!("Realtime connected in {}ms", elapsed.as_millis());
        self.notify(notices);
        true
    }

    fn on_attempt_failed(&self, epoch: u64, error: &ConnectionError) -> Option<Duration> {
        let mut notices = Vec::new();
        let delay = {
            let mut state = self.state();
            if state.epoch != epoch {
                return None;
            }
            state.metrics.record_failure(error);
            state.schedule_retry(&error.to_string(), &self.deps.config, &mut notices)
        };
        self.notify(notices);
        delay
    }

    /// 接続済みのチャンネルが失われたときの処理
    ///
    /// 破棄すべきチャンネル名を返します。
    fn on_connection_lost(
        &self,
        weak: &Weak<Inner>,
        epoch: u64,
        reason: &SubscriptionError,
    ) -> Option<ChannelName> {
        let mut notices = Vec::new();
        let name = {
            let mut state = self.state();
            if state.epoch != epoch || state.connection != ConnectionState::Connected {
                return None;
            }
            if let Some(heartbeat) = state.heartbeat.take() {
                heartbeat.abort();
            }
            // 自分を実行しているタスクなので手放すだけ
            state.listener = None;
            state.channel = None;
            state.is_connecting = true;
            state.metrics.note_error(reason);

            if let Some(delay) = state.schedule_retry(&reason.to_string(), &self.deps.config, &mut notices) {
                state.report_connection(false, &mut notices);
                state.driver = Some(tokio::spawn(drive(weak.clone(), epoch, Some(delay))));
            }
            state.target.as_ref().map(Target::channel_name)
        };
        self.notify(notices);
        name
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.stop_tasks();

        let (Some(handle), Some(target)) = (state.channel.take(), state.target.as_ref()) else {
            return;
        };
        let name = target.channel_name();
        let registry = self.deps.registry.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                registry.release(&name, &handle).await;
            });
        }
    }
}

/// 所有者が生きていて、`epoch` が変わっていなければ強参照を返す
fn live(weak: &Weak<Inner>, epoch: u64) -> Option<Arc<Inner>> {
    let inner = weak.upgrade()?;
    let current = inner.state().epoch;
    (current == epoch).then_some(inner)
}

/// `epoch` が変わっていなければ状態を進める
fn advance(weak: &Weak<Inner>, epoch: u64, next: ConnectionState) -> bool {
    let Some(inner) = weak.upgrade() else {
        return false;
    };
    let mut notices = Vec::new();
    {
        let mut state = inner.state();
        if state.epoch != epoch || !state.transition(next, &mut notices) {
            return false;
        }
    }
    inner.notify(notices);
    true
}

fn status_result(status: SubscribeStatus) -> Result<(), SubscriptionError> {
    match status {
        SubscribeStatus::Subscribed => Ok(()),
        SubscribeStatus::TimedOut => Err(SubscriptionError::TimedOut),
        SubscribeStatus::Closed => Err(SubscriptionError::Closed),
        SubscribeStatus::ChannelError(reason) => Err(SubscriptionError::ChannelError(reason)),
    }
}

async fn wait_for_subscribed(
    events: &mut broadcast::Receiver<ChannelEvent>,
) -> Result<(), SubscriptionError> {
    loop {
        match events.recv().await {
            Ok(ChannelEvent::Status(status)) => return status_result(status),
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return Err(SubscriptionError::Closed),
        }
    }
}

fn bind_conversation_events(handle: &Arc<dyn ChannelHandle>, conversation_id: &ConversationId) {
    for event in [EVENT_MESSAGE_CREATED, EVENT_TYPING_START, EVENT_TYPING_STOP] {
        handle.on(EventBinding::Broadcast {
            event: event.to_string(),
        });
    }
    handle.on(EventBinding::DatabaseChange {
        event: "INSERT".to_string(),
        schema: MESSAGES_SCHEMA.to_string(),
        table: MESSAGES_TABLE.to_string(),
        filter: Some(format!("conversation_id=eq.{}", conversation_id)),
    });
}

enum AttemptOutcome {
    Connected,
    Cancelled,
}

/// 1 回分の接続試行
async fn attempt(
    weak: &Weak<Inner>,
    epoch: u64,
    deps: &Collaborators,
    target: &Target,
) -> Result<AttemptOutcome, ConnectionError> {
    let started = Instant::now();

    match timeout(deps.config.probe_timeout(), deps.probe.probe()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(ProbeError::TimedOut(deps.config.probe_timeout_ms).into()),
    }
    if !advance(weak, epoch, ConnectionState::Authenticating) {
        return Ok(AttemptOutcome::Cancelled);
    }

    let token = deps.auth.ensure_valid_token(&target.organization_id).await?;
    if live(weak, epoch).is_none() {
        return Ok(AttemptOutcome::Cancelled);
    }
    let transport = deps.registry.transport().clone();
    transport.set_auth(&token.value).await;
    if !advance(weak, epoch, ConnectionState::Subscribing) {
        return Ok(AttemptOutcome::Cancelled);
    }

    let name = target.channel_name();
    let acquired = deps
        .registry
        .acquire_or_create(&name, || transport.channel(&name, ChannelOptions::default()))
        .await;
    let handle = acquired.handle;
    let mut events = handle.events();

    if acquired.reused {
        tracing::debug!("Reusing registered channel '{}'", name);
    } else {
        bind_conversation_events(&handle, &target.conversation_id);
        if let Err(e) = handle.subscribe().await {
            deps.registry.release(&name, &handle).await;
            return Err(SubscriptionError::from(e).into());
        }
    }

    if !handle.is_joined() {
        let joined = timeout(deps.config.subscribe_timeout(), wait_for_subscribed(&mut events))
            .await
            .unwrap_or(Err(SubscriptionError::TimedOut));
        if let Err(e) = joined {
            deps.registry.release(&name, &handle).await;
            return Err(e.into());
        }
    }

    let connected = live(weak, epoch)
        .is_some_and(|inner| inner.on_connected(weak, epoch, handle.clone(), events, started.elapsed()));
    if connected {
        Ok(AttemptOutcome::Connected)
    } else {
        if !acquired.reused {
            deps.registry.release(&name, &handle).await;
        }
        Ok(AttemptOutcome::Cancelled)
    }
}

/// 接続試行とリトライを繰り返すタスク
async fn drive(weak: Weak<Inner>, epoch: u64, mut delay: Option<Duration>) {
    loop {
        if let Some(delay) = delay.take() {
            tokio::time::sleep(delay).await;
            if !advance(&weak, epoch, ConnectionState::Connecting) {
                return;
            }
        }

        let (deps, target) = {
            let Some(inner) = live(&weak, epoch) else {
                return;
            };
            let mut state = inner.state();
            let Some(target) = state.target.clone() else {
                return;
            };
            state.metrics.record_attempt();
            (inner.deps.clone(), target)
        };

        match attempt(&weak, epoch, &deps, &target).await {
            Ok(AttemptOutcome::Connected | AttemptOutcome::Cancelled) => return,
            Err(error) => {
                let Some(inner) = live(&weak, epoch) else {
                    return;
                };
                match inner.on_attempt_failed(epoch, &error) {
                    Some(next) => delay = Some(next),
                    None => return,
                }
            }
        }
    }
}

/// 接続中のチャンネルイベントをハンドラーへ流すタスク
async fn listen(
    weak: Weak<Inner>,
    epoch: u64,
    mut events: broadcast::Receiver<ChannelEvent>,
    handle: Arc<dyn ChannelHandle>,
) {
    let reason = loop {
        match events.recv().await {
            Ok(ChannelEvent::Status(status)) => match status_result(status) {
                Ok(()) => continue,
                Err(reason) => break reason,
            },
            Ok(event) => {
                let Some(inner) = live(&weak, epoch) else {
                    return;
                };
                inner.dispatch(&event);
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Channel listener lagged, {} events dropped", skipped);
            }
            Err(RecvError::Closed) => break SubscriptionError::Closed,
        }
    };

    let Some(inner) = live(&weak, epoch) else {
        return;
    };
    let registry = inner.deps.registry.clone();
    let name = inner.on_connection_lost(&weak, epoch, &reason);
    drop(inner);
    if let Some(name) = name {
        registry.release(&name, &handle).await;
    }
}

async fn heartbeat(handle: Arc<dyn ChannelHandle>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !handle.is_joined() {
            continue;
        }
        let payload = HeartbeatPayload {
            timestamp: get_utc_timestamp(),
        };
        if let Err(e) = broadcast_on(&handle, EVENT_HEARTBEAT, &payload).await {
            tracing::warn!("Heartbeat not sent: {}", e);
        }
    }
}

async fn broadcast_on<T: Serialize>(
    handle: &Arc<dyn ChannelHandle>,
    event: &str,
    payload: &T,
) -> Result<(), BroadcastError> {
    let payload = serde_json::to_value(payload).map_err(|e| BroadcastError::Encode(e.to_string()))?;
    handle
        .send(BroadcastMessage::new(event, payload))
        .await
        .map_err(|source| BroadcastError::Transport {
            event: event.to_string(),
            source,
        })
}

/// 1 つの会話チャンネルへの接続を管理する
///
/// クローンは同じ接続を共有します。最後のクローンが破棄されると
/// タイマーとタスクはすべて止まります。
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// 新しい ConnectionManager を作成
    ///
    /// # Arguments
    ///
    /// * `registry` - プロセス全体で共有するチャンネルレジストリ
    /// * `auth` - トークンの供給元
    /// * `probe` - 接続前のネットワーク確認
    /// * `api` - メッセージを永続化する HTTP API
    /// * `handler` - 受信イベントの通知先
    /// * `config` - タイムアウトとリトライの設定
    pub fn new(
        registry: Arc<ChannelRegistry>,
        auth: Arc<AuthSessionProvider>,
        probe: Arc<dyn NetworkProbe>,
        api: Arc<dyn MessagingApi>,
        handler: Arc<dyn RealtimeEventHandler>,
        config: RealtimeConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                deps: Collaborators {
                    registry,
                    auth,
                    probe,
                    config,
                },
                api,
                handler,
                state: Mutex::new(ManagerState::new()),
            }),
        }
    }

    /// 会話への接続を開始する
    ///
    /// 接続試行はバックグラウンドで進み、結果はハンドラーに通知されます。
    /// 会話 ID がない場合、または試行がすでに進行中の場合は何もしません。
    /// 別の会話に接続済みなら、先に現在のチャンネルを破棄します。
    pub async fn connect(
        &self,
        organization_id: OrganizationId,
        conversation_id: Option<ConversationId>,
    ) {
        let Some(conversation_id) = conversation_id else {
            tracing::debug!("No conversation yet, connect() deferred");
            return;
        };
        let target = Target {
            organization_id,
            conversation_id,
        };

        let mut notices = Vec::new();
        let (epoch, previous) = {
            let mut state = self.inner.state();
            if state.is_connecting {
                tracing::debug!("Connection attempt already in flight, ignoring connect()");
                return;
            }
            let same_target = state.target.as_ref() == Some(&target);
            match state.connection {
                ConnectionState::Connected if same_target => {
                    tracing::debug!("Already connected to '{}'", target.channel_name());
                    return;
                }
                ConnectionState::Fallback if same_target => {
                    tracing::debug!("Conversation '{}' is in fallback", target.channel_name());
                    return;
                }
                _ => {}
            }
            if !state.connection.can_transition_to(ConnectionState::Connecting) {
                tracing::warn!("connect() not allowed from {}", state.connection);
                return;
            }

            state.epoch = state.epoch.wrapping_add(1);
            state.stop_tasks();
            let was_connected = state.connection == ConnectionState::Connected;
            let previous = state
                .channel
                .take()
                .and(state.target.as_ref().map(Target::channel_name));

            state.transition(ConnectionState::Connecting, &mut notices);
            if was_connected {
                state.report_connection(false, &mut notices);
            }
            state.target = Some(target);
            state.retry_count = 0;
            state.metrics.set_retry_count(0);
            state.is_connecting = true;
            (state.epoch, previous)
        };
        self.inner.notify(notices);

        if let Some(name) = previous {
            tracing::info!("Leaving '{}' before switching conversation", name);
            self.inner.deps.registry.evict(&name).await;
        }

        let mut state = self.inner.state();
        if state.epoch == epoch {
            state.driver = Some(tokio::spawn(drive(Arc::downgrade(&self.inner), epoch, None)));
        }
    }

    /// 接続を閉じる
    ///
    /// 予約済みのリトライも取り消され、以後は再接続しません。
    pub async fn disconnect(&self) {
        let mut notices = Vec::new();
        let name = {
            let mut state = self.inner.state();
            state.epoch = state.epoch.wrapping_add(1);
            state.stop_tasks();
            let was_connected = state.connection == ConnectionState::Connected;
            let owned_channel = state.channel.take().is_some() || state.is_connecting;
            state.is_connecting = false;
            state.retry_count = 0;
            if state.connection != ConnectionState::Closed {
                state.transition(ConnectionState::Closed, &mut notices);
            }
            if was_connected {
                state.report_connection(false, &mut notices);
            }
            if owned_channel {
                state.target.as_ref().map(Target::channel_name)
            } else {
                None
            }
        };
        self.inner.notify(notices);

        if let Some(name) = name {
            self.inner.deps.registry.evict(&name).await;
            tracing::info!("Disconnected from '{}'", name);
        }
    }

    /// メッセージを HTTP API で送信し、接続中ならブロードキャストもする
    ///
    /// # Returns
    ///
    /// * `Ok(Message)` - サーバーが確定したメッセージ（ブロードキャストの失敗は含まない）
    /// * `Err(SendError)` - 会話が未選択、または HTTP での送信に失敗
    pub async fn send_message(
        &self,
        content: impl Into<String>,
        sender_type: SenderType,
    ) -> Result<Message, SendError> {
        let conversation_id = self.conversation_id().ok_or(SendError::NoConversation)?;
        let sender_name = self.inner.deps.config.sender_name.clone();

        let confirmed = self
            .inner
            .api
            .post_message(NewMessage {
                conversation_id: conversation_id.clone(),
                content: content.into(),
                sender_type,
                sender_name: sender_name.clone(),
            })
            .await?;
        let message =
            MessageTranslator::from_confirmed(confirmed, conversation_id, sender_type, sender_name);

        match self.connected_channel() {
            Some(channel) => {
                let payload = MessageTranslator::to_broadcast(&message);
                if let Err(e) = broadcast_on(&channel, EVENT_MESSAGE_CREATED, &payload).await {
                    tracing::warn!("Message {} stored but not broadcast: {}", message.id, e);
                }
            }
            None => tracing::debug!("Not connected, skipping broadcast of {}", message.id),
        }
        Ok(message)
    }

    /// タイピング状態をブロードキャストする（未接続なら破棄）
    pub async fn send_typing(&self, is_typing: bool) {
        let (Some(channel), Some(conversation_id)) = (self.connected_channel(), self.conversation_id())
        else {
            tracing::trace!("Not connected, dropping typing update");
            return;
        };

        let payload = TypingPayload {
            conversation_id: Some(conversation_id.into_string()),
            user_id: self.inner.deps.auth.visitor_id().to_string(),
            sender_type: Some(SenderType::Visitor.as_str().to_string()),
            is_typing: Some(is_typing),
        };
        let event = if is_typing {
            EVENT_TYPING_START
        } else {
            EVENT_TYPING_STOP
        };
        if let Err(e) = broadcast_on(&channel, event, &payload).await {
            tracing::debug!("Typing update not sent: {}", e);
        }
    }

    fn connected_channel(&self) -> Option<Arc<dyn ChannelHandle>> {
        let state = self.inner.state();
        if state.connection != ConnectionState::Connected {
            return None;
        }
        state.channel.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state().connection
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.inner
            .state()
            .target
            .as_ref()
            .map(|target| target.conversation_id.clone())
    }

    pub fn status_message(&self) -> String {
        self.inner.state().status_message.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.state().metrics.snapshot()
    }

    pub fn visitor_id(&self) -> &str {
        self.inner.deps.auth.visitor_id()
    }
}

#[async_trait]
impl TypingSink for ConnectionManager {
    fn is_connected(&self) -> bool {
        ConnectionManager::is_connected(self)
    }

    async fn send_typing(&self, is_typing: bool) {
        ConnectionManager::send_typing(self, is_typing).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{
            ApiError, ChannelEventHandler, ChannelState, ConfirmedMessage, MessageStatus,
            RealtimeEvent, TransportError, messaging::MockMessagingApi, probe::MockNetworkProbe,
        },
        testing::{
            FakeIdentityProvider, MemoryTransport, ProbeScript, RecordingMessagingApi,
            ScriptedProbe, SubscribeScript, token_expiring_at,
        },
    };
    use tokio::sync::mpsc::UnboundedReceiver;
    use tsunagi_shared::time::FixedClock;

    const NOW: i64 = 1_700_000_000;

    struct Fixture {
        transport: MemoryTransport,
        registry: Arc<ChannelRegistry>,
        probe: Arc<ScriptedProbe>,
        api: Arc<RecordingMessagingApi>,
        auth: Arc<AuthSessionProvider>,
    }

    fn fixture(probe: ScriptedProbe) -> Fixture {
        let transport = MemoryTransport::new();
        let registry = Arc::new(ChannelRegistry::new(Arc::new(transport.clone())));
        let identity = Arc::new(FakeIdentityProvider::new(token_expiring_at(NOW + 3600)));
        let auth = Arc::new(AuthSessionProvider::new(
            identity,
            Arc::new(FixedClock::at_epoch_seconds(NOW)),
        ));
        Fixture {
            transport,
            registry,
            probe: Arc::new(probe),
            api: Arc::new(RecordingMessagingApi::new()),
            auth,
        }
    }

    fn create_manager(f: &Fixture) -> (ConnectionManager, UnboundedReceiver<RealtimeEvent>) {
        let (handler, rx) = ChannelEventHandler::new();
        let manager = ConnectionManager::new(
            f.registry.clone(),
            f.auth.clone(),
            f.probe.clone(),
            f.api.clone(),
            Arc::new(handler),
            RealtimeConfig::default(),
        );
        (manager, rx)
    }

    fn org() -> OrganizationId {
        OrganizationId::new("O1").unwrap()
    }

    fn conv(id: &str) -> Option<ConversationId> {
        Some(ConversationId::new(id).unwrap())
    }

    /// 指定した状態に到達するまでのイベントと、同時に通知されたイベントを集める
    async fn events_until(
        rx: &mut UnboundedReceiver<RealtimeEvent>,
        last: ConnectionState,
    ) -> Vec<RealtimeEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let done = event == RealtimeEvent::StateChanged(last);
            events.push(event);
            if done {
                break;
            }
        }
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn connection_changes(events: &[RealtimeEvent]) -> Vec<bool> {
        events
            .iter()
            .filter_map(|event| match event {
                RealtimeEvent::ConnectionChanged(change) => Some(change.connected),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_probe_failures_then_connected() {
        // テスト項目: プローブが 3 回失敗した後で接続でき、待ち時間が 1000, 2000, 4000ms になる
        // given (前提条件):
        let f = fixture(ScriptedProbe::failing(3));
        let (manager, mut rx) = create_manager(&f);

        // when (操作):
        manager.connect(org(), conv("C1")).await;
        let mut states = Vec::new();
        while let Some(event) = rx.recv().await {
            if let RealtimeEvent::StateChanged(state) = event {
                states.push((state, Instant::now()));
                if state == ConnectionState::Connected {
                    break;
                }
            }
        }

        // then (期待する結果):
        use ConnectionState::*;
        let names: Vec<ConnectionState> = states.iter().map(|(state, _)| *state).collect();
        assert_eq!(
            names,
            vec![
                Connecting, Retrying, Connecting, Retrying, Connecting, Retrying, Connecting,
                Authenticating, Subscribing, Connected
            ]
        );
        let delays: Vec<Duration> = states
            .windows(2)
            .filter(|pair| pair[0].0 == Retrying)
            .map(|pair| pair[1].1 - pair[0].1)
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000)
            ]
        );
        assert!(manager.is_connected());
        let metrics = manager.metrics();
        assert_eq!(metrics.connection_attempts, 4);
        assert_eq!(metrics.failed_connections, 3);
        assert_eq!(metrics.successful_connections, 1);
        assert_eq!(metrics.retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_without_conversation_is_noop() {
        // テスト項目: 会話 ID なしの connect() は何もしない
        // given (前提条件):
        let f = fixture(ScriptedProbe::default());
        let (manager, mut rx) = create_manager(&f);

        // when (操作):
        manager.connect(org(), None).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        // then (期待する結果):
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(f.probe.calls(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_connect_while_retrying_is_noop() {
        // テスト項目: リトライ待ちの間の connect() は新しい試行を始めない
        // given (前提条件):
        let f = fixture(ScriptedProbe::failing(1));
        let (manager, mut rx) = create_manager(&f);
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Retrying).await;

        // when (操作):
        manager.connect(org(), conv("C2")).await;

        // then (期待する結果):
        assert_eq!(manager.state(), ConnectionState::Retrying);
        assert_eq!(manager.conversation_id(), conv("C1"));
        events_until(&mut rx, ConnectionState::Connected).await;
        assert_eq!(f.probe.calls(), 2);
        assert_eq!(f.transport.channels_created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_subscription_errors_enter_fallback_once() {
        // テスト項目: 参加エラーが続くとフォールバックに入り、切断通知は 1 回だけ
        // given (前提条件):
        let f = fixture(ScriptedProbe::default());
        f.transport
            .set_default_subscribe(SubscribeScript::Report(SubscribeStatus::ChannelError(
                "denied".to_string(),
            )));
        let (manager, mut rx) = create_manager(&f);

        // when (操作):
        manager.connect(org(), conv("C1")).await;
        let events = events_until(&mut rx, ConnectionState::Fallback).await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        let mut later = Vec::new();
        while let Ok(event) = rx.try_recv() {
            later.push(event);
        }

        // then (期待する結果):
        assert_eq!(manager.state(), ConnectionState::Fallback);
        let mut all = events.clone();
        all.extend(later);
        assert_eq!(connection_changes(&all), vec![false]);
        let retries = events
            .iter()
            .filter(|event| **event == RealtimeEvent::StateChanged(ConnectionState::Retrying))
            .count();
        assert_eq!(retries, 5);
        let metrics = manager.metrics();
        assert!(metrics.fallback_activated);
        assert_eq!(metrics.connection_attempts, 6);
        assert_eq!(metrics.failed_connections, 6);
        assert_eq!(f.transport.joined_channels(), 0);
        assert!(f.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_reconnects_for_fresh_conversation() {
        // テスト項目: フォールバック中でも新しい会話 ID なら接続し直せる
        // given (前提条件):
        let f = fixture(ScriptedProbe::new(
            (0..6).map(|_| ProbeScript::Fail(ProbeError::Unreachable("offline".to_string()))),
        ));
        let (manager, mut rx) = create_manager(&f);
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Fallback).await;

        // when (操作):
        manager.connect(org(), conv("C1")).await;
        let calls_after_same_id = f.probe.calls();
        manager.connect(org(), conv("C2")).await;
        let events = events_until(&mut rx, ConnectionState::Connected).await;

        // then (期待する結果):
        assert_eq!(calls_after_same_id, 6);
        assert_eq!(manager.conversation_id(), conv("C2"));
        assert_eq!(connection_changes(&events), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_retry() {
        // テスト項目: リトライ待ち中に disconnect() すると、タイマーが来ても再接続しない
        // given (前提条件):
        let f = fixture(ScriptedProbe::failing(1));
        let (manager, mut rx) = create_manager(&f);
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Retrying).await;

        // when (操作):
        manager.disconnect().await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        // then (期待する結果):
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(f.probe.calls(), 1);
        assert_eq!(f.transport.channels_created(), 0);
        let mut after = Vec::new();
        while let Ok(event) = rx.try_recv() {
            after.push(event);
        }
        assert_eq!(after, vec![RealtimeEvent::StateChanged(ConnectionState::Closed)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_manager_cancels_pending_retry() {
        // テスト項目: 所有者が破棄されたあとにリトライが発火しない
        // given (前提条件):
        let f = fixture(ScriptedProbe::failing(1));
        let (manager, mut rx) = create_manager(&f);
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Retrying).await;

        // when (操作):
        drop(manager);
        tokio::time::sleep(Duration::from_secs(30)).await;

        // then (期待する結果):
        assert_eq!(f.probe.calls(), 1);
        assert_eq!(f.transport.channels_created(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_counts_as_failure() {
        // テスト項目: 応答のないプローブは 5 秒でタイムアウトし、リトライになる
        // given (前提条件):
        let f = fixture(ScriptedProbe::new([ProbeScript::Hang]));
        let (manager, mut rx) = create_manager(&f);
        let started = Instant::now();

        // when (操作):
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Retrying).await;

        // then (期待する結果):
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(
            manager.metrics().last_error.as_deref(),
            Some("Network probe timed out after 5000ms")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_subscribe_times_out_and_releases_channel() {
        // テスト項目: ステータスが届かない参加は 15 秒でタイムアウトし、チャンネルは破棄される
        // given (前提条件):
        let f = fixture(ScriptedProbe::default());
        f.transport.script_subscribe([SubscribeScript::Silent]);
        let (manager, mut rx) = create_manager(&f);
        let started = Instant::now();

        // when (操作):
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Retrying).await;

        // then (期待する結果):
        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert_eq!(f.transport.removed().len(), 1);
        assert!(f.registry.is_empty());
        events_until(&mut rx, ConnectionState::Connected).await;
        assert_eq!(f.transport.channels_created(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_transport_error_is_retried() {
        // テスト項目: subscribe 自体のエラーもリトライされる
        // given (前提条件):
        let f = fixture(ScriptedProbe::default());
        f.transport.script_subscribe([SubscribeScript::Fail(TransportError::Connect(
            "refused".to_string(),
        ))]);
        let (manager, mut rx) = create_manager(&f);

        // when (操作):
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Connected).await;

        // then (期待する結果):
        assert_eq!(manager.metrics().failed_connections, 1);
        assert_eq!(f.transport.joined_channels(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_channel_has_conversation_bindings_and_token() {
        // テスト項目: 参加前にトークンが設定され、会話用のイベントが購読される
        // given (前提条件):
        let f = fixture(ScriptedProbe::default());
        let (manager, mut rx) = create_manager(&f);

        // when (操作):
        manager.connect(org(), conv("C1")).await;
        let events = events_until(&mut rx, ConnectionState::Connected).await;

        // then (期待する結果):
        assert_eq!(f.transport.auth_tokens(), vec![token_expiring_at(NOW + 3600)]);
        let channel = f.transport.last_channel().unwrap();
        assert_eq!(channel.name().as_str(), "org:O1:conv:C1");
        assert!(channel.bindings().contains(&EventBinding::DatabaseChange {
            event: "INSERT".to_string(),
            schema: "public".to_string(),
            table: "messages".to_string(),
            filter: Some("conversation_id=eq.C1".to_string()),
        }));
        assert!(channel.bindings().contains(&EventBinding::Broadcast {
            event: EVENT_MESSAGE_CREATED.to_string()
        }));
        assert_eq!(connection_changes(&events), vec![true]);
        assert_eq!(manager.status_message(), "Connected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_events_reach_handler() {
        // テスト項目: データベース変更とブロードキャストのメッセージ、タイピングがハンドラーに届く
        // given (前提条件):
        let f = fixture(ScriptedProbe::default());
        let (manager, mut rx) = create_manager(&f);
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Connected).await;
        let channel = f.transport.last_channel().unwrap();
        let mut message = Message::optimistic(
            ConversationId::new("C1").unwrap(),
            "hello",
            SenderType::Agent,
            "Ann",
            chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
        );
        message.id = crate::domain::MessageId::new("m1");
        message.set_status(MessageStatus::Sent);

        // when (操作):
        channel.deliver_row(&message);
        channel.deliver_broadcast(&message);
        channel.emit(ChannelEvent::Broadcast {
            event: EVENT_TYPING_START.to_string(),
            payload: serde_json::json!({"userId": "agent-1", "senderType": "agent"}),
        });

        // then (期待する結果): 重複は除去されずに 2 回届く
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let third = rx.recv().await.unwrap();
        assert_eq!(first, RealtimeEvent::Message(message.clone()));
        assert_eq!(second, RealtimeEvent::Message(message));
        match third {
            RealtimeEvent::Typing(typing) => {
                assert_eq!(typing.user_id, "agent-1");
                assert!(typing.is_typing);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_connection_retries_and_reconnects() {
        // テスト項目: 接続中にチャンネルが閉じられると再接続し、false → true の順で通知される
        // given (前提条件):
        let f = fixture(ScriptedProbe::default());
        let (manager, mut rx) = create_manager(&f);
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Connected).await;

        // when (操作):
        f.transport.last_channel().unwrap().close_from_server();
        let events = events_until(&mut rx, ConnectionState::Connected).await;

        // then (期待する結果):
        assert_eq!(connection_changes(&events), vec![false, true]);
        assert_eq!(events[0], RealtimeEvent::StateChanged(ConnectionState::Retrying));
        assert_eq!(f.transport.channels_created(), 2);
        assert_eq!(f.transport.joined_channels(), 1);
        assert_eq!(f.registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_error_while_connected_retries() {
        // テスト項目: 接続中にチャンネルエラーが通知されるとリトライし、false は 1 回だけ通知される
        // given (前提条件):
        let f = fixture(ScriptedProbe::default());
        let (manager, mut rx) = create_manager(&f);
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Connected).await;
        let first = f.transport.last_channel().unwrap();

        // when (操作):
        first.emit(ChannelEvent::Status(SubscribeStatus::ChannelError(
            "server restarted".to_string(),
        )));
        let events = events_until(&mut rx, ConnectionState::Connected).await;

        // then (期待する結果):
        assert_eq!(events[0], RealtimeEvent::StateChanged(ConnectionState::Retrying));
        assert_eq!(connection_changes(&events), vec![false, true]);
        assert_eq!(first.state(), ChannelState::Closed);
        assert_eq!(f.transport.channels_created(), 2);
        assert!(manager.metrics().last_error.is_some());
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_conversation_tears_down_previous_channel() {
        // テスト項目: 接続中に別の会話へ connect() すると古いチャンネルを破棄してから接続する
        // given (前提条件):
        let f = fixture(ScriptedProbe::default());
        let (manager, mut rx) = create_manager(&f);
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Connected).await;

        // when (操作):
        manager.connect(org(), conv("C2")).await;
        let events = events_until(&mut rx, ConnectionState::Connected).await;

        // then (期待する結果):
        assert_eq!(events[0], RealtimeEvent::StateChanged(ConnectionState::Connecting));
        assert_eq!(connection_changes(&events), vec![false, true]);
        assert_eq!(f.transport.removed()[0].as_str(), "org:O1:conv:C1");
        assert_eq!(f.transport.joined_channels(), 1);
        assert_eq!(manager.conversation_id(), conv("C2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_disconnect() {
        // テスト項目: disconnect() の後でも connect() で接続し直せる
        // given (前提条件):
        let f = fixture(ScriptedProbe::default());
        let (manager, mut rx) = create_manager(&f);
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Connected).await;
        manager.disconnect().await;
        events_until(&mut rx, ConnectionState::Closed).await;

        // when (操作):
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Connected).await;

        // then (期待する結果):
        assert!(manager.is_connected());
        assert_eq!(f.transport.joined_channels(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_when_connected_reports_false() {
        // テスト項目: 接続中の disconnect() はチャンネルを破棄し、切断を通知する
        // given (前提条件):
        let f = fixture(ScriptedProbe::default());
        let (manager, mut rx) = create_manager(&f);
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Connected).await;

        // when (操作):
        manager.disconnect().await;
        let events = events_until(&mut rx, ConnectionState::Closed).await;

        // then (期待する結果):
        assert_eq!(events[0], RealtimeEvent::StateChanged(ConnectionState::Closed));
        assert_eq!(connection_changes(&events), vec![false]);
        assert_eq!(manager.status_message(), "Disconnected");
        assert!(f.registry.is_empty());
        assert_eq!(f.transport.joined_channels(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_message_succeeds_when_broadcast_fails() {
        // テスト項目: HTTP 送信が成功すれば、ブロードキャストが失敗しても確定メッセージが返る
        // given (前提条件):
        let f = fixture(ScriptedProbe::default());
        let (manager, mut rx) = create_manager(&f);
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Connected).await;
        f.transport.fail_sends(true);

        // when (操作):
        let result = manager.send_message("hi", SenderType::Visitor).await;

        // then (期待する結果):
        let message = result.unwrap();
        assert_eq!(message.id.as_str(), "msg-1");
        assert_eq!(message.content, "hi");
        assert_eq!(message.sender_type, SenderType::Visitor);
        assert_eq!(message.status, MessageStatus::Sent);
        assert_eq!(f.api.posted().len(), 1);
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_message_broadcasts_when_connected() {
        // テスト項目: 接続中は確定メッセージが message:created としてブロードキャストされる
        // given (前提条件):
        let f = fixture(ScriptedProbe::default());
        let (manager, mut rx) = create_manager(&f);
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Connected).await;

        // when (操作):
        let message = manager.send_message("hi", SenderType::Visitor).await.unwrap();

        // then (期待する結果):
        let sent = f.transport.sent_events(EVENT_MESSAGE_CREATED);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload["id"], message.id.as_str());
        assert_eq!(sent[0].payload["conversationId"], "C1");
        assert_eq!(sent[0].payload["senderName"], "Visitor");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_message_in_fallback_uses_http_only() {
        // テスト項目: フォールバック中でも HTTP での送信はできる
        // given (前提条件):
        let f = fixture(ScriptedProbe::new(
            (0..6).map(|_| ProbeScript::Fail(ProbeError::Unreachable("offline".to_string()))),
        ));
        let (manager, mut rx) = create_manager(&f);
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Fallback).await;

        // when (操作):
        let result = manager.send_message("still here", SenderType::Visitor).await;

        // then (期待する結果):
        assert!(result.is_ok());
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_send_message_without_conversation_fails() {
        // テスト項目: 会話が選択されていなければ NoConversation になる
        // given (前提条件):
        let f = fixture(ScriptedProbe::default());
        let (manager, _rx) = create_manager(&f);

        // when (操作):
        let result = manager.send_message("hi", SenderType::Visitor).await;

        // then (期待する結果):
        assert_eq!(result, Err(SendError::NoConversation));
        assert!(f.api.posted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_message_http_failure_is_returned() {
        // テスト項目: HTTP 送信の失敗は呼び出し側に返され、ブロードキャストはされない
        // given (前提条件):
        let f = fixture(ScriptedProbe::default());
        let (manager, mut rx) = create_manager(&f);
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Connected).await;
        let error = ApiError::Status {
            status: 500,
            body: "boom".to_string(),
        };
        f.api.fail_with(error.clone());

        // when (操作):
        let result = manager.send_message("hi", SenderType::Visitor).await;

        // then (期待する結果):
        assert_eq!(result, Err(SendError::Delivery(error)));
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_message_uses_configured_sender_name() {
        // テスト項目: 設定の送信者名と現在の会話 ID で HTTP API が 1 回だけ呼ばれる
        // given (前提条件):
        let f = fixture(ScriptedProbe::default());
        let mut probe = MockNetworkProbe::new();
        probe.expect_probe().times(1).returning(|| Ok(()));
        let mut api = MockMessagingApi::new();
        api.expect_post_message()
            .withf(|message| {
                message.conversation_id.as_str() == "C1"
                    && message.sender_name == "Aki"
                    && message.sender_type == SenderType::Visitor
            })
            .times(1)
            .returning(|message| {
                Ok(ConfirmedMessage {
                    id: "m-1".to_string(),
                    content: message.content,
                    created_at: None,
                    status: Some("sent".to_string()),
                })
            });
        let (handler, mut rx) = ChannelEventHandler::new();
        let config = RealtimeConfig {
            sender_name: "Aki".to_string(),
            ..RealtimeConfig::default()
        };
        let manager = ConnectionManager::new(
            f.registry.clone(),
            f.auth.clone(),
            Arc::new(probe),
            Arc::new(api),
            Arc::new(handler),
            config,
        );
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Connected).await;

        // when (操作):
        let message = manager
            .send_message("hello", SenderType::Visitor)
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(message.id.as_str(), "m-1");
        assert_eq!(message.content, "hello");
        assert_eq!(message.sender_name, "Aki");
        assert_eq!(message.status, MessageStatus::Sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_typing_payload_and_disconnected_drop() {
        // テスト項目: 接続中のタイピング通知は訪問者として送られ、未接続なら破棄される
        // given (前提条件):
        let f = fixture(ScriptedProbe::default());
        let (manager, mut rx) = create_manager(&f);
        manager.send_typing(true).await;
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Connected).await;

        // when (操作):
        manager.send_typing(true).await;
        manager.send_typing(false).await;

        // then (期待する結果):
        let starts = f.transport.sent_events(EVENT_TYPING_START);
        let stops = f.transport.sent_events(EVENT_TYPING_STOP);
        assert_eq!(starts.len(), 1);
        assert_eq!(stops.len(), 1);
        assert_eq!(starts[0].payload["userId"], manager.visitor_id());
        assert_eq!(starts[0].payload["senderType"], "visitor");
        assert_eq!(starts[0].payload["conversationId"], "C1");
        assert_eq!(stops[0].payload["isTyping"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_every_25_seconds_while_connected() {
        // テスト項目: 接続中は 25 秒ごとにハートビートが送られ、切断後は止まる
        // given (前提条件):
        let f = fixture(ScriptedProbe::default());
        let (manager, mut rx) = create_manager(&f);
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Connected).await;

        // when (操作):
        tokio::time::sleep(Duration::from_millis(50_100)).await;
        let while_connected = f.transport.sent_events(EVENT_HEARTBEAT).len();
        manager.disconnect().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        // then (期待する結果):
        assert_eq!(while_connected, 2);
        assert_eq!(f.transport.sent_events(EVENT_HEARTBEAT).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_failure_does_not_drop_connection() {
        // テスト項目: ハートビートの送信失敗は接続断として扱われない
        // given (前提条件):
        let f = fixture(ScriptedProbe::default());
        let (manager, mut rx) = create_manager(&f);
        manager.connect(org(), conv("C1")).await;
        events_until(&mut rx, ConnectionState::Connected).await;
        f.transport.fail_sends(true);

        // when (操作):
        tokio::time::sleep(Duration::from_secs(60)).await;

        // then (期待する結果):
        assert!(manager.is_connected());
        assert!(rx.try_recv().is_err());
    }
}
