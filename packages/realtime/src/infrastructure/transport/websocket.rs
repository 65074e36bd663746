//! WebSocket を使った RealtimeTransport 実装
//!
//! ## 責務
//!
//! - 1 本の WebSocket 接続を全チャンネルで共有する
//! - Phoenix チャンネルプロトコルのフレームを送受信する
//! - 受信フレームを topic ごとの `ChannelEvent` ストリームに振り分ける
//!
//! ## 設計ノート
//!
//! 接続は最初の `subscribe` で遅延的に確立されます。
//! ソケットが切れた場合、参加中のチャンネルには `SubscribeStatus::Closed` が
//! 通知され、再接続の判断は ConnectionManager に委ねられます。

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::{
    sync::{Mutex as AsyncMutex, broadcast, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use crate::{
    domain::{
        BroadcastMessage, ChannelEvent, ChannelHandle, ChannelName, ChannelOptions, ChannelState,
        EventBinding, RealtimeTransport, SubscribeStatus, TransportError,
    },
    infrastructure::dto::phoenix::{
        ACCESS_TOKEN, BROADCAST, BroadcastEnvelope, PHX_CLOSE, PHX_ERROR, PHX_JOIN, PHX_LEAVE,
        PHX_REPLY, POSTGRES_CHANGES, PhoenixFrame, PostgresChangesEnvelope, ReplyPayload,
        broadcast_payload, join_payload, topic_for,
    },
};

/// チャンネルごとのイベントバッファ容量
const CHANNEL_EVENT_CAPACITY: usize = 256;

/// WebSocket を使った RealtimeTransport 実装
///
/// ## 使用例
///
/// ```ignore
/// let transport = WebSocketTransport::new("wss://example.test/realtime/v1/websocket?vsn=1.0.0");
/// transport.set_auth(&token).await;
/// let channel = transport.channel(&name, ChannelOptions::default());
/// ```
pub struct WebSocketTransport {
    shared: Arc<SocketShared>,
}

impl WebSocketTransport {
    /// 新しい WebSocketTransport を作成
    ///
    /// # 引数
    ///
    /// - `endpoint`: WebSocket の URL（API キーなどのクエリを含めてよい）
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(SocketShared {
                endpoint: endpoint.into(),
                access_token: RwLock::new(None),
                channels: Mutex::new(HashMap::new()),
                retired: Mutex::new(Vec::new()),
                link: AsyncMutex::new(None),
                next_ref: AtomicU64::new(1),
                next_link_id: AtomicU64::new(1),
            }),
        }
    }

    /// 現在登録されているチャンネル数
    pub fn channel_count(&self) -> usize {
        lock(&self.shared.channels).len()
    }
}

#[async_trait]
impl RealtimeTransport for WebSocketTransport {
    async fn set_auth(&self, token: &str) {
        match self.shared.access_token.write() {
            Ok(mut current) => *current = Some(token.to_string()),
            Err(poisoned) => *poisoned.into_inner() = Some(token.to_string()),
        }

        // 参加中のチャンネルにも新しいトークンを伝える
        let joined: Vec<Arc<WsChannel>> = lock(&self.shared.channels)
            .values()
            .filter(|channel| channel.state() == ChannelState::Joined)
            .cloned()
            .collect();
        for channel in joined {
            let frame = PhoenixFrame::new(
                channel.topic.clone(),
                ACCESS_TOKEN,
                json!({ ACCESS_TOKEN: token }),
            )
            .with_refs(self.shared.make_ref(), channel.join_ref());
            if let Err(e) = self.shared.push(&frame).await {
                tracing::debug!("Failed to refresh token on '{}': {}", channel.topic, e);
            }
        }
    }

    fn channel(&self, name: &ChannelName, options: ChannelOptions) -> Arc<dyn ChannelHandle> {
        let (events, _) = broadcast::channel(CHANNEL_EVENT_CAPACITY);
        let channel = Arc::new(WsChannel {
            name: name.clone(),
            topic: topic_for(name.as_str()),
            options,
            state: Mutex::new(ChannelState::Closed),
            bindings: Mutex::new(Vec::new()),
            join_ref: Mutex::new(None),
            events,
            socket: Arc::downgrade(&self.shared),
        });

        let replaced = lock(&self.shared.channels).insert(channel.topic.clone(), channel.clone());
        if let Some(previous) = replaced {
            tracing::debug!("Replaced transport channel '{}'", channel.topic);
            let mut retired = lock(&self.shared.retired);
            retired.retain(|weak| weak.strong_count() > 0);
            retired.push(Arc::downgrade(&previous));
        }
        channel
    }

    async fn remove_channel(&self, handle: Arc<dyn ChannelHandle>) -> Result<(), TransportError> {
        let topic = topic_for(handle.name().as_str());
        let current = {
            let mut channels = lock(&self.shared.channels);
            match channels.get(&topic) {
                Some(channel) if same_channel(channel, &handle) => channels.remove(&topic),
                _ => None,
            }
        };
        let Some(channel) = current else {
            self.shared.close_retired(&handle);
            return Ok(());
        };

        let previous = channel.replace_state(ChannelState::Leaving);
        if matches!(previous, ChannelState::Joined | ChannelState::Joining) {
            let frame = PhoenixFrame::new(topic.clone(), PHX_LEAVE, json!({}))
                .with_refs(self.shared.make_ref(), channel.join_ref());
            if let Err(e) = self.shared.push(&frame).await {
                tracing::debug!("Leave frame for '{}' not sent: {}", topic, e);
            }
        }
        channel.replace_state(ChannelState::Closed);
        channel.emit(ChannelEvent::Status(SubscribeStatus::Closed));
        tracing::debug!("Channel '{}' removed", topic);
        Ok(())
    }
}

struct SocketShared {
    endpoint: String,
    access_token: RwLock<Option<String>>,
    /// topic → channel
    channels: Mutex<HashMap<String, Arc<WsChannel>>>,
    /// 同じ topic の新しいチャンネルに置き換えられたチャンネル
    retired: Mutex<Vec<Weak<WsChannel>>>,
    link: AsyncMutex<Option<SocketLink>>,
    next_ref: AtomicU64,
    next_link_id: AtomicU64,
}

/// 確立済みのソケットと送受信タスク
struct SocketLink {
    id: u64,
    outbound: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Drop for SocketShared {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.reader.abort();
            link.writer.abort();
        }
    }
}

impl SocketShared {
    /// 置き換え済みのチャンネルを閉じる
    ///
    /// topic は新しいチャンネルと共有しているため、map にも触れず phx_leave も送らない。
    fn close_retired(&self, handle: &Arc<dyn ChannelHandle>) {
        let retired = {
            let mut retired = lock(&self.retired);
            retired.retain(|weak| weak.strong_count() > 0);
            let position = retired.iter().position(|weak| {
                weak.upgrade()
                    .is_some_and(|channel| same_channel(&channel, handle))
            });
            position.and_then(|index| retired.swap_remove(index).upgrade())
        };

        match retired {
            Some(channel) => {
                if channel.replace_state(ChannelState::Closed) != ChannelState::Closed {
                    channel.emit(ChannelEvent::Status(SubscribeStatus::Closed));
                }
                tracing::debug!("Replaced channel '{}' closed", channel.topic);
            }
            None => tracing::trace!("Channel '{}' already removed", handle.name()),
        }
    }

    fn make_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn access_token(&self) -> Option<String> {
        match self.access_token.read() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 接続済みならその送信口を返し、未接続なら接続する
    async fn ensure_link(self: &Arc<Self>) -> Result<mpsc::UnboundedSender<String>, TransportError> {
        let mut link = self.link.lock().await;
        if let Some(existing) = link.as_ref()
            && !existing.outbound.is_closed()
        {
            return Ok(existing.outbound.clone());
        }

        tracing::debug!("Opening realtime socket");
        let (stream, _response) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut write, mut read) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let id = self.next_link_id.fetch_add(1, Ordering::SeqCst);

        let writer = tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    tracing::warn!("Realtime socket write failed: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        let weak = Arc::downgrade(self);
        let reader = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<PhoenixFrame>(&text) {
                        Ok(frame) => shared.dispatch(frame),
                        Err(e) => tracing::warn!("Unreadable realtime frame: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Realtime server closed the socket");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Realtime socket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            if let Some(shared) = weak.upgrade() {
                shared.on_socket_closed(id).await;
            }
        });

        *link = Some(SocketLink {
            id,
            outbound: outbound.clone(),
            reader,
            writer,
        });
        tracing::info!("Realtime socket connected");
        Ok(outbound)
    }

    /// 既存の接続にフレームを書き込む（接続はしない）
    async fn push(&self, frame: &PhoenixFrame) -> Result<(), TransportError> {
        let text = serde_json::to_string(frame).map_err(|e| TransportError::Encode(e.to_string()))?;
        let link = self.link.lock().await;
        let Some(link) = link.as_ref() else {
            return Err(TransportError::Send("socket is not connected".to_string()));
        };
        link.outbound
            .send(text)
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn dispatch(&self, frame: PhoenixFrame) {
        let channel = lock(&self.channels).get(&frame.topic).cloned();
        let Some(channel) = channel else {
            tracing::trace!("Frame for unknown topic '{}' ({})", frame.topic, frame.event);
            return;
        };

        match frame.event.as_str() {
            PHX_REPLY => {
                if frame.reference.is_none() || frame.reference != channel.join_ref() {
                    return;
                }
                if channel.state() != ChannelState::Joining {
                    return;
                }
                match serde_json::from_value::<ReplyPayload>(frame.payload) {
                    Ok(reply) if reply.is_ok() => {
                        channel.replace_state(ChannelState::Joined);
                        channel.emit(ChannelEvent::Status(SubscribeStatus::Subscribed));
                    }
                    Ok(reply) => {
                        channel.replace_state(ChannelState::Errored);
                        channel.emit(ChannelEvent::Status(SubscribeStatus::ChannelError(
                            reply.reason(),
                        )));
                    }
                    Err(e) => {
                        channel.replace_state(ChannelState::Errored);
                        channel.emit(ChannelEvent::Status(SubscribeStatus::ChannelError(
                            e.to_string(),
                        )));
                    }
                }
            }
            PHX_CLOSE => {
                channel.replace_state(ChannelState::Closed);
                channel.emit(ChannelEvent::Status(SubscribeStatus::Closed));
            }
            PHX_ERROR => {
                channel.replace_state(ChannelState::Errored);
                channel.emit(ChannelEvent::Status(SubscribeStatus::ChannelError(
                    "server reported a channel error".to_string(),
                )));
            }
            BROADCAST => match serde_json::from_value::<BroadcastEnvelope>(frame.payload) {
                Ok(envelope) => channel.emit(ChannelEvent::Broadcast {
                    event: envelope.event,
                    payload: envelope.payload,
                }),
                Err(e) => tracing::warn!("Malformed broadcast on '{}': {}", frame.topic, e),
            },
            POSTGRES_CHANGES => match serde_json::from_value::<PostgresChangesEnvelope>(frame.payload) {
                Ok(envelope) => channel.emit(ChannelEvent::DatabaseChange {
                    change_type: envelope.data.change_type,
                    table: envelope.data.table,
                    record: envelope.data.record,
                }),
                Err(e) => tracing::warn!("Malformed postgres change on '{}': {}", frame.topic, e),
            },
            other => tracing::trace!("Ignoring '{}' on '{}'", other, frame.topic),
        }
    }

    async fn on_socket_closed(&self, link_id: u64) {
        {
            let mut link = self.link.lock().await;
            if !link.as_ref().is_some_and(|l| l.id == link_id) {
                return;
            }
            // reader は呼び出し元のタスク自身なので writer だけを止める
            if let Some(closed) = link.take() {
                closed.writer.abort();
            }
        }

        let affected: Vec<Arc<WsChannel>> = lock(&self.channels).values().cloned().collect();
        for channel in affected {
            let previous = channel.replace_state(ChannelState::Errored);
            if matches!(previous, ChannelState::Joined | ChannelState::Joining) {
                channel.emit(ChannelEvent::Status(SubscribeStatus::Closed));
            }
        }
    }
}

/// WebSocketTransport が生成するチャンネル
pub struct WsChannel {
    name: ChannelName,
    topic: String,
    options: ChannelOptions,
    state: Mutex<ChannelState>,
    bindings: Mutex<Vec<EventBinding>>,
    join_ref: Mutex<Option<String>>,
    events: broadcast::Sender<ChannelEvent>,
    socket: Weak<SocketShared>,
}

impl WsChannel {
    fn replace_state(&self, next: ChannelState) -> ChannelState {
        std::mem::replace(&mut *lock(&self.state), next)
    }

    fn join_ref(&self) -> Option<String> {
        lock(&self.join_ref).clone()
    }

    fn emit(&self, event: ChannelEvent) {
        // 受信者がいない場合のエラーは無視する
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl ChannelHandle for WsChannel {
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
        let socket = self
            .socket
            .upgrade()
            .ok_or_else(|| TransportError::Connect("transport dropped".to_string()))?;

        self.replace_state(ChannelState::Joining);
        let outbound = match socket.ensure_link().await {
            Ok(outbound) => outbound,
            Err(e) => {
                self.replace_state(ChannelState::Errored);
                return Err(e);
            }
        };

        let reference = socket.make_ref();
        *lock(&self.join_ref) = Some(reference.clone());
        let bindings = lock(&self.bindings).clone();
        let payload = join_payload(&self.options, &bindings, socket.access_token().as_deref());
        let frame = PhoenixFrame::new(self.topic.clone(), PHX_JOIN, payload)
            .with_refs(reference.clone(), Some(reference));

        let text = serde_json::to_string(&frame).map_err(|e| TransportError::Encode(e.to_string()))?;
        outbound.send(text).map_err(|e| {
            self.replace_state(ChannelState::Errored);
            TransportError::Send(e.to_string())
        })
    }

    async fn send(&self, message: BroadcastMessage) -> Result<(), TransportError> {
        if self.state() != ChannelState::Joined {
            return Err(TransportError::NotJoined(self.name.as_str().to_string()));
        }
        let socket = self
            .socket
            .upgrade()
            .ok_or_else(|| TransportError::Send("transport dropped".to_string()))?;

        let frame = PhoenixFrame::new(
            self.topic.clone(),
            BROADCAST,
            broadcast_payload(&message.event, message.payload),
        )
        .with_refs(socket.make_ref(), self.join_ref());
        socket.push(&frame).await
    }
}

/// ポイズニングされた Mutex からも値を取り出す
fn same_channel(channel: &Arc<WsChannel>, handle: &Arc<dyn ChannelHandle>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(channel), Arc::as_ptr(handle))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
