//! UseCase: チャンネルレジストリ
//!
//! 同じ会話に対して参加済みのチャンネルが 2 本以上存在しないようにする、
//! プロセス全体で共有されるチャンネル名 → ハンドルの対応表です。
//!
//! - ホストが 1 つの `Arc<ChannelRegistry>` を作り、すべての ConnectionManager に注入する
//! - Mutex は同期的な HashMap 操作の間だけ保持し、`.await` をまたがない
//! - 参加済みでないエントリは再利用せず、取り除いてトランスポートに破棄させる

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::domain::{ChannelHandle, ChannelName, ChannelState, RealtimeTransport};

/// `acquire_or_create` の結果
pub struct AcquiredChannel {
    pub handle: Arc<dyn ChannelHandle>,
    /// 既存のハンドルを再利用したか（false なら `create` で作られた）
    pub reused: bool,
}

/// チャンネル名 → ハンドルのレジストリ
pub struct ChannelRegistry {
    transport: Arc<dyn RealtimeTransport>,
    channels: Mutex<HashMap<ChannelName, Arc<dyn ChannelHandle>>>,
}

impl ChannelRegistry {
    /// 新しい ChannelRegistry を作成
    pub fn new(transport: Arc<dyn RealtimeTransport>) -> Self {
        Self {
            transport,
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn transport(&self) -> &Arc<dyn RealtimeTransport> {
        &self.transport
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<ChannelName, Arc<dyn ChannelHandle>>> {
        match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 参加済みのハンドルを取得
    ///
    /// 参加済みでないエントリが見つかった場合は取り除いて破棄し、`None` を返します。
    pub async fn acquire(&self, name: &ChannelName) -> Option<Arc<dyn ChannelHandle>> {
        let stale = {
            let mut channels = self.channels();
            match channels.get(name) {
                Some(handle) if handle.is_joined() => return Some(handle.clone()),
                Some(_) => channels.remove(name),
                None => None,
            }
        };
        if let Some(stale) = stale {
            tracing::debug!("Evicting non-joined channel '{}'", name);
            self.teardown(stale).await;
        }
        None
    }

    /// ハンドルを登録（上書き）
    ///
    /// 別のハンドルを上書きした場合、古い方は破棄されます。
    pub async fn register(&self, name: ChannelName, handle: Arc<dyn ChannelHandle>) {
        let replaced = self.channels().insert(name, handle.clone());
        if let Some(previous) = replaced
            && !Arc::ptr_eq(&previous, &handle)
        {
            self.teardown(previous).await;
        }
    }

    /// 参加済み（または参加処理中）のハンドルを再利用し、なければ作成して登録する
    ///
    /// 判定と登録は 1 回のロックの中で行われるため、並行する 2 つの接続が
    /// 同じ名前に別々のチャンネルを作ることはありません。参加処理中のハンドルを
    /// 再利用した呼び出し側は、自分で subscribe せずにステータスを待ちます。
    pub async fn acquire_or_create<F>(&self, name: &ChannelName, create: F) -> AcquiredChannel
    where
        F: FnOnce() -> Arc<dyn ChannelHandle>,
    {
        let (acquired, stale) = {
            let mut channels = self.channels();
            match channels.get(name) {
                Some(handle)
                    if matches!(handle.state(), ChannelState::Joined | ChannelState::Joining) =>
                {
                    (
                        AcquiredChannel {
                            handle: handle.clone(),
                            reused: true,
                        },
                        None,
                    )
                }
                _ => {
                    let handle = create();
                    let stale = channels.insert(name.clone(), handle.clone());
                    (
                        AcquiredChannel {
                            handle,
                            reused: false,
                        },
                        stale,
                    )
                }
            }
        };

        if let Some(stale) = stale {
            tracing::debug!("Replacing non-joined channel '{}'", name);
            self.teardown(stale).await;
        }
        acquired
    }

    /// 名前で取り除き、トランスポートに破棄させる
    ///
    /// 何度呼んでも安全で、すでに死んでいるハンドルでもエラーになりません。
    pub async fn evict(&self, name: &ChannelName) {
        let removed = self.channels().remove(name);
        match removed {
            Some(handle) => self.teardown(handle).await,
            None => tracing::trace!("Channel '{}' not registered", name),
        }
    }

    /// `handle` がまだ登録されている場合に限り取り除いて破棄する
    ///
    /// 登録が別のハンドルに置き換わっていた場合、そのハンドルには触れません。
    pub async fn release(&self, name: &ChannelName, handle: &Arc<dyn ChannelHandle>) {
        let removed = {
            let mut channels = self.channels();
            match channels.get(name) {
                Some(current) if Arc::ptr_eq(current, handle) => channels.remove(name),
                _ => None,
            }
        };
        if let Some(removed) = removed {
            self.teardown(removed).await;
        }
    }

    pub fn contains(&self, name: &ChannelName) -> bool {
        self.channels().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.channels().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels().is_empty()
    }

    async fn teardown(&self, handle: Arc<dyn ChannelHandle>) {
        let name = handle.name().clone();
        if let Err(e) = self.transport.remove_channel(handle).await {
            tracing::debug!("Transport teardown of '{}' failed: {}", name, e);
        }
    }
}
