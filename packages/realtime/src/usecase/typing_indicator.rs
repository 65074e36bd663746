//! UseCase: タイピング通知のデバウンス
//!
//! `notify_typing()` が呼ばれ続けている間は `typing:start` を 1 度だけ送り、
//! 最後の呼び出しから一定時間入力がなければ `typing:stop` を送ります。

use std::{
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use async_trait::async_trait;
use tokio::task::JoinHandle;

/// タイピング状態の送り先
///
/// ConnectionManager が実装します。
#[async_trait]
pub trait TypingSink: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn send_typing(&self, is_typing: bool);
}

#[derive(Default)]
struct TypingState {
    is_typing: bool,
    /// 予約済みの停止タイマーを識別する世代番号
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct TypingInner {
    sink: Arc<dyn TypingSink>,
    debounce: Duration,
    state: Mutex<TypingState>,
}

impl TypingInner {
    fn state(&self) -> MutexGuard<'_, TypingState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for TypingInner {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

/// デバウンス付きのタイピング通知
pub struct TypingIndicatorController {
    inner: Arc<TypingInner>,
}

impl TypingIndicatorController {
    pub fn new(sink: Arc<dyn TypingSink>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(TypingInner {
                sink,
                debounce,
                state: Mutex::new(TypingState::default()),
            }),
        }
    }

    pub fn is_typing(&self) -> bool {
        self.inner.state().is_typing
    }

    /// 入力があったことを通知する
    ///
    /// 未接続なら何もしません。
    pub async fn notify_typing(&self) {
        if !self.inner.sink.is_connected() {
            return;
        }

        let started = {
            let mut state = self.inner.state();
            let started = !state.is_typing;
            state.is_typing = true;
            state.generation = state.generation.wrapping_add(1);
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            let weak = Arc::downgrade(&self.inner);
            let generation = state.generation;
            let debounce = self.inner.debounce;
            state.timer = Some(tokio::spawn(Self::stop_after(weak, generation, debounce)));
            started
        };

        if started {
            self.inner.sink.send_typing(true).await;
        }
    }

    /// 入力が終わったことを通知する
    ///
    /// タイマーを取り消し、入力中だった場合だけ `typing:stop` を送ります。
    pub async fn notify_stopped(&self) {
        let was_typing = {
            let mut state = self.inner.state();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.generation = state.generation.wrapping_add(1);
            std::mem::replace(&mut state.is_typing, false)
        };

        if was_typing {
            self.inner.sink.send_typing(false).await;
        }
    }

    async fn stop_after(weak: Weak<TypingInner>, generation: u64, debounce: Duration) {
        tokio::time::sleep(debounce).await;

        let Some(inner) = weak.upgrade() else {
            return;
        };
        {
            let mut state = inner.state();
            if state.generation != generation || !state.is_typing {
                return;
            }
            state.is_typing = false;
            // 自分自身のハンドルなので abort せずに手放す
            state.timer = None;
        }
        inner.sink.send_typing(false).await;
    }
}
