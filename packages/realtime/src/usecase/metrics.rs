//! 接続メトリクス
//!
//! ConnectionManager だけが書き込み、外部には [`MetricsSnapshot`] として
//! 読み取り専用で公開されます。

use std::time::Duration;

/// ある時点のメトリクスのコピー
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// 接続試行の回数（リトライを含む）
    pub connection_attempts: u64,
    /// subscribed まで到達した回数
    pub successful_connections: u64,
    /// 失敗した試行の回数
    pub failed_connections: u64,
    /// 成功した試行の平均所要時間（ミリ秒）
    pub average_connection_time_ms: f64,
    /// 現在のリトライ回数
    pub retry_count: u32,
    /// フォールバックに入ったことがあるか
    pub fallback_activated: bool,
    /// 最後に記録したエラー
    pub last_error: Option<String>,
}

/// 接続メトリクスのカウンター
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    current: MetricsSnapshot,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&mut self) {
        self.current.connection_attempts = self.current.connection_attempts.saturating_add(1);
    }

    /// 成功を記録し、平均接続時間を更新する
    pub fn record_success(&mut self, elapsed: Duration) {
        let successes = self.current.successful_connections.saturating_add(1);
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let previous = self.current.average_connection_time_ms;
        self.current.average_connection_time_ms =
            previous + (elapsed_ms - previous) / successes as f64;
        self.current.successful_connections = successes;
        self.current.retry_count = 0;
    }

    pub fn record_failure(&mut self, error: impl ToString) {
        self.current.failed_connections = self.current.failed_connections.saturating_add(1);
        self.current.last_error = Some(error.to_string());
    }

    /// 試行の失敗ではないエラー（確立済み接続の切断など）を記録する
    pub fn note_error(&mut self, error: impl ToString) {
        self.current.last_error = Some(error.to_string());
    }

    pub fn set_retry_count(&mut self, retry_count: u32) {
        self.current.retry_count = retry_count;
    }

    pub fn activate_fallback(&mut self) {
        self.current.fallback_activated = true;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.current.clone()
    }
}
