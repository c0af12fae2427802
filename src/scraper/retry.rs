//! 再接続の指数バックオフ

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// リトライ設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// 連続失敗の許容回数（これを使い切ると FAILED）
    pub max_attempts: u32,
    /// 初期待機時間（ミリ秒）
    pub initial_delay_ms: u64,
    /// 指数バックオフの倍率
    pub backoff_multiplier: f64,
    /// 最大待機時間（ミリ秒）
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            backoff_multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// n 回目（1始まり）の失敗後の待機時間
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }
}

/// 連続失敗回数を数えるバックオフ状態
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    consecutive_failures: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
        }
    }

    /// 失敗を記録し、次に待つ時間を返す（試行回数を使い切ったら None）
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.consecutive_failures += 1;
        if self.consecutive_failures > self.config.max_attempts {
            return None;
        }
        Some(self.config.delay_for(self.consecutive_failures))
    }

    /// 成功したら連続失敗をリセット
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }
}
