//! エラー型定義
//!
//! コア（プール・パイプライン・オーケストレーター）が返すエラーの分類。
//! HTTP層への変換は `api::error` が担当する。

use std::time::Duration;
use thiserror::Error;

/// ライブラリ全体で使う Result 型
pub type ScraperResult<T> = Result<T, ScraperError>;

/// トランスポートエラーの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportErrorKind {
    /// 一時的なエラー（バックオフ付きで再接続する）
    Transient,
    /// 回復不能なエラー（セッションを FAILED にする）
    Fatal,
}

impl TransportErrorKind {
    /// エラー文字列から種別を判定
    ///
    /// 403/404 や配信終了を示すものは再試行しても回復しないので Fatal 扱い。
    /// タイムアウト・ネットワーク・レート制限などはすべて Transient。
    pub fn from_error_string(error_str: &str) -> Self {
        let error_lower = error_str.to_lowercase();

        if error_lower.contains("403")
            || error_lower.contains("forbidden")
            || error_lower.contains("404")
            || error_lower.contains("not found")
            || error_lower.contains("members only")
            || error_lower.contains("chat is disabled")
        {
            TransportErrorKind::Fatal
        } else {
            TransportErrorKind::Transient
        }
    }
}

/// 上流ドライバーから返るトランスポートエラー
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind:?} transport error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Fatal,
            message: message.into(),
        }
    }

    /// メッセージ文字列から種別を推定して作成
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: TransportErrorKind::from_error_string(&message),
            message,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == TransportErrorKind::Fatal
    }
}

/// コア処理のエラー
#[derive(Debug, Clone, Error)]
pub enum ScraperError {
    /// プールから時間内にリソースを取得できなかった（再試行可能）
    #[error("No scraper resource became available within {}ms", waited.as_millis())]
    ResourceExhausted { waited: Duration },

    /// 取得したリソースを初期化できなかった
    #[error("Failed to initialize scraper resource: {0}")]
    PoolFailure(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// リソースに触れる前に弾かれる入力エラー
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// 該当セッションが存在しない（異常ではない）
    #[error("No scraper found for video ID: {0}")]
    NotFound(String),

    /// シャットダウン処理中で新規セッションを受け付けない
    #[error("Scraper service is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScraperError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 呼び出し側が時間を置いて再試行してよいエラーか
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ResourceExhausted { .. } => true,
            Self::Transport(e) => !e.is_fatal(),
            _ => false,
        }
    }
}
