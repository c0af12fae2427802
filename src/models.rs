//! 共通データモデル

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::analytics::currency;
use crate::analytics::language::LanguageTag;
use crate::error::{ScraperError, ScraperResult};
use crate::utils::extract_video_id;

/// 視聴ページのURLプレフィックス
pub const YOUTUBE_WATCH_URL: &str = "https://www.youtube.com/watch?v=";

/// 動画ID
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, derive_more::Display,
)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    /// 動画IDまたはURLを正規化して検証する
    pub fn parse(raw: &str) -> ScraperResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ScraperError::validation("videoId", "must not be empty"));
        }

        let candidate = if trimmed.starts_with("http") || trimmed.contains('/') {
            extract_video_id(trimmed).ok_or_else(|| {
                ScraperError::validation("videoId", format!("no video ID found in URL: {}", trimmed))
            })?
        } else {
            trimmed.to_string()
        };

        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("video id pattern is valid")
        });
        if !pattern.is_match(&candidate) {
            return Err(ScraperError::validation(
                "videoId",
                format!("invalid video ID: {}", candidate),
            ));
        }

        Ok(Self(candidate))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn watch_url(&self) -> String {
        format!("{}{}", YOUTUBE_WATCH_URL, self.0)
    }
}

/// 配信のメタ情報（取得できた場合のみ）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub title: Option<String>,
    pub channel: Option<String>,
}

/// チャットメッセージ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub username: String,
    pub text: String,
    /// 取得時刻
    pub observed_at: DateTime<Utc>,
    /// 判定された言語（パイプラインで設定）
    #[serde(default)]
    pub detected_language: Option<LanguageTag>,
    #[serde(default)]
    pub is_donation: bool,
    /// 投げ銭の金額文字列（"¥500" など）
    #[serde(default)]
    pub donation_amount_raw: Option<String>,
}

impl ChatMessage {
    pub fn new(username: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            text: text.into(),
            observed_at: Utc::now(),
            detected_language: None,
            is_donation: false,
            donation_amount_raw: None,
        }
    }

    /// 投げ銭メッセージとして作成
    pub fn donation(
        username: impl Into<String>,
        amount_raw: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            is_donation: true,
            donation_amount_raw: Some(amount_raw.into()),
            ..Self::new(username, text)
        }
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }
}

/// 投げ銭イベント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationEvent {
    pub username: String,
    pub amount_raw: String,
    /// 通貨ラベル（"US Dollar (USD)" / "Unknown currency"）
    pub normalized_currency_label: String,
    /// 数値部分（表示用）
    pub amount_value: Option<f64>,
    pub message: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl DonationEvent {
    /// 投げ銭メッセージから作成（金額文字列がなければ None）
    pub fn from_message(msg: &ChatMessage) -> Option<Self> {
        let amount_raw = msg.donation_amount_raw.as_ref()?;
        let parsed = currency::parse_amount(amount_raw);
        let message = Some(msg.text.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        Some(Self {
            username: msg.username.clone(),
            amount_raw: amount_raw.clone(),
            normalized_currency_label: parsed.label,
            amount_value: parsed.value,
            message,
            observed_at: msg.observed_at,
        })
    }
}
