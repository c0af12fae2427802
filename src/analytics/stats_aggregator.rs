//! セッション単位のリアルタイム集計
//!
//! 書き込みは1つのタスク（インジェストパイプライン）だけが行う。
//! 読み出し側には `snapshot()` で作った不変のスナップショットを渡すので、
//! ここではロックを持たない。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};

use super::language::LanguageTag;
use super::leaderboard::Leaderboard;
use super::throughput::{ThroughputBucket, ThroughputBuckets};
use crate::models::{ChatMessage, DonationEvent};

/// 集計の設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AggregatorConfig {
    /// スループットバケットの幅（秒）
    pub bucket_width_secs: u64,
    /// 保持する閉じたバケット数
    pub bucket_history: usize,
    /// 追跡するチャット投稿者数
    pub chatter_capacity: usize,
    /// スナップショットに載せる投稿者数
    pub top_chatters: usize,
    /// 追跡するキーワード数
    pub keyword_capacity: usize,
    /// スナップショットに載せるキーワード数
    pub top_keywords: usize,
    /// スナップショットに載せる言語数
    pub top_languages: usize,
    /// 投げ銭リングバッファの容量
    pub donation_capacity: usize,
    /// 直近メッセージの最大件数
    pub recent_message_limit: usize,
    /// 直近メッセージの保持時間（秒）
    pub recent_message_retention_secs: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            bucket_width_secs: 60,
            bucket_history: 60,
            chatter_capacity: 100,
            top_chatters: 12,
            keyword_capacity: 200,
            top_keywords: 20,
            top_languages: 3,
            donation_capacity: 10,
            recent_message_limit: 100,
            recent_message_retention_secs: 300,
        }
    }
}

/// 投稿数上位のユーザー
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopChatter {
    pub username: String,
    pub message_count: u64,
}

/// キーワードとスコア
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordRank {
    pub keyword: String,
    pub score: u64,
}

/// 言語ごとの割合
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageShare {
    pub language: LanguageTag,
    /// 0.1 単位に丸めたパーセンテージ
    pub percentage: f64,
    pub count: u64,
}

/// 直近メッセージ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentMessage {
    pub username: String,
    pub text: String,
    pub observed_at: DateTime<Utc>,
}

/// 読み取り専用の集計スナップショット
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_messages: u64,
    pub running_time_minutes: i64,
    /// 直近に閉じたバケット（件/分）
    pub last_throughput: f64,
    /// 保持中バケットの平均（件/分）
    pub average_throughput: f64,
    /// 保持中バケットの最大（件/分）
    pub max_throughput: f64,
    pub top_chatters: Vec<TopChatter>,
    pub top_keywords: Vec<KeywordRank>,
    pub top_languages: Vec<LanguageShare>,
    pub skip_langs: Vec<LanguageTag>,
    /// 新しい順
    pub recent_donations: Vec<DonationEvent>,
    pub total_donations: u64,
    /// バッファ溢れで捨てたイベント数
    pub dropped_events: u64,
    /// 集計中のバケットを含む履歴（古い順）
    pub buckets: Vec<ThroughputBucket>,
    pub recent_messages: Vec<RecentMessage>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
}

impl StatsSnapshot {
    /// まだ何も集計していない状態
    pub fn empty(skip_langs: &BTreeSet<LanguageTag>, now: DateTime<Utc>) -> Self {
        Self {
            total_messages: 0,
            running_time_minutes: 0,
            last_throughput: 0.0,
            average_throughput: 0.0,
            max_throughput: 0.0,
            top_chatters: Vec::new(),
            top_keywords: Vec::new(),
            top_languages: Vec::new(),
            skip_langs: skip_langs.iter().cloned().collect(),
            recent_donations: Vec::new(),
            total_donations: 0,
            dropped_events: 0,
            buckets: Vec::new(),
            recent_messages: Vec::new(),
            last_message_at: None,
            generated_at: now,
        }
    }
}

/// セッション単位の集計器
#[derive(Debug)]
pub struct StatsAggregator {
    config: AggregatorConfig,
    skip_langs: BTreeSet<LanguageTag>,
    started_at: DateTime<Utc>,
    total_messages: u64,
    total_donations: u64,
    dropped_events: u64,
    last_message_at: Option<DateTime<Utc>>,
    buckets: ThroughputBuckets,
    chatters: Leaderboard<String>,
    keywords: Leaderboard<String>,
    /// 言語ごとの件数（割合は読み出し時に計算する）
    language_counts: HashMap<LanguageTag, u64>,
    donations: VecDeque<DonationEvent>,
    recent_messages: VecDeque<RecentMessage>,
}

impl StatsAggregator {
    pub fn new(
        config: AggregatorConfig,
        skip_langs: BTreeSet<LanguageTag>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            buckets: ThroughputBuckets::new(config.bucket_width_secs, config.bucket_history),
            chatters: Leaderboard::new(config.chatter_capacity),
            keywords: Leaderboard::new(config.keyword_capacity),
            donations: VecDeque::with_capacity(config.donation_capacity),
            recent_messages: VecDeque::with_capacity(config.recent_message_limit),
            language_counts: HashMap::new(),
            total_messages: 0,
            total_donations: 0,
            dropped_events: 0,
            last_message_at: None,
            skip_langs,
            started_at,
            config,
        }
    }

    pub fn skip_langs(&self) -> &BTreeSet<LanguageTag> {
        &self.skip_langs
    }

    /// キーワード集計から除外する言語か
    pub fn is_skipped(&self, language: Option<&LanguageTag>) -> bool {
        language.is_some_and(|l| self.skip_langs.contains(l))
    }

    pub fn total_messages(&self) -> u64 {
        self.total_messages
    }

    pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
        self.last_message_at
    }

    /// メッセージ1件を記録（言語フィルタに関係なく全件）
    pub fn record_message(&mut self, msg: &ChatMessage) {
        self.buckets.record(msg.observed_at);
        self.total_messages += 1;
        self.last_message_at = Some(msg.observed_at);
        self.chatters.increment(msg.username.as_str(), 1);

        if let Some(language) = msg.detected_language.as_ref().filter(|l| !l.is_unknown()) {
            *self.language_counts.entry(language.clone()).or_default() += 1;
        }

        if self.config.recent_message_limit > 0 {
            if self.recent_messages.len() >= self.config.recent_message_limit {
                self.recent_messages.pop_front();
            }
            self.recent_messages.push_back(RecentMessage {
                username: msg.username.clone(),
                text: msg.text.clone(),
                observed_at: msg.observed_at,
            });
        }
    }

    /// 投げ銭を記録（容量を超えた場合は最も古いものを削除）
    pub fn record_donation(&mut self, event: DonationEvent) {
        self.total_donations += 1;
        if self.config.donation_capacity == 0 {
            return;
        }
        if self.donations.len() >= self.config.donation_capacity {
            self.donations.pop_back();
        }
        self.donations.push_front(event);
    }

    /// キーワードを出現ごとに1点加算
    pub fn record_keywords(&mut self, tokens: &[String]) {
        for token in tokens {
            self.keywords.increment(token.as_str(), 1);
        }
    }

    /// パイプライン側で数えた破棄イベント数を反映
    pub fn set_dropped_events(&mut self, dropped: u64) {
        self.dropped_events = dropped;
    }

    /// 時間経過の反映（バケットを進め、古い直近メッセージを捨てる）
    pub fn tick(&mut self, now: DateTime<Utc>) {
        self.buckets.advance(now);

        let retention = chrono::Duration::seconds(self.config.recent_message_retention_secs as i64);
        let cutoff = now - retention;
        while self
            .recent_messages
            .front()
            .is_some_and(|m| m.observed_at < cutoff)
        {
            self.recent_messages.pop_front();
        }
    }

    /// 言語別の割合（件数から毎回計算する）
    pub fn language_distribution(&self) -> Vec<LanguageShare> {
        let total: u64 = self.language_counts.values().sum();
        if total == 0 {
            return Vec::new();
        }

        let mut shares: Vec<LanguageShare> = self
            .language_counts
            .iter()
            .map(|(language, count)| LanguageShare {
                language: language.clone(),
                percentage: (*count as f64 / total as f64 * 1000.0).round() / 10.0,
                count: *count,
            })
            .collect();
        shares.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.language.cmp(&b.language))
        });
        shares
    }

    /// スナップショットを作成
    pub fn snapshot(&self, now: DateTime<Utc>) -> StatsSnapshot {
        let mut top_languages = self.language_distribution();
        top_languages.truncate(self.config.top_languages);

        StatsSnapshot {
            total_messages: self.total_messages,
            running_time_minutes: (now - self.started_at).num_minutes().max(0),
            last_throughput: self.buckets.last_throughput(),
            average_throughput: self.buckets.average_throughput(),
            max_throughput: self.buckets.max_throughput(),
            top_chatters: self
                .chatters
                .top(self.config.top_chatters)
                .into_iter()
                .map(|(username, message_count)| TopChatter {
                    username,
                    message_count,
                })
                .collect(),
            top_keywords: self
                .keywords
                .top(self.config.top_keywords)
                .into_iter()
                .map(|(keyword, score)| KeywordRank { keyword, score })
                .collect(),
            top_languages,
            skip_langs: self.skip_langs.iter().cloned().collect(),
            recent_donations: self.donations.iter().cloned().collect(),
            total_donations: self.total_donations,
            dropped_events: self.dropped_events,
            buckets: self.buckets.history(),
            recent_messages: self.recent_messages.iter().cloned().collect(),
            last_message_at: self.last_message_at,
            generated_at: now,
        }
    }
}
