//! ランダムなチャットを生成するシミュレーション用ソース
//!
//! 実ブラウザなしでサーバーを動かすためのもの。多言語のメッセージと
//! 一定割合の投げ銭を生成する。

use async_trait::async_trait;
use futures_util::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::pool::ResourceFactory;
use super::source::{ChatEventSource, EventStream, UpstreamEvent};
use crate::error::TransportError;
use crate::models::{ChatMessage, VideoId};

/// シミュレーション設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// 1秒あたりの平均メッセージ数
    pub messages_per_second: f64,
    /// 投げ銭の割合（0.0〜1.0）
    pub donation_ratio: f64,
    /// 指定秒数で配信終了にする（None なら終わらない）
    pub end_after_secs: Option<u64>,
    /// イベントごとに一時的な切断が起きる確率
    pub failure_rate: f64,
    /// ブラウザ起動にかかる時間（ミリ秒）
    pub launch_delay_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            messages_per_second: 5.0,
            donation_ratio: 0.02,
            end_after_secs: None,
            failure_rate: 0.0,
            launch_delay_ms: 200,
        }
    }
}

const SAMPLE_MESSAGES: &[&str] = &[
    "this stream is amazing",
    "hello from the other side",
    "what game is this",
    "the music is great today",
    "first time watching, love it",
    "안녕하세요 여러분",
    "오늘 방송 너무 재밌어요",
    "hola a todos desde madrid",
    "que buen directo",
    "bonjour tout le monde",
    "こんばんは！",
    "今日も配信ありがとう",
    "привет из москвы",
    "lol",
    "gg",
];

const SAMPLE_AMOUNTS: &[&str] = &["$5.00", "¥500", "€2.00", "₩10,000", "CA$10.00", "£3.00"];

/// シミュレーション用のダミーブラウザ
#[derive(Debug)]
pub struct SimulatedBrowser {
    pub id: u64,
}

/// ランダムにチャットを生成するソース
#[derive(Debug)]
pub struct SimulatedChatSource {
    config: SimulationConfig,
    next_id: AtomicU64,
}

impl SimulatedChatSource {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
        }
    }
}

struct GeneratorState {
    rng: StdRng,
    config: SimulationConfig,
    started: Instant,
    video_id: VideoId,
    announced: bool,
    finished: bool,
}

impl GeneratorState {
    fn next_delay(&mut self) -> Duration {
        let rate = self.config.messages_per_second.max(0.01);
        // 平均 1/rate 秒で前後にばらつかせる
        let jitter: f64 = self.rng.gen_range(0.5..1.5);
        Duration::from_secs_f64(jitter / rate)
    }

    fn next_event(&mut self) -> Result<UpstreamEvent, TransportError> {
        if self.rng.gen_bool(self.config.failure_rate.clamp(0.0, 1.0)) {
            return Err(TransportError::transient("simulated connection reset"));
        }

        let username = format!("viewer{:03}", self.rng.gen_range(0..200));
        let text = SAMPLE_MESSAGES[self.rng.gen_range(0..SAMPLE_MESSAGES.len())];
        if self.rng.gen_bool(self.config.donation_ratio.clamp(0.0, 1.0)) {
            let amount = SAMPLE_AMOUNTS[self.rng.gen_range(0..SAMPLE_AMOUNTS.len())];
            Ok(UpstreamEvent::Donation(ChatMessage::donation(
                username, amount, text,
            )))
        } else {
            Ok(UpstreamEvent::Chat(ChatMessage::new(username, text)))
        }
    }
}

#[async_trait]
impl ResourceFactory for SimulatedChatSource {
    type Resource = SimulatedBrowser;

    async fn create(&self) -> Result<SimulatedBrowser, TransportError> {
        tokio::time::sleep(Duration::from_millis(self.config.launch_delay_ms)).await;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(browser_id = id, "🧪 Simulated browser launched");
        Ok(SimulatedBrowser { id })
    }

    async fn validate(&self, _resource: &SimulatedBrowser) -> bool {
        true
    }

    async fn destroy(&self, resource: &SimulatedBrowser) {
        tracing::debug!(browser_id = resource.id, "🧪 Simulated browser closed");
    }
}

#[async_trait]
impl ChatEventSource for SimulatedChatSource {
    async fn subscribe(
        &self,
        resource: &SimulatedBrowser,
        video_id: &VideoId,
    ) -> Result<EventStream, TransportError> {
        tracing::debug!(
            browser_id = resource.id,
            video_id = %video_id,
            "🧪 Simulating live chat at {}",
            video_id.watch_url()
        );

        let state = GeneratorState {
            rng: StdRng::from_entropy(),
            config: self.config.clone(),
            started: Instant::now(),
            video_id: video_id.clone(),
            announced: false,
            finished: false,
        };

        let stream = futures_util::stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }
            if !state.announced {
                state.announced = true;
                let event = UpstreamEvent::Metadata {
                    title: Some(format!("Simulated live stream {}", state.video_id)),
                    channel: Some("Simulation Channel".to_string()),
                };
                return Some((Ok(event), state));
            }

            tokio::time::sleep(state.next_delay()).await;
            if let Some(limit) = state.config.end_after_secs {
                if state.started.elapsed() >= Duration::from_secs(limit) {
                    state.finished = true;
                    return Some((Ok(UpstreamEvent::EndOfStream), state));
                }
            }
            let event = state.next_event();
            Some((event, state))
        });
        Ok(stream.boxed())
    }

    async fn unsubscribe(&self, _resource: &SimulatedBrowser, video_id: &VideoId) {
        tracing::debug!(video_id = %video_id, "🧪 Simulated subscription closed");
    }
}
