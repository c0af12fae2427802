//! セッション単位のインジェストパイプライン
//!
//! 受信タスクが上流ストリームを `PendingEvents` へ流し込み、集計ループが
//! そこから取り出して `StatsAggregator` を更新する。集計が遅れても受信は
//! 止まらない（溢れた分は古いものから捨てる）。

use chrono::Utc;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use super::buffer::PendingEvents;
use super::retry::{Backoff, RetryConfig};
use super::source::{ChatEventSource, UpstreamEvent};
use crate::analytics::{
    KeywordScorer, LanguageClassifier, ScriptLanguageClassifier, StatsAggregator, StatsSnapshot,
};
use crate::config::AnalysisConfig;
use crate::error::TransportError;
use crate::models::{ChatMessage, DonationEvent, VideoId, VideoMetadata};

/// パイプライン設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// 受信と集計の間のバッファ容量
    pub pending_capacity: usize,
    /// バケット更新とスナップショット公開の間隔（ミリ秒）
    pub tick_interval_ms: u64,
    /// バッチ処理後のスナップショット公開の最短間隔（ミリ秒）
    pub publish_interval_ms: u64,
    /// この時間メッセージがなければ配信終了とみなす（秒）
    pub inactivity_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pending_capacity: 1024,
            tick_interval_ms: 1000,
            publish_interval_ms: 250,
            inactivity_timeout_secs: 30 * 60,
            retry: RetryConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }
}

/// パイプラインの終了理由
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// 停止要求
    Stopped,
    /// 配信終了・無活動
    Completed { reason: String },
    /// 回復不能なエラー・再試行の使い切り
    Failed { reason: String },
}

impl PipelineOutcome {
    /// 終了後もリソースを再利用してよいか
    pub fn resource_healthy(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// メッセージ解析に使う共有コンポーネント
#[derive(Clone)]
pub struct Analyzers {
    pub classifier: Arc<dyn LanguageClassifier>,
    pub scorer: Arc<KeywordScorer>,
}

impl Analyzers {
    /// 設定から作成（ストップワードファイルが指定されていれば読み込む）
    pub fn from_config(config: &AnalysisConfig) -> anyhow::Result<Self> {
        let mut scorer = KeywordScorer::new();
        if let Some(path) = &config.stopword_file {
            scorer = scorer.load_stopword_file(path)?;
        }
        Ok(Self {
            classifier: Arc::new(ScriptLanguageClassifier::new(
                config.min_language_confidence,
            )),
            scorer: Arc::new(scorer),
        })
    }
}

/// パイプラインが公開する出力
pub struct PipelineOutputs {
    pub snapshot: watch::Sender<Arc<StatsSnapshot>>,
    pub metadata: watch::Sender<VideoMetadata>,
}

type EventBuffer = PendingEvents<UpstreamEvent, PipelineOutcome>;

/// インジェストパイプライン
pub struct IngestionPipeline<S: ChatEventSource> {
    source: Arc<S>,
    resource: Arc<S::Resource>,
    video_id: VideoId,
    analyzers: Analyzers,
    aggregator: StatsAggregator,
    config: PipelineConfig,
    outputs: PipelineOutputs,
}

impl<S: ChatEventSource> IngestionPipeline<S> {
    pub fn new(
        source: Arc<S>,
        resource: Arc<S::Resource>,
        video_id: VideoId,
        analyzers: Analyzers,
        aggregator: StatsAggregator,
        config: PipelineConfig,
        outputs: PipelineOutputs,
    ) -> Self {
        Self {
            source,
            resource,
            video_id,
            analyzers,
            aggregator,
            config,
            outputs,
        }
    }

    /// 終了するまで処理を続ける
    ///
    /// `cancel` が発火したら受信を止め、バッファに残ったイベントを処理してから
    /// `Stopped` を返す。
    pub async fn run(mut self, cancel: CancellationToken) -> PipelineOutcome {
        let buffer: Arc<EventBuffer> = Arc::new(PendingEvents::new(self.config.pending_capacity));
        let reader_cancel = cancel.child_token();
        // 停止猶予を過ぎて abort されたときに受信タスクも道連れにする
        let reader = AbortOnDropHandle::new(tokio::spawn(read_upstream(
            Arc::clone(&self.source),
            Arc::clone(&self.resource),
            self.video_id.clone(),
            Arc::clone(&buffer),
            self.config.retry.clone(),
            reader_cancel.clone(),
        )));

        tracing::info!(video_id = %self.video_id, "🚀 Ingestion pipeline started");

        let mut tick = tokio::time::interval(self.config.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let publish_interval = self.config.publish_interval();
        let inactivity_timeout = self.config.inactivity_timeout();
        let mut last_publish = Instant::now();
        let mut last_activity = Instant::now();

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let drained = buffer.drain(usize::MAX);
                    self.apply(drained.items);
                    break PipelineOutcome::Stopped;
                }
                _ = buffer.notified() => {
                    let drained = buffer.drain(usize::MAX);
                    if self.apply(drained.items) > 0 {
                        last_activity = Instant::now();
                    }
                    if let Some(outcome) = drained.closed {
                        break outcome;
                    }
                    if last_publish.elapsed() >= publish_interval {
                        self.aggregator.set_dropped_events(buffer.dropped_count());
                        self.publish();
                        last_publish = Instant::now();
                    }
                }
                _ = tick.tick() => {
                    self.aggregator.tick(Utc::now());
                    if last_activity.elapsed() >= inactivity_timeout {
                        break PipelineOutcome::Completed {
                            reason: format!(
                                "No messages received for {} minutes",
                                inactivity_timeout.as_secs() / 60
                            ),
                        };
                    }
                    self.aggregator.set_dropped_events(buffer.dropped_count());
                    self.publish();
                    last_publish = Instant::now();
                }
            }
        };

        reader_cancel.cancel();
        if let Err(e) = reader.await {
            tracing::warn!(video_id = %self.video_id, "⚠️ Upstream reader task failed: {}", e);
        }

        self.aggregator.set_dropped_events(buffer.dropped_count());
        self.aggregator.tick(Utc::now());
        self.publish();

        match &outcome {
            PipelineOutcome::Failed { reason } => {
                tracing::error!(video_id = %self.video_id, "❌ Ingestion failed: {}", reason)
            }
            _ => tracing::info!(
                video_id = %self.video_id,
                total_messages = self.aggregator.total_messages(),
                dropped = buffer.dropped_count(),
                "🏁 Ingestion pipeline finished: {:?}",
                outcome
            ),
        }
        outcome
    }

    /// イベントを到着順に処理し、処理したチャットメッセージ数を返す
    fn apply(&mut self, events: Vec<UpstreamEvent>) -> usize {
        let mut messages = 0;
        for event in events {
            match event {
                UpstreamEvent::Chat(msg) => {
                    self.handle_message(msg);
                    messages += 1;
                }
                UpstreamEvent::Donation(msg) => {
                    if let Some(donation) = DonationEvent::from_message(&msg) {
                        tracing::debug!(
                            video_id = %self.video_id,
                            "💰 Donation from {}: {}",
                            donation.username,
                            donation.amount_raw
                        );
                        self.aggregator.record_donation(donation);
                    }
                    if !msg.text.trim().is_empty() {
                        self.handle_message(msg);
                    }
                    messages += 1;
                }
                UpstreamEvent::Metadata { title, channel } => {
                    self.outputs.metadata.send_modify(|meta| {
                        if title.is_some() {
                            meta.title = title;
                        }
                        if channel.is_some() {
                            meta.channel = channel;
                        }
                    });
                }
                // 受信タスクが終了通知に変換するのでここには来ない
                UpstreamEvent::EndOfStream => {
                    tracing::debug!(video_id = %self.video_id, "End-of-stream event reached the aggregation loop, ignoring");
                }
            }
        }
        messages
    }

    fn handle_message(&mut self, mut msg: ChatMessage) {
        if msg.detected_language.is_none() {
            msg.detected_language = Some(self.analyzers.classifier.classify(&msg.text).language);
        }
        self.aggregator.record_message(&msg);

        // 除外言語は件数・言語分布には数えるがキーワードには含めない
        if self.aggregator.is_skipped(msg.detected_language.as_ref()) {
            return;
        }
        let tokens = self.analyzers.scorer.tokenize(&msg.text);
        self.aggregator.record_keywords(&tokens);
    }

    fn publish(&self) {
        let snapshot = self.aggregator.snapshot(Utc::now());
        self.outputs.snapshot.send_replace(Arc::new(snapshot));
    }
}

/// 上流ストリームを読み続ける受信タスク
///
/// 一時的なエラーはバックオフ付きで再購読し、致命的なエラー・再試行の
/// 使い切り・配信終了はバッファの終了通知として集計ループへ伝える。
async fn read_upstream<S: ChatEventSource>(
    source: Arc<S>,
    resource: Arc<S::Resource>,
    video_id: VideoId,
    buffer: Arc<EventBuffer>,
    retry: RetryConfig,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(retry);

    loop {
        let subscribed = tokio::select! {
            _ = cancel.cancelled() => return,
            result = source.subscribe(&resource, &video_id) => result,
        };

        let failure = match subscribed {
            Ok(mut stream) => {
                tracing::info!(video_id = %video_id, "📡 Subscribed to live chat");
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => {
                            source.unsubscribe(&resource, &video_id).await;
                            return;
                        }
                        next = stream.next() => next,
                    };
                    match next {
                        Some(Ok(UpstreamEvent::EndOfStream)) => {
                            tracing::info!(video_id = %video_id, "📴 Live stream ended");
                            source.unsubscribe(&resource, &video_id).await;
                            buffer.close(PipelineOutcome::Completed {
                                reason: "Live stream ended.".to_string(),
                            });
                            return;
                        }
                        Some(Ok(event)) => {
                            backoff.reset();
                            if buffer.push(event) {
                                tracing::trace!(video_id = %video_id, "Pending buffer full, dropped oldest event");
                            }
                        }
                        Some(Err(e)) => break e,
                        None => {
                            break TransportError::transient(
                                "upstream stream closed without end-of-stream",
                            )
                        }
                    }
                }
            }
            Err(e) => e,
        };

        if failure.is_fatal() {
            buffer.close(PipelineOutcome::Failed {
                reason: failure.message,
            });
            return;
        }

        match backoff.next_delay() {
            Some(delay) => {
                tracing::warn!(
                    video_id = %video_id,
                    "🔄 Transport error (attempt {}/{}), reconnecting in {:?}: {}",
                    backoff.consecutive_failures(),
                    backoff.max_attempts(),
                    delay,
                    failure.message
                );
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => {
                buffer.close(PipelineOutcome::Failed {
                    reason: format!(
                        "Retries exhausted after {} attempts: {}",
                        backoff.max_attempts(),
                        failure.message
                    ),
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{parse_skip_languages, AggregatorConfig};
    use crate::scraper::pool::ResourceFactory;
    use crate::scraper::scripted::ScriptedChatSource;
    use std::collections::BTreeSet;

    struct Harness {
        source: Arc<ScriptedChatSource>,
        video_id: VideoId,
        snapshot_rx: watch::Receiver<Arc<StatsSnapshot>>,
        metadata_rx: watch::Receiver<VideoMetadata>,
        pipeline: IngestionPipeline<ScriptedChatSource>,
    }

    async fn harness(skip: &[&str], config: PipelineConfig) -> Harness {
        let source = Arc::new(ScriptedChatSource::new());
        let resource = Arc::new(source.create().await.unwrap());
        let video_id = VideoId::parse("pipeline01").unwrap();
        let skip_langs: BTreeSet<_> = parse_skip_languages(skip);
        let (snapshot_tx, snapshot_rx) =
            watch::channel(Arc::new(StatsSnapshot::empty(&skip_langs, Utc::now())));
        let (metadata_tx, metadata_rx) = watch::channel(VideoMetadata::default());

        let pipeline = IngestionPipeline::new(
            Arc::clone(&source),
            resource,
            video_id.clone(),
            Analyzers {
                classifier: Arc::new(ScriptLanguageClassifier::default()),
                scorer: Arc::new(KeywordScorer::new()),
            },
            StatsAggregator::new(AggregatorConfig::default(), skip_langs, Utc::now()),
            config,
            PipelineOutputs {
                snapshot: snapshot_tx,
                metadata: metadata_tx,
            },
        );
        Harness {
            source,
            video_id,
            snapshot_rx,
            metadata_rx,
            pipeline,
        }
    }

    fn fast_retry(max_attempts: u32) -> PipelineConfig {
        PipelineConfig {
            retry: RetryConfig {
                max_attempts,
                initial_delay_ms: 1,
                backoff_multiplier: 1.0,
                max_delay_ms: 1,
            },
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_end_of_stream_completes() {
        let h = harness(&[], PipelineConfig::default()).await;
        let feed = h.source.feed(&h.video_id);
        feed.send(UpstreamEvent::Metadata {
            title: Some("Morning stream".to_string()),
            channel: Some("Rustacean".to_string()),
        });
        feed.chat("alice", "tokio runtime rocks")
            .chat("bob", "tokio select macro")
            .donation("carol", "¥500", "")
            .end();

        let outcome = h.pipeline.run(CancellationToken::new()).await;
        assert!(matches!(outcome, PipelineOutcome::Completed { .. }));

        let snap = h.snapshot_rx.borrow().clone();
        assert_eq!(snap.total_messages, 2);
        assert_eq!(snap.total_donations, 1);
        assert_eq!(snap.recent_donations[0].normalized_currency_label, "Japanese Yen (JPY)");
        assert_eq!(snap.top_keywords[0].keyword, "tokio");
        assert_eq!(snap.top_keywords[0].score, 2);
        assert_eq!(h.metadata_rx.borrow().title.as_deref(), Some("Morning stream"));
        assert_eq!(h.source.unsubscribe_count(), 1);
    }

    #[tokio::test]
    async fn test_skipped_language_excluded_from_keywords() {
        let h = harness(&["korean"], PipelineConfig::default()).await;
        let feed = h.source.feed(&h.video_id);
        feed.chat("alice", "ferris crab ferris");
        for i in 0..5 {
            feed.chat(&format!("viewer{}", i), "안녕하세요 여러분 반가워요");
        }
        feed.end();

        h.pipeline.run(CancellationToken::new()).await;
        let snap = h.snapshot_rx.borrow().clone();

        assert_eq!(snap.total_messages, 6);
        let keywords: Vec<&str> = snap.top_keywords.iter().map(|k| k.keyword.as_str()).collect();
        assert_eq!(keywords, vec!["ferris", "crab"]);
        assert_eq!(snap.top_languages[0].language.as_str(), "KOREAN");
        assert_eq!(snap.top_languages[0].count, 5);
    }

    #[tokio::test]
    async fn test_transient_errors_reconnect() {
        let h = harness(&[], fast_retry(3)).await;
        h.source
            .fail_subscribe(&h.video_id, TransportError::transient("reset"), 2);
        let feed = h.source.feed(&h.video_id);
        feed.chat("alice", "reconnected fine").end();

        let outcome = h.pipeline.run(CancellationToken::new()).await;
        assert!(matches!(outcome, PipelineOutcome::Completed { .. }));
        assert_eq!(h.source.subscribe_count(), 3);
        assert_eq!(h.snapshot_rx.borrow().total_messages, 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_fails() {
        let h = harness(&[], fast_retry(2)).await;
        h.source
            .fail_subscribe(&h.video_id, TransportError::transient("timeout"), 10);

        let outcome = h.pipeline.run(CancellationToken::new()).await;
        match outcome {
            PipelineOutcome::Failed { reason } => assert!(reason.contains("Retries exhausted")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        // 初回 + 再試行2回
        assert_eq!(h.source.subscribe_count(), 3);
        assert!(!PipelineOutcome::Failed {
            reason: String::new()
        }
        .resource_healthy());
    }

    #[tokio::test]
    async fn test_fatal_error_fails_immediately() {
        let h = harness(&[], fast_retry(5)).await;
        let feed = h.source.feed(&h.video_id);
        feed.chat("alice", "hello there")
            .error(TransportError::fatal("chat is disabled"));

        let outcome = h.pipeline.run(CancellationToken::new()).await;
        assert_eq!(
            outcome,
            PipelineOutcome::Failed {
                reason: "chat is disabled".to_string()
            }
        );
        assert_eq!(h.source.subscribe_count(), 1);
        assert_eq!(h.snapshot_rx.borrow().total_messages, 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_pipeline() {
        let h = harness(&[], PipelineConfig::default()).await;
        let feed = h.source.feed(&h.video_id);
        feed.chat("alice", "still live");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(h.pipeline.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("pipeline should stop promptly")
            .unwrap();
        assert_eq!(outcome, PipelineOutcome::Stopped);
        assert_eq!(h.snapshot_rx.borrow().total_messages, 1);
        assert_eq!(h.source.unsubscribe_count(), 1);
    }

    #[test]
    fn test_analyzers_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stopwords.txt");
        std::fs::write(&path, "stream\n# comment\nclip # trailing\n").unwrap();

        let analyzers = Analyzers::from_config(&AnalysisConfig {
            stopword_file: Some(path),
            min_language_confidence: 0.5,
        })
        .unwrap();
        assert!(analyzers.scorer.is_stopword("stream"));
        assert!(analyzers.scorer.is_stopword("clip"));
        assert_eq!(
            analyzers.scorer.tokenize("stream clip highlights"),
            vec!["highlights"]
        );

        let missing = Analyzers::from_config(&AnalysisConfig {
            stopword_file: Some(dir.path().join("missing.txt")),
            ..AnalysisConfig::default()
        });
        assert!(missing.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_timeout_completes() {
        let config = PipelineConfig {
            inactivity_timeout_secs: 120,
            ..PipelineConfig::default()
        };
        let h = harness(&[], config).await;
        // 購読はできるが何も流れない

        let outcome = h.pipeline.run(CancellationToken::new()).await;
        assert_eq!(
            outcome,
            PipelineOutcome::Completed {
                reason: "No messages received for 2 minutes".to_string()
            }
        );
    }
}
