//! セッションライフサイクルの統合テスト
//!
//! 台本ソースを使い、開始・停止・自然終了・失敗の各経路で
//! リソースの返却とセッション状態を確認する

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use ytchatx::analytics::{parse_skip_languages, KeywordScorer, ScriptLanguageClassifier};
use ytchatx::config::{AppConfig, OrchestratorConfig};
use ytchatx::error::{ScraperError, TransportError};
use ytchatx::models::VideoId;
use ytchatx::scraper::{
    Analyzers, PipelineConfig, PoolConfig, RetryConfig, ScriptedChatSource, SessionOrchestrator,
    SessionState, StartOutcome, StopOutcome, STOPPED_BY_USER,
};

type TestOrchestrator = Arc<SessionOrchestrator<ScriptedChatSource>>;

fn app_config(max_size: usize) -> AppConfig {
    AppConfig {
        pool: PoolConfig {
            max_size,
            min_idle: 0,
            replace_discarded: false,
            ..PoolConfig::default()
        },
        orchestrator: OrchestratorConfig {
            acquire_timeout_ms: 100,
            stop_grace_ms: 1_000,
            ..OrchestratorConfig::default()
        },
        pipeline: PipelineConfig {
            tick_interval_ms: 50,
            publish_interval_ms: 0,
            retry: RetryConfig {
                max_attempts: 2,
                initial_delay_ms: 5,
                backoff_multiplier: 1.0,
                max_delay_ms: 5,
            },
            ..PipelineConfig::default()
        },
        ..AppConfig::default()
    }
}

fn setup(max_size: usize) -> (Arc<ScriptedChatSource>, TestOrchestrator) {
    setup_with(app_config(max_size))
}

fn setup_with(config: AppConfig) -> (Arc<ScriptedChatSource>, TestOrchestrator) {
    let source = Arc::new(ScriptedChatSource::new());
    let analyzers = Analyzers {
        classifier: Arc::new(ScriptLanguageClassifier::default()),
        scorer: Arc::new(KeywordScorer::new()),
    };
    let orchestrator = SessionOrchestrator::new(Arc::clone(&source), &config, analyzers);
    (source, orchestrator)
}

fn video(id: &str) -> VideoId {
    VideoId::parse(id).unwrap()
}

/// 開始・停止の統合テスト
#[cfg(test)]
mod start_stop_tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_starts_acquire_once() {
        let (source, orch) = setup(3);
        let id = video("concurrent");

        let starts = (0..8).map(|_| {
            let orch = Arc::clone(&orch);
            let id = id.clone();
            tokio::spawn(async move { orch.start(id, BTreeSet::new()).await })
        });
        let results = futures_util::future::join_all(starts).await;

        let mut started = 0;
        let mut session_ids = BTreeSet::new();
        for result in results {
            let outcome = result.unwrap().unwrap();
            if matches!(outcome, StartOutcome::Started(_)) {
                started += 1;
            }
            session_ids.insert(outcome.session().session_id());
        }

        assert_eq!(started, 1);
        assert_eq!(session_ids.len(), 1);
        assert_eq!(source.created_count(), 1);
        assert_eq!(orch.pool_stats().acquired_total, 1);
        assert_eq!(orch.running_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_returns_pool_to_baseline() {
        let (source, orch) = setup(2);
        let baseline = orch.pool_stats().in_use;

        orch.start(video("stopme"), BTreeSet::new()).await.unwrap();
        assert_eq!(orch.pool_stats().in_use, baseline + 1);
        // 購読が始まるのを待つ
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(orch.stop(&video("stopme")).await, StopOutcome::Stopped);
        assert_eq!(orch.pool_stats().in_use, baseline);
        assert_eq!(source.unsubscribe_count(), 1);

        let stats = orch.query(&video("stopme")).unwrap();
        assert_eq!(stats.state, SessionState::Stopped);
        assert_eq!(stats.reason.as_deref(), Some(STOPPED_BY_USER));
    }

    #[tokio::test]
    async fn test_exhausted_pool_keeps_existing_session_running() {
        let (_source, orch) = setup(1);
        orch.start(video("holder"), BTreeSet::new()).await.unwrap();

        let result = orch.start(video("latecomer"), BTreeSet::new()).await;
        assert!(matches!(result, Err(ScraperError::ResourceExhausted { .. })));

        assert_eq!(
            orch.session(&video("holder")).unwrap().state(),
            SessionState::Running
        );
        assert!(orch.session(&video("latecomer")).is_none());
        assert_eq!(orch.pool_stats().in_use, 1);
    }

    #[tokio::test]
    async fn test_stop_frees_slot_for_next_video() {
        let (_source, orch) = setup(1);
        orch.start(video("first"), BTreeSet::new()).await.unwrap();
        orch.stop(&video("first")).await;

        let outcome = orch.start(video("second"), BTreeSet::new()).await.unwrap();
        assert!(matches!(outcome, StartOutcome::Started(_)));
        // 返却されたリソースを再利用する
        assert_eq!(orch.pool_stats().created_total, 1);
    }
}

/// 自然終了・失敗の統合テスト
#[cfg(test)]
mod termination_tests {
    use super::*;

    #[tokio::test]
    async fn test_end_of_stream_completes() {
        let (source, orch) = setup(1);
        let id = video("ending");
        source
            .feed(&id)
            .chat("alice", "great stream tonight")
            .chat("bob", "great music")
            .end();

        let outcome = orch.start(id.clone(), BTreeSet::new()).await.unwrap();
        let state = outcome
            .session()
            .wait_terminal(Duration::from_secs(2))
            .await;
        assert_eq!(state, Some(SessionState::Completed));

        let stats = orch.query(&id).unwrap();
        assert_eq!(stats.reason.as_deref(), Some("Live stream ended."));
        assert_eq!(stats.stats.total_messages, 2);
        assert_eq!(stats.stats.top_keywords[0].keyword, "great");
        assert_eq!(stats.stats.top_keywords[0].score, 2);
        assert_eq!(orch.pool_stats().in_use, 0);
    }

    #[tokio::test]
    async fn test_retries_exhausted_fails_session() {
        let (source, orch) = setup(1);
        let id = video("flaky");
        source.fail_subscribe(&id, TransportError::transient("connection reset"), 10);

        let outcome = orch.start(id.clone(), BTreeSet::new()).await.unwrap();
        let state = outcome
            .session()
            .wait_terminal(Duration::from_secs(2))
            .await;
        assert_eq!(state, Some(SessionState::Failed));

        let stats = orch.query(&id).unwrap();
        assert!(stats
            .reason
            .as_deref()
            .is_some_and(|r| r.contains("Retries exhausted")));
        // 失敗したセッションのリソースは捨てられる
        let pool = orch.pool_stats();
        assert_eq!(pool.in_use, 0);
        assert_eq!(pool.discarded_total, 1);
        assert_eq!(source.destroyed_count(), 1);
    }

    #[tokio::test]
    async fn test_fatal_error_fails_and_lists_last() {
        let (source, orch) = setup(2);
        let broken = video("broken");
        source
            .feed(&broken)
            .error(TransportError::fatal("403 Forbidden"));

        orch.start(broken.clone(), BTreeSet::new()).await.unwrap();
        orch.start(video("healthy"), BTreeSet::new()).await.unwrap();
        orch.session(&broken)
            .unwrap()
            .wait_terminal(Duration::from_secs(2))
            .await;

        let views = orch.list();
        assert_eq!(views.len(), 2);
        assert_eq!(views[1].video_id, broken);
        assert_eq!(views[1].state, SessionState::Failed);
    }

    #[tokio::test]
    async fn test_stop_after_completion_is_already_finished() {
        let (source, orch) = setup(1);
        let id = video("done");
        source.feed(&id).end();

        let outcome = orch.start(id.clone(), BTreeSet::new()).await.unwrap();
        outcome
            .session()
            .wait_terminal(Duration::from_secs(2))
            .await;

        assert_eq!(
            orch.stop(&id).await,
            StopOutcome::AlreadyFinished(SessionState::Completed)
        );
    }
}

/// 集計内容の統合テスト
#[cfg(test)]
mod aggregation_tests {
    use super::*;

    #[tokio::test]
    async fn test_skipped_language_leaves_keywords_unchanged() {
        let (source, orch) = setup(1);
        let id = video("multilang");
        source
            .feed(&id)
            .chat("alice", "amazing gameplay")
            .chat("minsu", "오늘 방송 최고 최고")
            .chat("jiwoo", "방송 재밌어요")
            .end();

        let outcome = orch
            .start(id.clone(), parse_skip_languages(&["korean"]))
            .await
            .unwrap();
        outcome
            .session()
            .wait_terminal(Duration::from_secs(2))
            .await;

        let stats = orch.query(&id).unwrap().stats;
        // 件数・言語分布には含まれる
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.top_languages[0].language.as_str(), "KOREAN");
        assert_eq!(stats.top_languages[0].count, 2);

        let keywords: Vec<&str> = stats
            .top_keywords
            .iter()
            .map(|k| k.keyword.as_str())
            .collect();
        assert_eq!(keywords, vec!["amazing", "gameplay"]);
        assert_eq!(
            stats.skip_langs.iter().map(|l| l.as_str()).collect::<Vec<_>>(),
            vec!["KOREAN"]
        );
    }

    #[tokio::test]
    async fn test_donation_ring_keeps_newest() {
        let (source, orch) = setup(1);
        let id = video("donations");
        let capacity = AppConfig::default().aggregator.donation_capacity;

        let feed = source.feed(&id);
        for i in 0..=capacity {
            feed.donation(&format!("fan{}", i), "$5.00", "");
        }
        feed.end();

        let outcome = orch.start(id.clone(), BTreeSet::new()).await.unwrap();
        outcome
            .session()
            .wait_terminal(Duration::from_secs(2))
            .await;

        let stats = orch.query(&id).unwrap().stats;
        assert_eq!(stats.total_donations, capacity as u64 + 1);
        assert_eq!(stats.recent_donations.len(), capacity);
        assert_eq!(
            stats.recent_donations[0].username,
            format!("fan{}", capacity)
        );
        assert_eq!(stats.recent_donations[capacity - 1].username, "fan1");
        // 本文のない投げ銭はメッセージに数えない
        assert_eq!(stats.total_messages, 0);
    }

    #[tokio::test]
    async fn test_donation_currency_labels() {
        let (source, orch) = setup(1);
        let id = video("currencies");
        source
            .feed(&id)
            .donation("a", "CA$10.00", "hello from canada")
            .donation("b", "₩1,000", "")
            .donation("c", "XYZ 5", "")
            .end();

        let outcome = orch.start(id.clone(), BTreeSet::new()).await.unwrap();
        outcome
            .session()
            .wait_terminal(Duration::from_secs(2))
            .await;

        let stats = orch.query(&id).unwrap().stats;
        let labels: Vec<&str> = stats
            .recent_donations
            .iter()
            .map(|d| d.normalized_currency_label.as_str())
            .collect();
        assert_eq!(
            labels,
            vec![
                "Unknown currency",
                "South Korean Won (KRW)",
                "Canadian Dollar (CAD)"
            ]
        );
        assert_eq!(stats.total_messages, 1);
    }

    #[tokio::test]
    async fn test_burst_overflow_is_counted_as_dropped() {
        let mut config = app_config(1);
        config.pipeline.pending_capacity = 4;
        let (source, orch) = setup_with(config);
        let id = video("burst");

        let feed = source.feed(&id);
        for i in 0..2_000 {
            feed.chat(&format!("viewer{}", i % 50), "hype hype");
        }
        orch.start(id.clone(), BTreeSet::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let stats = orch.query(&id).unwrap();
        // 溢れても受信は止まらずセッションは続く
        assert_eq!(stats.state, SessionState::Running);
        assert!(stats.stats.dropped_events > 0);
        assert_eq!(
            stats.stats.total_messages + stats.stats.dropped_events,
            2_000
        );
    }

    #[tokio::test]
    async fn test_top_chatters_are_ranked() {
        let (source, orch) = setup(1);
        let id = video("chatters");
        let feed = source.feed(&id);
        for _ in 0..3 {
            feed.chat("regular", "still watching");
        }
        feed.chat("lurker", "first message here");
        feed.end();

        let outcome = orch.start(id.clone(), BTreeSet::new()).await.unwrap();
        outcome
            .session()
            .wait_terminal(Duration::from_secs(2))
            .await;

        let stats = orch.query(&id).unwrap().stats;
        assert_eq!(stats.top_chatters[0].username, "regular");
        assert_eq!(stats.top_chatters[0].message_count, 3);
        assert_eq!(stats.top_chatters[1].username, "lurker");
    }
}
