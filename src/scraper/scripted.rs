//! 台本どおりにイベントを流すチャットソース
//!
//! テストや記録済みチャットの再生に使う。`feed()` で次回の購読に流す
//! チャンネルを登録しておき、送信側からイベントを送り込む。登録がない
//! 動画を購読すると、何も流れない（静かな）ストリームになる。

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::pool::ResourceFactory;
use super::source::{ChatEventSource, EventStream, UpstreamEvent};
use crate::error::TransportError;
use crate::models::{ChatMessage, VideoId};

type FeedItem = Result<UpstreamEvent, TransportError>;

/// 台本ソースが貸し出すダミーのブラウザ
#[derive(Debug)]
pub struct ScriptedBrowser {
    pub id: u64,
    healthy: AtomicBool,
}

impl ScriptedBrowser {
    /// 次回の健全性チェックで不合格にする
    pub fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::SeqCst);
    }
}

/// 1回分の購読に流すイベントの送信口
#[derive(Debug, Clone)]
pub struct ScriptedFeed {
    tx: mpsc::UnboundedSender<FeedItem>,
}

impl ScriptedFeed {
    pub fn send(&self, event: UpstreamEvent) -> &Self {
        let _ = self.tx.send(Ok(event));
        self
    }

    pub fn chat(&self, username: &str, text: &str) -> &Self {
        self.send(UpstreamEvent::Chat(ChatMessage::new(username, text)))
    }

    pub fn donation(&self, username: &str, amount: &str, text: &str) -> &Self {
        self.send(UpstreamEvent::Donation(ChatMessage::donation(
            username, amount, text,
        )))
    }

    pub fn error(&self, error: TransportError) -> &Self {
        let _ = self.tx.send(Err(error));
        self
    }

    pub fn end(&self) {
        let _ = self.tx.send(Ok(UpstreamEvent::EndOfStream));
    }
}

/// 台本どおりに動くチャットソース
#[derive(Debug, Default)]
pub struct ScriptedChatSource {
    feeds: Mutex<HashMap<VideoId, VecDeque<mpsc::UnboundedReceiver<FeedItem>>>>,
    subscribe_failures: Mutex<HashMap<VideoId, VecDeque<TransportError>>>,
    fail_create: AtomicBool,
    hang_unsubscribe: AtomicBool,
    next_id: AtomicU64,
    created: AtomicU64,
    destroyed: AtomicU64,
    subscribed: AtomicU64,
    unsubscribed: AtomicU64,
}

impl ScriptedChatSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 次回の購読に流すチャンネルを登録
    pub fn feed(&self, video_id: &VideoId) -> ScriptedFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds
            .lock()
            .entry(video_id.clone())
            .or_default()
            .push_back(rx);
        ScriptedFeed { tx }
    }

    /// 次回以降の購読を指定のエラーで失敗させる（登録した回数分）
    pub fn fail_subscribe(&self, video_id: &VideoId, error: TransportError, times: usize) {
        let mut failures = self.subscribe_failures.lock();
        let queue = failures.entry(video_id.clone()).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// 購読解除を戻らなくする（停止要求に応じないブラウザの再現）
    pub fn set_hang_unsubscribe(&self, hang: bool) {
        self.hang_unsubscribe.store(hang, Ordering::SeqCst);
    }

    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed_count(&self) -> u64 {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn subscribe_count(&self) -> u64 {
        self.subscribed.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_count(&self) -> u64 {
        self.unsubscribed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceFactory for ScriptedChatSource {
    type Resource = ScriptedBrowser;

    async fn create(&self) -> Result<ScriptedBrowser, TransportError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TransportError::fatal("scripted browser launch failure"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedBrowser {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            healthy: AtomicBool::new(true),
        })
    }

    async fn validate(&self, resource: &ScriptedBrowser) -> bool {
        resource.healthy.load(Ordering::SeqCst)
    }

    async fn destroy(&self, _resource: &ScriptedBrowser) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatEventSource for ScriptedChatSource {
    async fn subscribe(
        &self,
        _resource: &ScriptedBrowser,
        video_id: &VideoId,
    ) -> Result<EventStream, TransportError> {
        self.subscribed.fetch_add(1, Ordering::SeqCst);

        let failure = self
            .subscribe_failures
            .lock()
            .get_mut(video_id)
            .and_then(|q| q.pop_front());
        if let Some(error) = failure {
            return Err(error);
        }

        let feed = self
            .feeds
            .lock()
            .get_mut(video_id)
            .and_then(|q| q.pop_front());
        match feed {
            Some(rx) => Ok(UnboundedReceiverStream::new(rx).boxed()),
            None => Ok(futures_util::stream::pending::<FeedItem>().boxed()),
        }
    }

    async fn unsubscribe(&self, _resource: &ScriptedBrowser, _video_id: &VideoId) {
        self.unsubscribed.fetch_add(1, Ordering::SeqCst);
        if self.hang_unsubscribe.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_feed_is_delivered_in_order() {
        let source = ScriptedChatSource::new();
        let video = VideoId::parse("scripted1").unwrap();
        let feed = source.feed(&video);
        feed.chat("alice", "hello").chat("bob", "world").end();

        let browser = source.create().await.unwrap();
        let events: Vec<_> = source
            .subscribe(&browser, &video)
            .await
            .unwrap()
            .take(3)
            .collect()
            .await;

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], Ok(UpstreamEvent::Chat(m)) if m.username == "alice"));
        assert!(matches!(&events[2], Ok(UpstreamEvent::EndOfStream)));
    }

    #[tokio::test]
    async fn test_subscribe_failures_are_consumed() {
        let source = ScriptedChatSource::new();
        let video = VideoId::parse("scripted2").unwrap();
        source.fail_subscribe(&video, TransportError::transient("reset"), 1);

        let browser = source.create().await.unwrap();
        assert!(source.subscribe(&browser, &video).await.is_err());
        assert!(source.subscribe(&browser, &video).await.is_ok());
        assert_eq!(source.subscribe_count(), 2);
    }
}
