//! スクレイプセッション
//!
//! 状態遷移は CREATED → RUNNING → {STOPPED, COMPLETED, FAILED} の一方向のみ。
//! 状態は watch チャンネルで保持し、遷移は `send_if_modified` の中で
//! 現在状態を確認してから行う（比較と更新が同じロックの中で起きる）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use super::pipeline::PipelineOutputs;
use crate::analytics::{LanguageTag, StatsSnapshot};
use crate::error::{ScraperError, ScraperResult};
use crate::models::{VideoId, VideoMetadata};

/// セッション状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    #[display("CREATED")]
    Created,
    #[display("RUNNING")]
    Running,
    #[display("STOPPED")]
    Stopped,
    #[display("COMPLETED")]
    Completed,
    #[display("FAILED")]
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Failed)
    }
}

/// 状態とその時刻
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// 終了理由（"Stopped by user." など）
    pub reason: Option<String>,
    /// 開始に失敗した場合のエラー（同時に開始を待っていた呼び出し側へ返す）
    pub start_error: Option<ScraperError>,
}

/// 一覧表示用のセッション情報
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: Uuid,
    pub video_id: VideoId,
    pub state: SessionState,
    pub video_title: Option<String>,
    pub channel_name: Option<String>,
    pub skip_langs: Vec<LanguageTag>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub total_messages: u64,
    pub average_throughput: f64,
    pub running_time_minutes: i64,
}

/// 統計エンドポイント用（セッション情報＋スナップショット）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatistics {
    pub video_id: VideoId,
    pub state: SessionState,
    pub video_title: Option<String>,
    pub channel_name: Option<String>,
    pub reason: Option<String>,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

/// スクレイプセッション
#[derive(Debug)]
pub struct Session {
    session_id: Uuid,
    video_id: VideoId,
    skip_langs: BTreeSet<LanguageTag>,
    created_at: DateTime<Utc>,
    status: watch::Sender<SessionStatus>,
    snapshot: watch::Receiver<Arc<StatsSnapshot>>,
    metadata: watch::Receiver<VideoMetadata>,
}

impl Session {
    /// CREATED 状態のセッションと、パイプラインに渡す出力側を作成
    pub fn new(video_id: VideoId, skip_langs: BTreeSet<LanguageTag>) -> (Self, PipelineOutputs) {
        let now = Utc::now();
        let (snapshot_tx, snapshot_rx) =
            watch::channel(Arc::new(StatsSnapshot::empty(&skip_langs, now)));
        let (metadata_tx, metadata_rx) = watch::channel(VideoMetadata::default());
        let (status, _) = watch::channel(SessionStatus {
            state: SessionState::Created,
            started_at: None,
            stopped_at: None,
            reason: None,
            start_error: None,
        });

        let session = Self {
            session_id: Uuid::new_v4(),
            video_id,
            skip_langs,
            created_at: now,
            status,
            snapshot: snapshot_rx,
            metadata: metadata_rx,
        };
        let outputs = PipelineOutputs {
            snapshot: snapshot_tx,
            metadata: metadata_tx,
        };
        (session, outputs)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn video_id(&self) -> &VideoId {
        &self.video_id
    }

    pub fn skip_langs(&self) -> &BTreeSet<LanguageTag> {
        &self.skip_langs
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn metadata(&self) -> VideoMetadata {
        self.metadata.borrow().clone()
    }

    /// 最新のスナップショット（書き込み側をブロックしない）
    pub fn snapshot(&self) -> Arc<StatsSnapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    /// CREATED → RUNNING
    pub fn mark_running(&self) -> bool {
        self.status.send_if_modified(|status| {
            if status.state != SessionState::Created {
                return false;
            }
            status.state = SessionState::Running;
            status.started_at = Some(Utc::now());
            true
        })
    }

    /// CREATED → FAILED（リソースを取得できなかった）
    pub fn fail_start(&self, error: ScraperError) -> bool {
        self.status.send_if_modified(|status| {
            if status.state != SessionState::Created {
                return false;
            }
            status.state = SessionState::Failed;
            status.stopped_at = Some(Utc::now());
            status.reason = Some(error.to_string());
            status.start_error = Some(error);
            true
        })
    }

    /// RUNNING → 終了状態（一度だけ成功する）
    pub fn finish(&self, state: SessionState, reason: impl Into<String>) -> bool {
        if !state.is_terminal() {
            return false;
        }
        let reason = reason.into();
        let changed = self.status.send_if_modified(|status| {
            if status.state != SessionState::Running {
                return false;
            }
            status.state = state;
            status.stopped_at = Some(Utc::now());
            status.reason = Some(reason.clone());
            true
        });
        if changed {
            tracing::info!(video_id = %self.video_id, "🔚 Session {}: {}", state, reason);
        }
        changed
    }

    /// CREATED を抜けるまで待つ
    ///
    /// `timeout` を過ぎても CREATED のままなら `ResourceExhausted`。
    pub async fn wait_until_started(&self, timeout: Duration) -> ScraperResult<SessionStatus> {
        let mut rx = self.status.subscribe();
        let waited =
            tokio::time::timeout(timeout, rx.wait_for(|s| s.state != SessionState::Created)).await;
        match waited {
            Ok(Ok(status)) => Ok(status.clone()),
            Ok(Err(_)) => Err(ScraperError::Internal(
                "session status channel closed".to_string(),
            )),
            Err(_) => Err(ScraperError::ResourceExhausted { waited: timeout }),
        }
    }

    /// 終了状態になるまで待つ（`timeout` を過ぎたら None）
    pub async fn wait_terminal(&self, timeout: Duration) -> Option<SessionState> {
        let mut rx = self.status.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|s| s.state.is_terminal())).await;
        match waited {
            Ok(Ok(status)) => Some(status.state),
            _ => None,
        }
    }

    /// 終了からの経過時間（終了していなければ None）
    pub fn finished_for(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let status = self.status.borrow();
        if !status.state.is_terminal() {
            return None;
        }
        status.stopped_at.map(|at| now - at)
    }

    pub fn view(&self) -> SessionView {
        let status = self.status();
        let metadata = self.metadata();
        let snapshot = self.snapshot();

        // 終了済みなら終了時刻まで、実行中なら現在までの経過時間
        let running_time_minutes = status
            .started_at
            .map(|start| {
                let end = status.stopped_at.unwrap_or_else(Utc::now);
                (end - start).num_minutes().max(0)
            })
            .unwrap_or(0);

        SessionView {
            session_id: self.session_id,
            video_id: self.video_id.clone(),
            state: status.state,
            video_title: metadata.title,
            channel_name: metadata.channel,
            skip_langs: self.skip_langs.iter().cloned().collect(),
            created_at: self.created_at,
            started_at: status.started_at,
            stopped_at: status.stopped_at,
            reason: status.reason,
            total_messages: snapshot.total_messages,
            average_throughput: snapshot.average_throughput,
            running_time_minutes,
        }
    }

    pub fn statistics(&self) -> SessionStatistics {
        let status = self.status();
        let metadata = self.metadata();
        SessionStatistics {
            video_id: self.video_id.clone(),
            state: status.state,
            video_title: metadata.title,
            channel_name: metadata.channel,
            reason: status.reason,
            stats: (*self.snapshot()).clone(),
        }
    }
}
