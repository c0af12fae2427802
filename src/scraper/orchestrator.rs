//! セッションの開始・停止・照会を一元管理するオーケストレーター
//!
//! - 同じ動画IDで RUNNING のセッションは常に1つ（開始はレジストリのロック内で
//!   確認と挿入を行う）
//! - セッションが持つプールのリソースは、どの終了経路でもちょうど1回だけ返却される
//! - 終了したセッションは保持期間が過ぎたら掃除タスクが取り除く

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::pipeline::{Analyzers, IngestionPipeline, PipelineConfig, PipelineOutcome};
use super::pool::{PoolStats, PooledResource, ResourcePool};
use super::session::{Session, SessionState, SessionStatistics, SessionView};
use super::source::ChatEventSource;
use crate::analytics::{AggregatorConfig, LanguageTag, StatsAggregator};
use crate::config::{AppConfig, OrchestratorConfig};
use crate::error::{ScraperError, ScraperResult};
use crate::models::VideoId;

/// 停止要求の理由として記録する文言
pub const STOPPED_BY_USER: &str = "Stopped by user.";

/// 開始要求の結果
#[derive(Debug, Clone)]
pub enum StartOutcome {
    /// 新しいセッションを開始した
    Started(Arc<Session>),
    /// 既に実行中のセッションを返した
    AlreadyRunning(Arc<Session>),
}

impl StartOutcome {
    pub fn session(&self) -> &Arc<Session> {
        match self {
            Self::Started(session) | Self::AlreadyRunning(session) => session,
        }
    }
}

/// 停止要求の結果（どれも成功扱い）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// 停止要求より先に別の理由で終了していた
    AlreadyFinished(SessionState),
    NotFound,
}

/// HTTP層から使うスクレイパーサービスの抽象インタフェース
#[async_trait]
pub trait ScraperService: Send + Sync {
    /// 動画のスクレイプを開始（実行中なら既存のセッションを返す）
    async fn start(
        &self,
        video_id: VideoId,
        skip_langs: BTreeSet<LanguageTag>,
    ) -> ScraperResult<StartOutcome>;

    /// 動画のスクレイプを停止
    async fn stop(&self, video_id: &VideoId) -> StopOutcome;

    /// 統計情報を取得
    fn statistics(&self, video_id: &VideoId) -> ScraperResult<SessionStatistics>;

    /// 全セッションの一覧
    fn list(&self) -> Vec<SessionView>;

    fn running_count(&self) -> usize;

    fn pool_stats(&self) -> PoolStats;
}

type ResourceSlot<S> = Arc<Mutex<Option<PooledResource<S>>>>;

/// レジストリの1エントリ
struct SessionEntry<S: ChatEventSource> {
    session: Arc<Session>,
    /// 実行中だけリソースを持つ。取り出した側が返却する
    resource: ResourceSlot<S>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: ChatEventSource> SessionEntry<S> {
    fn new(session: Session) -> Self {
        Self {
            session: Arc::new(session),
            resource: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }
}

/// CREATED のまま登録したエントリの後始末
///
/// 開始処理の future がリソース取得中に drop されたら、エントリを FAILED に
/// してレジストリから外す。RUNNING にしたら `disarm` する。
struct PendingStart<'a, S: ChatEventSource> {
    orchestrator: &'a SessionOrchestrator<S>,
    entry: Arc<SessionEntry<S>>,
    armed: bool,
}

impl<S: ChatEventSource> PendingStart<'_, S> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<S: ChatEventSource> Drop for PendingStart<'_, S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let video_id = self.entry.session.video_id();
        if self.entry.session.fail_start(ScraperError::Internal(
            "start request was cancelled".to_string(),
        )) {
            tracing::warn!(video_id = %video_id, "⚠️ Start cancelled before a resource was acquired");
        }
        self.orchestrator.remove_entry(video_id, &self.entry);
    }
}

/// セッションオーケストレーター
pub struct SessionOrchestrator<S: ChatEventSource> {
    source: Arc<S>,
    pool: ResourcePool<S>,
    analyzers: Analyzers,
    config: OrchestratorConfig,
    pipeline_config: PipelineConfig,
    aggregator_config: AggregatorConfig,
    registry: Mutex<HashMap<VideoId, Arc<SessionEntry<S>>>>,
    shutting_down: AtomicBool,
    sweeper_cancel: CancellationToken,
    this: Weak<Self>,
}

impl<S: ChatEventSource> SessionOrchestrator<S> {
    /// オーケストレーターを作成し、保持期間の掃除タスクを起動する
    ///
    /// tokio ランタイム内で呼び出すこと。
    pub fn new(source: Arc<S>, config: &AppConfig, analyzers: Analyzers) -> Arc<Self> {
        let orchestrator = Arc::new_cyclic(|this| Self {
            pool: ResourcePool::new(Arc::clone(&source), config.pool.clone()),
            source,
            analyzers,
            config: config.orchestrator.clone(),
            pipeline_config: config.pipeline.clone(),
            aggregator_config: config.aggregator.clone(),
            registry: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            sweeper_cancel: CancellationToken::new(),
            this: this.clone(),
        });
        Self::spawn_sweeper(&orchestrator);
        orchestrator
    }

    pub fn pool(&self) -> &ResourcePool<S> {
        &self.pool
    }

    fn spawn_sweeper(this: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(this);
        let cancel = this.sweeper_cancel.clone();
        let period = this.config.sweep_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // 初回の即時 tick は読み捨てる
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let Some(orchestrator) = weak.upgrade() else { break };
                orchestrator.sweep().await;
            }
            tracing::debug!("🧹 Retention sweeper stopped");
        });
    }

    /// 保持期間を過ぎた終了済みセッションと、放置された待機リソースを片付ける
    pub async fn sweep(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention())
            .unwrap_or_else(|_| chrono::Duration::zero());
        let now = Utc::now();

        let removed = {
            let mut registry = self.registry.lock();
            let before = registry.len();
            registry.retain(|_, entry| {
                entry
                    .session
                    .finished_for(now)
                    .map_or(true, |elapsed| elapsed < retention)
            });
            before - registry.len()
        };
        if removed > 0 {
            tracing::info!("🧹 Removed {} finished sessions past retention", removed);
        }

        self.pool.evict_idle().await;
        removed
    }

    /// 同じエントリがまだ登録されていれば取り除く
    fn remove_entry(&self, video_id: &VideoId, entry: &Arc<SessionEntry<S>>) {
        let mut registry = self.registry.lock();
        if registry
            .get(video_id)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            registry.remove(video_id);
        }
    }

    pub async fn start(
        &self,
        video_id: VideoId,
        skip_langs: BTreeSet<LanguageTag>,
    ) -> ScraperResult<StartOutcome> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(ScraperError::ShuttingDown);
        }

        // 確認と挿入はロックの中で一度に行う
        let (entry, outputs) = {
            let mut registry = self.registry.lock();
            let active = registry
                .get(&video_id)
                .filter(|existing| !existing.session.state().is_terminal())
                .cloned();
            match active {
                Some(existing) => (existing, None),
                None => {
                    let (session, outputs) = Session::new(video_id.clone(), skip_langs);
                    let entry = Arc::new(SessionEntry::new(session));
                    registry.insert(video_id.clone(), Arc::clone(&entry));
                    (entry, Some(outputs))
                }
            }
        };

        let Some(outputs) = outputs else {
            // 他の呼び出しが開始処理中なら結果を待って同じものを返す
            let status = entry
                .session
                .wait_until_started(self.config.start_wait())
                .await?;
            if let Some(error) = status.start_error {
                return Err(error);
            }
            tracing::debug!(video_id = %video_id, "♻️ Scraper already running");
            return Ok(StartOutcome::AlreadyRunning(Arc::clone(&entry.session)));
        };

        let pending = PendingStart {
            orchestrator: self,
            entry: Arc::clone(&entry),
            armed: true,
        };
        let handle = match self.pool.acquire(self.config.acquire_timeout()).await {
            Ok(handle) => handle,
            Err(error) => {
                tracing::warn!(video_id = %video_id, "⚠️ Could not start scraper: {}", error);
                pending.disarm();
                entry.session.fail_start(error.clone());
                self.remove_entry(&video_id, &entry);
                return Err(error);
            }
        };

        let started_at = Utc::now();
        let aggregator = StatsAggregator::new(
            self.aggregator_config.clone(),
            entry.session.skip_langs().clone(),
            started_at,
        );
        let pipeline = IngestionPipeline::new(
            Arc::clone(&self.source),
            handle.shared_resource(),
            video_id.clone(),
            self.analyzers.clone(),
            aggregator,
            self.pipeline_config.clone(),
            outputs,
        );
        *entry.resource.lock() = Some(handle);

        // タスクが即座に終わっても遷移できるよう、先に RUNNING にする
        entry.session.mark_running();
        pending.disarm();
        let session_run = run_session(
            pipeline,
            Arc::clone(&entry.session),
            Arc::clone(&entry.resource),
            self.pool.clone(),
            entry.cancel.clone(),
        );
        let evict_on_finish = self.config.retention_secs == 0;
        let this = self.this.clone();
        let finished_entry = Arc::clone(&entry);
        let task = tokio::spawn(async move {
            session_run.await;
            if evict_on_finish {
                if let Some(orchestrator) = this.upgrade() {
                    orchestrator.remove_entry(finished_entry.session.video_id(), &finished_entry);
                }
            }
        });
        *entry.task.lock() = Some(task);

        tracing::info!(
            video_id = %video_id,
            session_id = %entry.session.session_id(),
            "🎬 Scraper started"
        );
        Ok(StartOutcome::Started(Arc::clone(&entry.session)))
    }

    pub async fn stop(&self, video_id: &VideoId) -> StopOutcome {
        let entry = self.registry.lock().get(video_id).cloned();
        let Some(entry) = entry else {
            return StopOutcome::NotFound;
        };

        if entry.session.state() == SessionState::Created {
            // 開始処理の結果を待つ。始まらなかったものは存在しない扱い
            match entry.session.wait_until_started(self.config.start_wait()).await {
                Ok(status) if status.start_error.is_none() => {}
                _ => return StopOutcome::NotFound,
            }
        }

        let state = entry.session.state();
        if state.is_terminal() {
            return StopOutcome::AlreadyFinished(state);
        }

        tracing::info!(video_id = %video_id, "🛑 Stopping scraper");
        entry.cancel.cancel();

        let grace = self.config.stop_grace();
        let task = entry.task.lock().take();
        let finished = match task {
            Some(mut task) => match tokio::time::timeout(grace, &mut task).await {
                Ok(_) => true,
                Err(_) => {
                    task.abort();
                    false
                }
            },
            // 別の停止要求がタスクを待っている
            None => entry.session.wait_terminal(grace).await.is_some(),
        };

        if !finished {
            tracing::warn!(
                video_id = %video_id,
                "⏱️ Pipeline did not stop within {:?}, aborting",
                grace
            );
            let handle = entry.resource.lock().take();
            if let Some(handle) = handle {
                self.pool.release(handle, false).await;
            }
            entry.session.finish(SessionState::Stopped, STOPPED_BY_USER);
        }

        if self.config.retention_secs == 0 {
            self.remove_entry(video_id, &entry);
        }

        match entry.session.state() {
            SessionState::Stopped => StopOutcome::Stopped,
            other => StopOutcome::AlreadyFinished(other),
        }
    }

    pub fn query(&self, video_id: &VideoId) -> ScraperResult<SessionStatistics> {
        self.registry
            .lock()
            .get(video_id)
            .map(|entry| entry.session.statistics())
            .ok_or_else(|| ScraperError::NotFound(video_id.to_string()))
    }

    pub fn session(&self, video_id: &VideoId) -> Option<Arc<Session>> {
        self.registry
            .lock()
            .get(video_id)
            .map(|entry| Arc::clone(&entry.session))
    }

    /// 全セッションの一覧（FAILED は末尾、平均スループット・総メッセージ数の降順）
    pub fn list(&self) -> Vec<SessionView> {
        let sessions: Vec<Arc<Session>> = self
            .registry
            .lock()
            .values()
            .map(|entry| Arc::clone(&entry.session))
            .collect();

        let mut views: Vec<SessionView> = sessions.iter().map(|s| s.view()).collect();
        views.sort_by(|a, b| {
            let a_failed = a.state == SessionState::Failed;
            let b_failed = b.state == SessionState::Failed;
            a_failed
                .cmp(&b_failed)
                .then_with(|| b.average_throughput.total_cmp(&a.average_throughput))
                .then_with(|| b.total_messages.cmp(&a.total_messages))
        });
        views
    }

    pub fn running_count(&self) -> usize {
        self.registry
            .lock()
            .values()
            .filter(|entry| entry.session.state() == SessionState::Running)
            .count()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// すべてのセッションを停止し、プールを閉じる
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("🔌 Shutting down scraper orchestrator");
        self.sweeper_cancel.cancel();

        let active: Vec<VideoId> = self
            .registry
            .lock()
            .iter()
            .filter(|(_, entry)| !entry.session.state().is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        let outcomes = join_all(active.iter().map(|id| self.stop(id))).await;
        let stopped = outcomes
            .iter()
            .filter(|o| **o == StopOutcome::Stopped)
            .count();

        self.pool.drain().await;
        tracing::info!("✅ Shutdown complete ({} scrapers stopped)", stopped);
    }
}

impl<S: ChatEventSource> Drop for SessionOrchestrator<S> {
    fn drop(&mut self) {
        self.sweeper_cancel.cancel();
    }
}

/// 1セッション分のパイプラインを実行し、終了後にリソースを返却する
async fn run_session<S: ChatEventSource>(
    pipeline: IngestionPipeline<S>,
    session: Arc<Session>,
    slot: ResourceSlot<S>,
    pool: ResourcePool<S>,
    cancel: CancellationToken,
) {
    let outcome = pipeline.run(cancel).await;

    let handle = slot.lock().take();
    if let Some(handle) = handle {
        // 停止側の abort で返却が途中で切れないよう別タスクで行う
        let healthy = outcome.resource_healthy();
        let release = tokio::spawn(async move { pool.release(handle, healthy).await });
        if let Err(e) = release.await {
            tracing::warn!(video_id = %session.video_id(), "⚠️ Resource release task failed: {}", e);
        }
    }

    match outcome {
        PipelineOutcome::Stopped => session.finish(SessionState::Stopped, STOPPED_BY_USER),
        PipelineOutcome::Completed { reason } => session.finish(SessionState::Completed, reason),
        PipelineOutcome::Failed { reason } => session.finish(SessionState::Failed, reason),
    };
}

#[async_trait]
impl<S: ChatEventSource> ScraperService for SessionOrchestrator<S> {
    async fn start(
        &self,
        video_id: VideoId,
        skip_langs: BTreeSet<LanguageTag>,
    ) -> ScraperResult<StartOutcome> {
        SessionOrchestrator::start(self, video_id, skip_langs).await
    }

    async fn stop(&self, video_id: &VideoId) -> StopOutcome {
        SessionOrchestrator::stop(self, video_id).await
    }

    fn statistics(&self, video_id: &VideoId) -> ScraperResult<SessionStatistics> {
        self.query(video_id)
    }

    fn list(&self) -> Vec<SessionView> {
        SessionOrchestrator::list(self)
    }

    fn running_count(&self) -> usize {
        SessionOrchestrator::running_count(self)
    }

    fn pool_stats(&self) -> PoolStats {
        SessionOrchestrator::pool_stats(self)
    }
}
