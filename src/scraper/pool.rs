//! 高コストな自動化リソース（ブラウザなど）のプール
//!
//! 同時に貸し出せる数はセマフォで制限する。tokio のセマフォは FIFO なので
//! 先に待ち始めた取得要求から順に割り当てられる。

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{ScraperError, ScraperResult, TransportError};

/// リソースの生成・検査・破棄を担うファクトリ
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    type Resource: Send + Sync + 'static;

    /// 新しいリソースを生成
    async fn create(&self) -> Result<Self::Resource, TransportError>;

    /// 再利用前の健全性チェック
    async fn validate(&self, resource: &Self::Resource) -> bool;

    /// リソースを破棄
    async fn destroy(&self, resource: &Self::Resource);
}

/// プール設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// 同時に貸し出せる最大数（＝同時セッション数の上限）
    pub max_size: usize,
    /// 起動時・破棄後に確保しておく待機リソース数
    pub min_idle: usize,
    /// この時間以上使われていない待機リソースは破棄する（秒）
    pub idle_timeout_secs: u64,
    /// 不健全で破棄したときにバックグラウンドで補充する
    pub replace_discarded: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 5,
            min_idle: 2,
            idle_timeout_secs: 600,
            replace_discarded: true,
        }
    }
}

/// プールの統計情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub max_size: usize,
    pub in_use: usize,
    pub idle: usize,
    pub created_total: u64,
    pub discarded_total: u64,
    pub acquired_total: u64,
}

struct IdleResource<R> {
    id: u64,
    resource: Arc<R>,
    idle_since: Instant,
}

struct PoolShared<F: ResourceFactory> {
    factory: Arc<F>,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleResource<F::Resource>>>,
    next_id: AtomicU64,
    created: AtomicU64,
    discarded: AtomicU64,
    acquired: AtomicU64,
}

impl<F: ResourceFactory> PoolShared<F> {
    fn in_use(&self) -> usize {
        self.config
            .max_size
            .saturating_sub(self.semaphore.available_permits())
    }

    async fn create(&self) -> Result<(u64, Arc<F::Resource>), TransportError> {
        let resource = self.factory.create().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(resource_id = id, "🧱 Created pooled resource");
        Ok((id, Arc::new(resource)))
    }

    async fn discard(&self, id: u64, resource: &F::Resource) {
        self.factory.destroy(resource).await;
        self.discarded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(resource_id = id, "🗑️ Discarded pooled resource");
    }

    /// 待機リソースを min_idle まで補充
    ///
    /// 生成中は許可を1つ確保しておき、同時に走る `acquire` の生成と合わせても
    /// 総数が上限を超えないようにする。空きがなければ補充しない。
    async fn replenish(self: Arc<Self>) -> usize {
        let mut added = 0;
        while self.idle.lock().len() < self.config.min_idle {
            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                break;
            };
            // 確保した許可の分も含めて上限以内か
            if self.in_use() + self.idle.lock().len() > self.config.max_size {
                break;
            }
            match self.create().await {
                Ok((id, resource)) => {
                    self.idle.lock().push_back(IdleResource {
                        id,
                        resource,
                        idle_since: Instant::now(),
                    });
                    drop(permit);
                    added += 1;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Failed to create idle resource: {}", e);
                    break;
                }
            }
        }
        added
    }
}

/// 貸し出し中のリソース
///
/// `ResourcePool::release` に渡すと所有権ごと消費されるので、二重返却は
/// 型の上で起こらない。返却せずに drop された場合は破棄扱いになる。
pub struct PooledResource<F: ResourceFactory> {
    id: u64,
    resource: Arc<F::Resource>,
    released: bool,
    shared: Arc<PoolShared<F>>,
    _permit: OwnedSemaphorePermit,
}

impl<F: ResourceFactory> PooledResource<F> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 別タスクから使うための共有参照
    pub fn shared_resource(&self) -> Arc<F::Resource> {
        Arc::clone(&self.resource)
    }
}

impl<F: ResourceFactory> Deref for PooledResource<F> {
    type Target = F::Resource;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

impl<F: ResourceFactory> std::fmt::Debug for PooledResource<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledResource")
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}

impl<F: ResourceFactory> Drop for PooledResource<F> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!(
            resource_id = self.id,
            "⚠️ Pooled resource dropped without release, discarding"
        );
        self.shared.discarded.fetch_add(1, Ordering::Relaxed);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let factory = Arc::clone(&self.shared.factory);
            let resource = Arc::clone(&self.resource);
            handle.spawn(async move {
                factory.destroy(&resource).await;
            });
        }
    }
}

/// リソースプール
pub struct ResourcePool<F: ResourceFactory> {
    shared: Arc<PoolShared<F>>,
}

impl<F: ResourceFactory> Clone for ResourcePool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: ResourceFactory> ResourcePool<F> {
    pub fn new(factory: Arc<F>, config: PoolConfig) -> Self {
        let max_size = config.max_size.max(1);
        Self {
            shared: Arc::new(PoolShared {
                factory,
                semaphore: Arc::new(Semaphore::new(max_size)),
                config: PoolConfig { max_size, ..config },
                idle: Mutex::new(VecDeque::new()),
                next_id: AtomicU64::new(1),
                created: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
                acquired: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// min_idle まで待機リソースを事前生成
    pub async fn warm_up(&self) -> usize {
        let added = Arc::clone(&self.shared).replenish().await;
        if added > 0 {
            tracing::info!("🔥 Pool warmed up with {} idle resources", added);
        }
        added
    }

    /// リソースを借りる
    ///
    /// `timeout` 以内に空きができなければ `ResourceExhausted`。待機リソースは
    /// 健全性を確認してから渡し、不健全なら破棄して次を試す。待機リソースが
    /// なければ新規に生成し、生成に失敗したら `PoolFailure`。
    pub async fn acquire(&self, timeout: Duration) -> ScraperResult<PooledResource<F>> {
        let semaphore = Arc::clone(&self.shared.semaphore);
        let permit = match tokio::time::timeout(timeout, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ScraperError::ShuttingDown),
            Err(_) => {
                tracing::warn!(
                    "⏳ Resource pool exhausted after {:?} (in use: {})",
                    timeout,
                    self.shared.in_use()
                );
                return Err(ScraperError::ResourceExhausted { waited: timeout });
            }
        };

        loop {
            // 直近に返却されたもの（温まっているもの）から使う
            let candidate = self.shared.idle.lock().pop_back();
            let Some(idle) = candidate else { break };

            if self.shared.factory.validate(&idle.resource).await {
                self.shared.acquired.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(resource_id = idle.id, "♻️ Reusing pooled resource");
                return Ok(self.lease(idle.id, idle.resource, permit));
            }
            tracing::info!(
                resource_id = idle.id,
                "🩺 Idle resource failed validation, discarding"
            );
            self.shared.discard(idle.id, &idle.resource).await;
        }

        match self.shared.create().await {
            Ok((id, resource)) => {
                self.shared.acquired.fetch_add(1, Ordering::Relaxed);
                Ok(self.lease(id, resource, permit))
            }
            Err(e) => {
                tracing::error!("❌ Failed to create pooled resource: {}", e);
                Err(ScraperError::PoolFailure(e.to_string()))
            }
        }
    }

    fn lease(
        &self,
        id: u64,
        resource: Arc<F::Resource>,
        permit: OwnedSemaphorePermit,
    ) -> PooledResource<F> {
        PooledResource {
            id,
            resource,
            released: false,
            shared: Arc::clone(&self.shared),
            _permit: permit,
        }
    }

    /// リソースを返却する
    ///
    /// 健全なら待機リストへ戻し、不健全なら破棄する（設定により補充も行う）。
    pub async fn release(&self, mut handle: PooledResource<F>, healthy: bool) {
        handle.released = true;
        let id = handle.id;
        let resource = Arc::clone(&handle.resource);

        if healthy && !self.shared.semaphore.is_closed() {
            self.shared.idle.lock().push_back(IdleResource {
                id,
                resource,
                idle_since: Instant::now(),
            });
            drop(handle);
            tracing::debug!(resource_id = id, "📥 Resource returned to pool");
            return;
        }

        // 破棄が終わるまで許可を保持し、総数が上限を超えないようにする
        self.shared.discard(id, &resource).await;
        drop(handle);

        if self.shared.config.replace_discarded && !self.shared.semaphore.is_closed() {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                shared.replenish().await;
            });
        }
    }

    /// 長時間使われていない待機リソースを破棄（min_idle は残す）
    pub async fn evict_idle(&self) -> usize {
        let timeout = Duration::from_secs(self.shared.config.idle_timeout_secs);
        let expired: Vec<IdleResource<F::Resource>> = {
            let mut idle = self.shared.idle.lock();
            let mut expired = Vec::new();
            while idle.len() > self.shared.config.min_idle
                && idle.front().is_some_and(|r| r.idle_since.elapsed() >= timeout)
            {
                if let Some(resource) = idle.pop_front() {
                    expired.push(resource);
                }
            }
            expired
        };

        for idle in &expired {
            self.shared.discard(idle.id, &idle.resource).await;
        }
        if !expired.is_empty() {
            tracing::info!("🧹 Evicted {} idle resources", expired.len());
        }
        expired.len()
    }

    /// 新規の貸し出しを止め、待機リソースをすべて破棄する
    pub async fn drain(&self) {
        self.shared.semaphore.close();
        let idle: Vec<_> = self.shared.idle.lock().drain(..).collect();
        for resource in &idle {
            self.shared.discard(resource.id, &resource.resource).await;
        }
        tracing::info!("🔌 Resource pool drained ({} idle resources closed)", idle.len());
    }

    pub fn in_use(&self) -> usize {
        self.shared.in_use()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_size: self.shared.config.max_size,
            in_use: self.shared.in_use(),
            idle: self.shared.idle.lock().len(),
            created_total: self.shared.created.load(Ordering::Relaxed),
            discarded_total: self.shared.discarded.load(Ordering::Relaxed),
            acquired_total: self.shared.acquired.load(Ordering::Relaxed),
        }
    }
}
