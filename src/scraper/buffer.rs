//! 受信タスクと集計タスクの間の有界バッファ
//!
//! 受信側は決して待たない。容量を超えたら最も古いイベントを捨てて
//! 破棄カウンタを増やす。終了通知（`close`）は捨てられない。

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

#[derive(Debug)]
struct Inner<T, C> {
    queue: VecDeque<T>,
    closed: Option<C>,
}

/// 取り出し結果
#[derive(Debug)]
pub struct Drained<T, C> {
    pub items: Vec<T>,
    /// キューが空になり、かつ閉じられていれば終了理由
    pub closed: Option<C>,
}

/// 古いものから捨てる有界キュー
#[derive(Debug)]
pub struct PendingEvents<T, C> {
    inner: Mutex<Inner<T, C>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    total: AtomicU64,
}

impl<T, C: Clone> PendingEvents<T, C> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity.min(4096)),
                closed: None,
            }),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    /// イベントを追加（溢れたら最も古いものを捨てる）
    ///
    /// 閉じた後のイベントは無視する。捨てたイベントがあれば true。
    pub fn push(&self, item: T) -> bool {
        let dropped = {
            let mut inner = self.inner.lock();
            if inner.closed.is_some() {
                return false;
            }
            let dropped = if inner.queue.len() >= self.capacity {
                inner.queue.pop_front();
                true
            } else {
                false
            };
            inner.queue.push_back(item);
            dropped
        };

        self.total.fetch_add(1, Ordering::Relaxed);
        if dropped {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        dropped
    }

    /// 入力の終了を通知（最初の理由だけが残る）
    pub fn close(&self, outcome: C) {
        {
            let mut inner = self.inner.lock();
            if inner.closed.is_none() {
                inner.closed = Some(outcome);
            }
        }
        self.notify.notify_one();
    }

    /// 最大 `max` 件を取り出す
    pub fn drain(&self, max: usize) -> Drained<T, C> {
        let mut inner = self.inner.lock();
        let n = inner.queue.len().min(max);
        let items: Vec<T> = inner.queue.drain(..n).collect();
        let closed = if inner.queue.is_empty() {
            inner.closed.clone()
        } else {
            None
        };
        Drained { items, closed }
    }

    /// 新しいイベントか終了通知を待つ
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}
