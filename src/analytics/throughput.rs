//! 固定幅の時間バケットによるスループット計測

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// 1バケット分のメッセージ数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughputBucket {
    /// バケットの開始時刻（バケット幅で切り下げ済み）
    pub interval_start: DateTime<Utc>,
    pub count: u64,
}

/// 直近のバケット履歴
///
/// 現在のバケットは集計中として履歴とは別に持ち、壁時計がバケット境界を
/// 越えた時点で履歴に移す。メッセージがなかった区間は 0 件のバケットになる。
#[derive(Debug, Clone)]
pub struct ThroughputBuckets {
    width_secs: i64,
    capacity: usize,
    current: Option<ThroughputBucket>,
    closed: VecDeque<ThroughputBucket>,
}

impl ThroughputBuckets {
    pub fn new(width_secs: u64, capacity: usize) -> Self {
        Self {
            width_secs: width_secs.max(1) as i64,
            capacity,
            current: None,
            closed: VecDeque::with_capacity(capacity),
        }
    }

    fn align(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = now.timestamp();
        let start = secs - secs.rem_euclid(self.width_secs);
        DateTime::from_timestamp(start, 0).unwrap_or(now)
    }

    fn width(&self) -> TimeDelta {
        TimeDelta::seconds(self.width_secs)
    }

    fn push_closed(&mut self, bucket: ThroughputBucket) {
        if self.capacity == 0 {
            return;
        }
        if self.closed.len() >= self.capacity {
            self.closed.pop_front();
        }
        self.closed.push_back(bucket);
    }

    /// 現在時刻までバケットを進める
    pub fn advance(&mut self, now: DateTime<Utc>) {
        let aligned = self.align(now);
        let current_start = match &self.current {
            None => {
                self.current = Some(ThroughputBucket {
                    interval_start: aligned,
                    count: 0,
                });
                return;
            }
            Some(bucket) => bucket.interval_start,
        };
        // 同じバケット内、または時計の巻き戻り
        if aligned <= current_start {
            return;
        }

        let elapsed = (aligned - current_start).num_seconds() / self.width_secs;
        if let Some(finished) = self.current.replace(ThroughputBucket {
            interval_start: aligned,
            count: 0,
        }) {
            self.push_closed(finished);
        }

        // 空白区間は履歴に残る分だけ 0 件バケットで埋める
        let first_gap = (elapsed - self.capacity as i64).max(1);
        for k in first_gap..elapsed {
            let interval_start = current_start + self.width() * k as i32;
            self.push_closed(ThroughputBucket {
                interval_start,
                count: 0,
            });
        }
    }

    /// メッセージ1件を記録
    pub fn record(&mut self, now: DateTime<Utc>) {
        self.advance(now);
        if let Some(bucket) = self.current.as_mut() {
            bucket.count += 1;
        }
    }

    fn per_minute(&self, count: u64) -> f64 {
        count as f64 * 60.0 / self.width_secs as f64
    }

    /// 直近に閉じたバケットの件数（件/分）
    pub fn last_throughput(&self) -> f64 {
        self.closed
            .back()
            .map(|b| self.per_minute(b.count))
            .unwrap_or(0.0)
    }

    /// 保持中の閉じたバケットの最大値（件/分）
    pub fn max_throughput(&self) -> f64 {
        self.closed
            .iter()
            .map(|b| b.count)
            .max()
            .map(|c| self.per_minute(c))
            .unwrap_or(0.0)
    }

    /// 保持中の閉じたバケットの平均（件/分）
    pub fn average_throughput(&self) -> f64 {
        if self.closed.is_empty() {
            return 0.0;
        }
        let total: u64 = self.closed.iter().map(|b| b.count).sum();
        self.per_minute(total) / self.closed.len() as f64
    }

    /// 閉じたバケット（古い順）
    pub fn closed(&self) -> impl Iterator<Item = &ThroughputBucket> {
        self.closed.iter()
    }

    /// 閉じたバケット＋集計中のバケット（古い順）
    pub fn history(&self) -> Vec<ThroughputBucket> {
        self.closed
            .iter()
            .chain(self.current.iter())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_040, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + TimeDelta::seconds(secs)
    }

    fn record_n(buckets: &mut ThroughputBuckets, secs: i64, n: usize) {
        for _ in 0..n {
            buckets.record(at(secs));
        }
    }

    #[test]
    fn test_closed_bucket_metrics() {
        let mut buckets = ThroughputBuckets::new(60, 60);
        record_n(&mut buckets, 1, 3);
        record_n(&mut buckets, 61, 5);
        record_n(&mut buckets, 121, 2);
        buckets.advance(at(181));

        let counts: Vec<u64> = buckets.closed().map(|b| b.count).collect();
        assert_eq!(counts, vec![3, 5, 2]);
        assert_eq!(buckets.last_throughput(), 2.0);
        assert_eq!(buckets.max_throughput(), 5.0);
        assert!((buckets.average_throughput() - 3.333).abs() < 0.01);
    }

    #[test]
    fn test_current_bucket_is_not_counted_until_closed() {
        let mut buckets = ThroughputBuckets::new(60, 60);
        record_n(&mut buckets, 1, 10);

        assert_eq!(buckets.last_throughput(), 0.0);
        assert_eq!(buckets.history().len(), 1);
        assert_eq!(buckets.history()[0].count, 10);
    }

    #[test]
    fn test_gaps_become_zero_buckets() {
        let mut buckets = ThroughputBuckets::new(60, 60);
        record_n(&mut buckets, 1, 4);
        record_n(&mut buckets, 181, 1);

        let counts: Vec<u64> = buckets.closed().map(|b| b.count).collect();
        assert_eq!(counts, vec![4, 0, 0]);
        assert_eq!(buckets.last_throughput(), 0.0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut buckets = ThroughputBuckets::new(60, 5);
        for minute in 0..20 {
            record_n(&mut buckets, minute * 60 + 1, 1);
        }
        assert_eq!(buckets.closed().count(), 5);

        // 長い空白でも履歴容量を超えない
        buckets.advance(at(100_000));
        assert_eq!(buckets.closed().count(), 5);
        assert!(buckets.closed().all(|b| b.count == 0));
    }

    #[test]
    fn test_normalization_to_per_minute() {
        let mut buckets = ThroughputBuckets::new(10, 60);
        record_n(&mut buckets, 1, 3);
        buckets.advance(at(11));
        assert_eq!(buckets.last_throughput(), 18.0);
    }
}
