//! 固定容量のランキング構造
//!
//! K は小さい（数十〜数百）ので、スコア降順に並べた配列で保持し O(K) で更新する。
//! 同点の場合は先に登場したキーが上位に来る。
//!
//! ランキング外のキーも累計は数え続けるので、一度あふれたキーでも累計が
//! 最下位を上回った時点で入れ替わる。

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
struct Entry<K> {
    key: K,
    score: u64,
    /// 初登場順
    seq: u64,
}

/// キーごとの累計
#[derive(Debug, Clone, Copy)]
struct Total {
    score: u64,
    seq: u64,
}

/// 上位K件だけを保持するランキング
#[derive(Debug, Clone)]
pub struct Leaderboard<K> {
    capacity: usize,
    /// スコア降順、同点は seq 昇順
    entries: Vec<Entry<K>>,
    /// ランキング外も含めた全キーの累計
    totals: HashMap<K, Total>,
    next_seq: u64,
}

impl<K: Eq + Hash + Clone> Leaderboard<K> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
            totals: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// 現在の最下位スコア
    pub fn min_score(&self) -> Option<u64> {
        self.entries.last().map(|e| e.score)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<u64>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        self.entries
            .iter()
            .find(|e| e.key.borrow() == key)
            .map(|e| e.score)
    }

    /// ランキング外も含めた累計スコア
    pub fn total<Q>(&self, key: &Q) -> Option<u64>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.totals.get(key).map(|t| t.score)
    }

    /// スコアを加算する
    ///
    /// ランキング外のキーは加算後の累計で `offer` と同じ規則の挿入を試みる。
    /// 保持されていれば true を返す。
    pub fn increment<Q>(&mut self, key: &Q, delta: u64) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        let total = match self.totals.get_mut(key) {
            Some(total) => {
                total.score += delta;
                *total
            }
            None => {
                let total = Total {
                    score: delta,
                    seq: self.next_seq,
                };
                self.next_seq += 1;
                self.totals.insert(key.to_owned(), total);
                total
            }
        };

        match self.entries.iter().position(|e| e.key.borrow() == key) {
            Some(mut index) => {
                self.entries[index].score = total.score;
                while index > 0 && self.ranks_above(index, index - 1) {
                    self.entries.swap(index - 1, index);
                    index -= 1;
                }
                true
            }
            None => self.offer(key.to_owned(), total),
        }
    }

    /// ランキング外のキーを累計スコアで挿入する
    ///
    /// 満杯の場合は最下位より厳密に大きいときだけ最下位を追い出して挿入する。
    /// 最下位以下のスコアは何もしない。
    fn offer(&mut self, key: K, total: Total) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if self.is_full() {
            match self.min_score() {
                Some(min) if total.score > min => {
                    self.entries.pop();
                }
                _ => return false,
            }
        }

        let index = self.entries.partition_point(|e| {
            e.score > total.score || (e.score == total.score && e.seq < total.seq)
        });
        self.entries.insert(
            index,
            Entry {
                key,
                score: total.score,
                seq: total.seq,
            },
        );
        true
    }

    /// entries[a] が entries[b] より上位か（同点なら先に登場した方が上位）
    fn ranks_above(&self, a: usize, b: usize) -> bool {
        let (a, b) = (&self.entries[a], &self.entries[b]);
        a.score > b.score || (a.score == b.score && a.seq < b.seq)
    }

    /// 上位 n 件を (キー, スコア) で返す
    pub fn top(&self, n: usize) -> Vec<(K, u64)> {
        self.entries
            .iter()
            .take(n)
            .map(|e| (e.key.clone(), e.score))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, u64)> {
        self.entries.iter().map(|e| (&e.key, e.score))
    }

    #[cfg(test)]
    fn is_sorted(&self) -> bool {
        self.entries.windows(2).all(|w| {
            w[0].score > w[1].score || (w[0].score == w[1].score && w[0].seq < w[1].seq)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(board: &Leaderboard<String>) -> Vec<String> {
        board.iter().map(|(k, _)| k.clone()).collect()
    }

    #[test]
    fn test_increment_orders_by_score() {
        let mut board: Leaderboard<String> = Leaderboard::new(5);
        board.increment("a", 1);
        board.increment("b", 1);
        board.increment("b", 1);
        board.increment("c", 3);

        assert_eq!(keys(&board), vec!["c", "b", "a"]);
        assert_eq!(board.get("b"), Some(2));
        assert!(board.is_sorted());
    }

    #[test]
    fn test_first_seen_tie_break() {
        let mut board: Leaderboard<String> = Leaderboard::new(5);
        board.increment("first", 1);
        board.increment("second", 1);
        board.increment("third", 1);
        board.increment("third", 1);
        assert_eq!(keys(&board), vec!["third", "first", "second"]);

        // 同点に追いつけば先に登場した方が上位
        board.increment("first", 1);
        assert_eq!(keys(&board), vec!["first", "third", "second"]);
        assert!(board.is_sorted());
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut board: Leaderboard<String> = Leaderboard::new(3);
        for i in 0..50u64 {
            board.increment(format!("key{}", i).as_str(), i % 7 + 1);
            assert!(board.len() <= 3);
        }
        assert_eq!(board.len(), 3);
        assert!(board.is_sorted());
    }

    #[test]
    fn test_below_minimum_when_full_is_noop() {
        let mut board: Leaderboard<String> = Leaderboard::new(2);
        board.increment("a", 5);
        board.increment("b", 3);

        assert!(!board.increment("c", 2));
        assert_eq!(keys(&board), vec!["a", "b"]);

        // 最下位と同点でも既存（先着）が残る
        assert!(!board.increment("d", 3));
        assert_eq!(keys(&board), vec!["a", "b"]);
    }

    #[test]
    fn test_above_minimum_evicts_lowest() {
        let mut board: Leaderboard<String> = Leaderboard::new(2);
        board.increment("a", 5);
        board.increment("b", 3);

        assert!(board.increment("c", 4));
        assert_eq!(keys(&board), vec!["a", "c"]);
        assert_eq!(board.get("b"), None);
    }

    #[test]
    fn test_late_heavy_hitter_enters_full_board() {
        let mut board: Leaderboard<String> = Leaderboard::new(3);
        for key in ["early0", "early1", "early2", "early3"] {
            board.increment(key, 1);
        }
        assert_eq!(keys(&board), vec!["early0", "early1", "early2"]);

        // 1回目は最下位と同点なので入れない
        assert!(!board.increment("trending", 1));
        assert_eq!(board.total("trending"), Some(1));

        // 累計が最下位を上回れば入れ替わる
        assert!(board.increment("trending", 1));
        assert_eq!(keys(&board), vec!["trending", "early0", "early1"]);
        assert_eq!(board.get("trending"), Some(2));

        for _ in 0..10 {
            board.increment("trending", 1);
        }
        assert_eq!(board.top(1), vec![("trending".to_string(), 12)]);
        assert!(board.is_sorted());
    }

    #[test]
    fn test_evicted_key_keeps_its_total() {
        let mut board: Leaderboard<String> = Leaderboard::new(2);
        board.increment("a", 3);
        board.increment("b", 2);
        board.increment("c", 5);
        assert_eq!(board.get("b"), None);
        assert_eq!(board.total("b"), Some(2));

        // 戻ってきたキーは追い出される前の累計から数える
        assert!(board.increment("b", 2));
        assert_eq!(keys(&board), vec!["c", "b"]);
        assert_eq!(board.get("b"), Some(4));
    }

    #[test]
    fn test_returning_key_keeps_first_seen_order() {
        let mut board: Leaderboard<String> = Leaderboard::new(2);
        board.increment("old", 1);
        board.increment("mid", 2);
        board.increment("new", 3);
        assert_eq!(keys(&board), vec!["new", "mid"]);

        // 累計 3 で戻った old は、同点の new より先に登場しているので上位
        assert!(board.increment("old", 2));
        assert_eq!(keys(&board), vec!["old", "new"]);
        assert_eq!(board.get("mid"), None);
        assert_eq!(board.total("mid"), Some(2));
        assert!(board.is_sorted());
    }

    #[test]
    fn test_top_n() {
        let mut board: Leaderboard<String> = Leaderboard::new(10);
        for (key, score) in [("x", 1), ("y", 5), ("z", 3)] {
            board.increment(key, score);
        }
        assert_eq!(
            board.top(2),
            vec![("y".to_string(), 5), ("z".to_string(), 3)]
        );
        assert_eq!(board.top(100).len(), 3);
    }

    #[test]
    fn test_zero_capacity() {
        let mut board: Leaderboard<String> = Leaderboard::new(0);
        assert!(!board.increment("a", 1));
        assert!(board.is_empty());
    }
}
