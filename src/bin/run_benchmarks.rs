//! ベンチマーク実行ツール
//!
//! 集計器とリソースプールの処理性能を簡易計測する

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use ytchatx::analytics::{AggregatorConfig, KeywordScorer, LanguageTag, StatsAggregator};
use ytchatx::models::ChatMessage;
use ytchatx::scraper::{PoolConfig, ResourcePool, SimulatedChatSource, SimulationConfig};

const MESSAGE_COUNT: usize = 200_000;
const POOL_ROUNDS: usize = 20_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("🏁 ytchatx ベンチマークツール");
    println!("=========================================");

    let args: Vec<String> = std::env::args().collect();
    let target = args.get(1).map(String::as_str).unwrap_or("all");

    match target {
        "aggregator" => run_aggregator_benchmark(),
        "pool" => run_pool_benchmark().await?,
        "all" => {
            run_aggregator_benchmark();
            println!("\n{}\n", "=".repeat(50));
            run_pool_benchmark().await?;
        }
        _ => {
            println!("使用方法: cargo run --bin run_benchmarks [aggregator|pool|all]");
            std::process::exit(1);
        }
    }

    println!("\n🎉 すべてのベンチマークが完了しました！");
    Ok(())
}

/// 集計器への書き込みとスナップショット作成を計測
fn run_aggregator_benchmark() {
    println!("📊 集計ベンチマーク開始...");

    let scorer = KeywordScorer::new();
    let skip: BTreeSet<LanguageTag> = BTreeSet::new();
    let start_at = Utc::now();
    let mut aggregator = StatsAggregator::new(AggregatorConfig::default(), skip, start_at);

    let words = [
        "stream", "music", "amazing", "hello", "game", "clip", "boss", "chat", "win", "raid",
    ];
    let messages: Vec<ChatMessage> = (0..MESSAGE_COUNT)
        .map(|i| {
            let text = format!(
                "{} {} {}",
                words[i % words.len()],
                words[(i / 3) % words.len()],
                words[(i / 7) % words.len()]
            );
            ChatMessage::new(format!("user{}", i % 500), text)
                .observed_at(start_at + ChronoDuration::milliseconds(i as i64 * 10))
        })
        .collect();

    let started = Instant::now();
    for msg in &messages {
        aggregator.record_message(msg);
        aggregator.record_keywords(&scorer.tokenize(&msg.text));
    }
    let elapsed = started.elapsed();
    println!(
        "  ✅ {} 件を {:.2?} で処理 ({:.0} 件/秒)",
        MESSAGE_COUNT,
        elapsed,
        MESSAGE_COUNT as f64 / elapsed.as_secs_f64()
    );

    let started = Instant::now();
    let mut snapshot = None;
    for _ in 0..1_000 {
        snapshot = Some(aggregator.snapshot(Utc::now()));
    }
    println!("  ✅ スナップショット 1000 回: {:.2?}", started.elapsed());

    if let Some(snapshot) = snapshot {
        println!(
            "  📈 総数 {} / 平均 {:.1} 件/分 / キーワード上位 {} 件",
            snapshot.total_messages,
            snapshot.average_throughput,
            snapshot.top_keywords.len()
        );
    }
}

/// リソースの取得と返却の往復を計測
async fn run_pool_benchmark() -> anyhow::Result<()> {
    println!("🏊 リソースプールベンチマーク開始...");

    let source = Arc::new(SimulatedChatSource::new(SimulationConfig {
        launch_delay_ms: 0,
        ..SimulationConfig::default()
    }));
    let pool = ResourcePool::new(
        source,
        PoolConfig {
            max_size: 4,
            min_idle: 4,
            ..PoolConfig::default()
        },
    );
    let warmed = pool.warm_up().await;
    println!("  🔥 ウォームアップ: {} 個", warmed);

    let started = Instant::now();
    for _ in 0..POOL_ROUNDS {
        let handle = pool.acquire(Duration::from_secs(1)).await?;
        pool.release(handle, true).await;
    }
    let elapsed = started.elapsed();
    println!(
        "  ✅ 取得/返却 {} 回を {:.2?} で処理 (平均 {:.2?})",
        POOL_ROUNDS,
        elapsed,
        elapsed / POOL_ROUNDS as u32
    );

    let stats = pool.stats();
    if stats.created_total > warmed as u64 {
        println!(
            "  ⚠️ 想定外の再生成がありました: created_total={}",
            stats.created_total
        );
    }
    println!(
        "  📊 created={} acquired={} idle={}",
        stats.created_total, stats.acquired_total, stats.idle
    );

    pool.drain().await;
    Ok(())
}
