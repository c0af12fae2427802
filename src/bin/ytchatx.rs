//! ytchatx サーバー
//!
//! 設定を読み込み、チャットソースとセッション管理を組み立てて HTTP API を起動する。
//! Ctrl+C で全セッションを止め、リソースを片付けてから終了する。

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use ytchatx::api::{start_api_server, AppState};
use ytchatx::config::ConfigManager;
use ytchatx::scraper::{Analyzers, SessionOrchestrator, SimulatedChatSource};

/// YouTube ライブチャット収集サーバー
#[derive(Parser, Debug)]
#[command(name = "ytchatx")]
#[command(about = "YouTube live chat scrape session server", long_about = None)]
#[command(version)]
struct Cli {
    /// 設定ファイルのパス（省略時はXDG設定ディレクトリ）
    #[arg(short, long, env = "YTCHATX_CONFIG")]
    config: Option<PathBuf>,

    /// 待ち受けアドレス（設定ファイルより優先）
    #[arg(short, long, env = "YTCHATX_BIND")]
    bind: Option<String>,

    /// 同時に動かせるセッション数の上限
    #[arg(long)]
    max_sessions: Option<usize>,

    /// ログレベル（RUST_LOG が優先される）
    #[arg(long, env = "YTCHATX_LOG_LEVEL")]
    log_level: Option<String>,

    /// デフォルト設定を書き出して終了する
    #[arg(long)]
    write_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };

    if cli.write_default_config {
        config_manager.save_config(&Default::default())?;
        println!(
            "💾 Default configuration written to {}",
            config_manager.config_path().display()
        );
        return Ok(());
    }

    let mut config = config_manager.load_config()?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(max_sessions) = cli.max_sessions {
        config.pool.max_size = max_sessions;
        config.pool.min_idle = config.pool.min_idle.min(max_sessions);
    }
    if let Some(level) = cli.log_level {
        config.log.log_level = level;
    }

    // tokio-consoleの初期化（プロファイリング用）
    #[cfg(feature = "debug-tokio")]
    console_subscriber::init();

    // ファイル出力のガードは終了まで保持する
    #[cfg(not(feature = "debug-tokio"))]
    let _log_guard = ytchatx::utils::init_logging(&config.log)?;

    tracing::info!("🎬 Starting ytchatx - YouTube Live Chat scrape server");
    tracing::debug!("Configuration: {:?}", config);

    let analyzers =
        Analyzers::from_config(&config.analysis).context("Failed to prepare text analyzers")?;
    let source = Arc::new(SimulatedChatSource::new(config.simulation.clone()));
    let orchestrator = SessionOrchestrator::new(source, &config, analyzers);

    let warmed = orchestrator.pool().warm_up().await;
    tracing::info!(
        "🔥 Resource pool ready: {} idle / max {}",
        warmed,
        config.pool.max_size
    );

    let server = start_api_server(&config.server.bind, AppState::new(orchestrator.clone())).await?;
    tracing::info!("🚀 Listening on http://{}", server.local_addr());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("🛑 Shutdown requested");

    server.shutdown().await;
    orchestrator.shutdown().await;

    tracing::info!("👋 ytchatx stopped");
    Ok(())
}
