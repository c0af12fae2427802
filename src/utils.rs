//! ログ初期化と小物ユーティリティ

use anyhow::{Context, Result};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{ConfigManager, LogConfig};

/// ログを初期化する
///
/// RUST_LOG が設定されていればそれを優先し、なければ設定ファイルのレベルを使う。
/// ファイル出力が有効な場合は日次ローテーションのファイルにも書き出し、
/// 書き込みスレッドのガードを返す（main が保持すること）。
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("Invalid log level")?;

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    if !config.enable_file_logging {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()?;
        return Ok(None);
    }

    let log_dir = config
        .log_dir
        .clone()
        .or_else(ConfigManager::default_log_dir)
        .context("Failed to determine log directory")?;
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let removed = cleanup_old_logs(&log_dir, &config.log_file_prefix, config.max_log_files)?;

    let appender =
        tracing_appender::rolling::daily(&log_dir, format!("{}.log", config.log_file_prefix));
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!("📝 File logging enabled: {}", log_dir.display());
    if removed > 0 {
        tracing::info!("🧹 Removed {} old log files", removed);
    }
    Ok(Some(guard))
}

/// 古いログファイルを削除し、新しい順に `keep` 件だけ残す
pub fn cleanup_old_logs(log_dir: &Path, prefix: &str, keep: usize) -> Result<usize> {
    let pattern = log_dir.join(format!("{}.log*", prefix));
    let pattern = pattern.to_string_lossy();

    let mut files: Vec<_> = glob::glob(&pattern)
        .context("Invalid log file pattern")?
        .filter_map(|entry| entry.ok())
        .collect();
    if files.len() <= keep {
        return Ok(0);
    }

    // 日付サフィックス付きのファイル名なので辞書順が時系列順
    files.sort();
    let excess = files.len() - keep;
    let mut removed = 0;
    for path in files.into_iter().take(excess) {
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("Failed to remove old log file {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}

/// ビデオIDをURLから抽出
///
/// `watch?v=ID`, `youtu.be/ID`, `/live/ID`, `/embed/ID`, `/shorts/ID` に対応。
pub fn extract_video_id(url: &str) -> Option<String> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"[?&]v=([A-Za-z0-9_-]+)",
            r"youtu\.be/([A-Za-z0-9_-]+)",
            r"youtube\.com/(?:live|embed|shorts)/([A-Za-z0-9_-]+)",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    });

    patterns
        .iter()
        .find_map(|re| re.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
