//! アプリケーション設定管理モジュール
//!
//! XDGディレクトリ（または明示したパス）の TOML ファイルから設定を読み込む。
//! ファイルがなければデフォルト値を使い、各セクションは部分的な指定でもよい。

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::analytics::stats_aggregator::AggregatorConfig;
use crate::scraper::pipeline::PipelineConfig;
use crate::scraper::pool::PoolConfig;
use crate::scraper::simulated::SimulationConfig;

/// HTTPサーバー設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// 待ち受けアドレス
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

/// セッション管理の設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// リソース取得の待ち時間上限（ミリ秒）
    pub acquire_timeout_ms: u64,
    /// 停止時の猶予（ミリ秒）
    pub stop_grace_ms: u64,
    /// 終了したセッションを照会可能なまま残す時間（秒）。0 なら即時削除
    pub retention_secs: u64,
    /// 掃除タスクの実行間隔（秒）
    pub sweep_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 30_000,
            stop_grace_ms: 5_000,
            retention_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

impl OrchestratorConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// 先行する開始処理を待つ上限（取得待ちと生成の分）
    pub fn start_wait(&self) -> Duration {
        self.acquire_timeout() * 2
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// テキスト解析の設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    /// 追加ストップワードファイル（1行1語）
    pub stopword_file: Option<PathBuf>,
    /// この信頼度未満の言語判定は UNKNOWN 扱い
    pub min_language_confidence: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            stopword_file: None,
            min_language_confidence: 0.5,
        }
    }
}

/// ログ設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// カスタムログディレクトリ（Noneの場合はXDGデフォルト使用）
    pub log_dir: Option<PathBuf>,
    /// ログレベル (trace/debug/info/warn/error)。RUST_LOG が優先される
    pub log_level: String,
    /// ファイル出力有効化
    pub enable_file_logging: bool,
    /// 保存するログファイル数上限
    pub max_log_files: usize,
    /// ログファイル名のプレフィックス
    pub log_file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_level: "info".to_string(),
            enable_file_logging: false,
            max_log_files: 30,
            log_file_prefix: "ytchatx".to_string(),
        }
    }
}

/// アプリケーション全体の設定
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub orchestrator: OrchestratorConfig,
    pub pool: PoolConfig,
    pub pipeline: PipelineConfig,
    pub aggregator: AggregatorConfig,
    pub analysis: AnalysisConfig,
    pub simulation: SimulationConfig,
    pub log: LogConfig,
}

/// 設定ファイル管理
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// XDGディレクトリの設定ファイルを使う
    pub fn new() -> Result<Self> {
        Ok(Self {
            config_path: Self::default_config_path()?,
        })
    }

    /// 明示したパスの設定ファイルを使う
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    /// XDGディレクトリに基づく設定ファイルパスを取得
    fn default_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("dev", "sifyfy", "ytchatx")
            .context("Failed to get project directories")?;

        let config_file = project_dirs.config_dir().join("config.toml");
        debug!("Config file path: {}", config_file.display());

        Ok(config_file)
    }

    /// XDGデフォルトのログディレクトリ
    pub fn default_log_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "sifyfy", "ytchatx").map(|dirs| dirs.data_local_dir().join("logs"))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// 設定を読み込み
    pub fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!(
                "Config file not found, using default settings: {}",
                self.config_path.display()
            );
            return Ok(AppConfig::default());
        }

        let config_content = fs::read_to_string(&self.config_path).with_context(|| {
            format!("Failed to read config file: {}", self.config_path.display())
        })?;

        let config: AppConfig = toml::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse config file: {}",
                self.config_path.display()
            )
        })?;

        info!(
            "✅ Configuration loaded from: {}",
            self.config_path.display()
        );

        Ok(config)
    }

    /// 設定を保存
    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let config_content =
            toml::to_string_pretty(config).context("Failed to serialize config")?;

        fs::write(&self.config_path, config_content).with_context(|| {
            format!(
                "Failed to write config file: {}",
                self.config_path.display()
            )
        })?;

        info!("💾 Configuration saved to: {}", self.config_path.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("missing.toml"));
        let config = manager.load_config().unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.pool.max_size, 5);
        assert_eq!(config.orchestrator.retention_secs, 300);
    }

    #[test]
    fn test_save_and_load_config() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("nested").join("config.toml"));

        let mut config = AppConfig::default();
        config.server.bind = "0.0.0.0:9000".to_string();
        config.pool.max_size = 8;
        config.aggregator.donation_capacity = 15;
        manager.save_config(&config).unwrap();

        let loaded = manager.load_config().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[pool]\nmax_size = 2\n\n[orchestrator]\nretention_secs = 0\n",
        )
        .unwrap();

        let config = ConfigManager::with_path(&path).load_config().unwrap();
        assert_eq!(config.pool.max_size, 2);
        assert_eq!(config.pool.min_idle, PoolConfig::default().min_idle);
        assert_eq!(config.orchestrator.retention(), Duration::ZERO);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[pool\nmax_size = ").unwrap();

        let err = ConfigManager::with_path(&path).load_config().unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
