//! APIサーバーの起動と停止

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::router::build_router;
use super::AppState;

/// 起動中のAPIサーバー
pub struct ApiServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ApiServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// 処理中のリクエストを終えてから停止する
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            tracing::warn!("⚠️ API server task ended abnormally: {}", e);
        }
    }
}

/// 指定アドレスで待ち受けを開始する（ポート 0 なら空きポート）
pub async fn start_api_server(bind: &str, state: AppState) -> Result<ApiServer> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind API server to {}", bind))?;
    let addr = listener
        .local_addr()
        .context("Failed to get API server address")?;

    let app = build_router(state);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
            tracing::info!("🛑 API server received shutdown signal");
        };

        tracing::info!(%addr, "🌐 API server listening");
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
        {
            tracing::error!("❌ API server error: {}", e);
        }
        tracing::info!("API server stopped");
    });

    Ok(ApiServer {
        addr,
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{KeywordScorer, ScriptLanguageClassifier};
    use crate::config::AppConfig;
    use crate::scraper::{Analyzers, ScriptedChatSource, SessionOrchestrator};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_start_and_shutdown_server() {
        let orchestrator = SessionOrchestrator::new(
            Arc::new(ScriptedChatSource::new()),
            &AppConfig::default(),
            Analyzers {
                classifier: Arc::new(ScriptLanguageClassifier::default()),
                scorer: Arc::new(KeywordScorer::new()),
            },
        );
        let server = start_api_server("127.0.0.1:0", AppState::new(orchestrator))
            .await
            .expect("server should start");
        let addr = server.local_addr();
        assert!(addr.port() > 0);

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("ok"));

        server.shutdown().await;
    }
}
