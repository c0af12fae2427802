//! ルーター構築

use axum::routing::get;
use axum::Router;

use super::handlers;
use super::AppState;

/// API ルーターを作成
///
/// すべて GET。`/scrapers/*` はクエリの `videoId` で対象を指定する。
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/scrapers", get(handlers::list))
        .route("/scrapers/pool", get(handlers::pool))
        .route("/scrapers/start", get(handlers::start))
        .route("/scrapers/stop", get(handlers::stop))
        .route("/scrapers/statistics", get(handlers::statistics))
        .route("/scrapers/messageGraph", get(handlers::message_graph))
        .with_state(state)
}
