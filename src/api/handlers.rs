//! エンドポイントのハンドラ

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::chart::{localized_date, ChartSpec};
use super::error::ApiError;
use super::AppState;
use crate::analytics::parse_skip_languages;
use crate::models::VideoId;
use crate::scraper::{PoolStats, SessionState, SessionStatistics, SessionView, StartOutcome, StopOutcome};

/// クエリパラメータ
///
/// `langs` は `langs=a&langs=b` と `langs=a,b` のどちらでも受け付ける。
#[derive(Debug, Default, PartialEq)]
pub struct ScraperParams {
    pub video_id: Option<String>,
    pub langs: Vec<String>,
    pub lang: Option<String>,
}

impl ScraperParams {
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "videoId" => params.video_id = Some(value),
                "langs" => params.langs.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                ),
                "lang" => params.lang = Some(value),
                _ => {}
            }
        }
        params
    }

    fn video_id(&self) -> Result<VideoId, ApiError> {
        Ok(VideoId::parse(self.video_id.as_deref().unwrap_or_default())?)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub message: String,
    pub video_id: VideoId,
    pub session_id: Uuid,
    pub state: SessionState,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub running_scraper_count: usize,
    pub scrapers: Vec<SessionView>,
}

/// GET /scrapers/start
pub async fn start(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<StartResponse>, ApiError> {
    let params = ScraperParams::from_pairs(pairs);
    let video_id = params.video_id()?;
    let skip_langs = parse_skip_languages(&params.langs);

    let outcome = state.service.start(video_id.clone(), skip_langs).await?;
    let message = match &outcome {
        StartOutcome::Started(_) => format!("Scraper queued for video {}", video_id),
        StartOutcome::AlreadyRunning(_) => format!("Scraper already running for video {}", video_id),
    };
    let session = outcome.session();

    Ok(Json(StartResponse {
        message,
        video_id,
        session_id: session.session_id(),
        state: session.state(),
    }))
}

/// GET /scrapers/stop
pub async fn stop(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let video_id = ScraperParams::from_pairs(pairs).video_id()?;

    let message = match state.service.stop(&video_id).await {
        StopOutcome::Stopped => format!("Scraper stopped for video ID: {}", video_id),
        StopOutcome::AlreadyFinished(_) | StopOutcome::NotFound => {
            format!("No active scraper found for video ID: {}", video_id)
        }
    };
    Ok(Json(MessageResponse { message }))
}

/// GET /scrapers/statistics
pub async fn statistics(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<SessionStatistics>, ApiError> {
    let video_id = ScraperParams::from_pairs(pairs).video_id()?;
    Ok(Json(state.service.statistics(&video_id)?))
}

/// GET /scrapers/messageGraph
pub async fn message_graph(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<impl IntoResponse, ApiError> {
    let params = ScraperParams::from_pairs(pairs);
    let video_id = params.video_id()?;
    let stats = state.service.statistics(&video_id)?;

    let title = stats
        .video_title
        .clone()
        .unwrap_or_else(|| video_id.to_string());
    let subtitle = format!(
        "{} | {}",
        localized_date(params.lang.as_deref(), Utc::now()),
        video_id.watch_url()
    );
    let body = state.chart.render(&ChartSpec {
        title,
        subtitle,
        buckets: &stats.stats.buckets,
    });

    Ok(([(header::CONTENT_TYPE, state.chart.content_type())], body))
}

/// GET /scrapers
pub async fn list(State(state): State<AppState>) -> Json<ListResponse> {
    Json(ListResponse {
        running_scraper_count: state.service.running_count(),
        scrapers: state.service.list(),
    })
}

/// GET /scrapers/pool
pub async fn pool(State(state): State<AppState>) -> Json<PoolStats> {
    Json(state.service.pool_stats())
}

/// GET /health
pub async fn health() -> &'static str {
    "ok"
}
