//! HTTP層のエラーとステータスコードの対応

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::ScraperError;

/// エラーレスポンスのボディ
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

/// APIエラー
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    /// 空きリソースがない（時間を置いて再試行できる）
    #[error("{0}")]
    Unavailable(String),
    /// ブラウザの起動・上流の失敗
    #[error("{0}")]
    BadGateway(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "RESOURCE_EXHAUSTED"),
            ApiError::BadGateway(_) => (StatusCode::BAD_GATEWAY, "POOL_FAILURE"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "❌ API internal error");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let mut response = (status, Json(ErrorBody { error: code, message })).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response.headers_mut().insert(
                axum::http::header::RETRY_AFTER,
                axum::http::HeaderValue::from_static("5"),
            );
        }
        response
    }
}

impl From<ScraperError> for ApiError {
    fn from(err: ScraperError) -> Self {
        match err {
            ScraperError::Validation { .. } => ApiError::BadRequest(err.to_string()),
            ScraperError::NotFound(_) => ApiError::NotFound(err.to_string()),
            ScraperError::ResourceExhausted { .. } | ScraperError::ShuttingDown => {
                ApiError::Unavailable(err.to_string())
            }
            ScraperError::PoolFailure(_) | ScraperError::Transport(_) => {
                ApiError::BadGateway(err.to_string())
            }
            ScraperError::Internal(detail) => ApiError::Internal(detail),
        }
    }
}
