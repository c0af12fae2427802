//! HTTP API（axum）
//!
//! スクレイパーサービスへの薄い窓口。ロジックは持たず、クエリの検証と
//! レスポンスへの変換だけを行う。

pub mod chart; // グラフ描画
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;

use std::sync::Arc;

use crate::scraper::ScraperService;
use chart::ChartRenderer;

pub use chart::SvgChartRenderer;
pub use error::ApiError;
pub use router::build_router;
pub use server::{start_api_server, ApiServer};

/// ハンドラ間で共有する状態
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn ScraperService>,
    pub chart: Arc<dyn ChartRenderer>,
}

impl AppState {
    pub fn new(service: Arc<dyn ScraperService>) -> Self {
        Self {
            service,
            chart: Arc::new(SvgChartRenderer),
        }
    }

    pub fn with_chart_renderer(mut self, chart: Arc<dyn ChartRenderer>) -> Self {
        self.chart = chart;
        self
    }
}
