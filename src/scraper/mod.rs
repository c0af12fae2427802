pub mod buffer;
pub mod orchestrator; // セッション管理
pub mod pipeline; // インジェストパイプライン
pub mod pool; // リソースプール
pub mod retry;
pub mod scripted; // テスト・再生用ソース
pub mod session;
pub mod simulated; // シミュレーション用ソース
pub mod source;

pub use orchestrator::{
    ScraperService, SessionOrchestrator, StartOutcome, StopOutcome, STOPPED_BY_USER,
};
pub use pipeline::{Analyzers, IngestionPipeline, PipelineConfig, PipelineOutcome};
pub use pool::{PoolConfig, PoolStats, PooledResource, ResourceFactory, ResourcePool};
pub use retry::{Backoff, RetryConfig};
pub use scripted::{ScriptedBrowser, ScriptedChatSource, ScriptedFeed};
pub use session::{Session, SessionState, SessionStatistics, SessionStatus, SessionView};
pub use simulated::{SimulatedChatSource, SimulationConfig};
pub use source::{ChatEventSource, EventStream, UpstreamEvent};
