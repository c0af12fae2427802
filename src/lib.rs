pub mod analytics;
pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod scraper;
pub mod utils;

// Re-export the main error types for convenience
pub use error::{ScraperError, ScraperResult, TransportError, TransportErrorKind};

pub use models::{ChatMessage, DonationEvent, VideoId, VideoMetadata};

// Re-export the orchestrator surface
pub use scraper::{
    ChatEventSource, ResourceFactory, ResourcePool, ScraperService, SessionOrchestrator,
    SessionState, StartOutcome, StopOutcome,
};

// Re-export analytics modules
pub use analytics::{
    parse_amount, KeywordScorer, LanguageClassifier, LanguageTag, StatsAggregator, StatsSnapshot,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_structure() {
        // Test that the main modules are accessible
        assert!(std::any::type_name::<scraper::SessionOrchestrator<scraper::ScriptedChatSource>>()
            .contains("SessionOrchestrator"));
        assert!(std::any::type_name::<models::VideoId>().contains("VideoId"));
    }

    #[test]
    fn test_reexports() {
        let _: Option<ChatMessage> = None;
        let _: Option<DonationEvent> = None;
        let _: Option<StatsSnapshot> = None;
        let _: Option<SessionState> = None;
        assert_eq!(parse_amount("USD 5").code, Some("USD"));
    }
}
