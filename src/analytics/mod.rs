pub mod currency;
pub mod keywords;
pub mod language;
pub mod leaderboard;
pub mod stats_aggregator;
pub mod throughput;

pub use currency::{parse_amount, CurrencyMatch, ParsedAmount, UNKNOWN_CURRENCY_LABEL};
pub use keywords::KeywordScorer;
pub use language::{
    parse_skip_languages, Classification, LanguageClassifier, LanguageTag,
    ScriptLanguageClassifier,
};
pub use leaderboard::Leaderboard;
pub use stats_aggregator::{
    AggregatorConfig, KeywordRank, LanguageShare, RecentMessage, StatsAggregator, StatsSnapshot,
    TopChatter,
};
pub use throughput::{ThroughputBucket, ThroughputBuckets};
