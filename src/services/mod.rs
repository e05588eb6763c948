pub mod catalog;
pub mod daily_selector;
pub mod feed;
pub mod ingestion;
pub mod isolation;
pub mod recommendations;
pub mod sections;
pub mod versioned_cache;

pub use daily_selector::DailySelector;
pub use feed::FeedService;
pub use ingestion::ViewQueue;
pub use versioned_cache::FeedCache;
