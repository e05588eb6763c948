use std::sync::Arc;

use crate::{
    config::{FeedSettings, IngestionSettings},
    db::CacheStore,
    services::{
        catalog::{Catalog, EventSink},
        FeedCache, FeedService, ViewQueue,
    },
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub feed: Arc<FeedService>,
    pub views: Arc<ViewQueue>,
}

impl AppState {
    pub fn new(feed: Arc<FeedService>, views: Arc<ViewQueue>) -> Self {
        Self { feed, views }
    }

    /// Wires the services over the given catalog and cache store and starts
    /// the view queue. Must be called from within a Tokio runtime.
    pub fn from_parts(
        catalog: Arc<dyn Catalog>,
        sink: Arc<dyn EventSink>,
        store: Arc<dyn CacheStore>,
        feed_settings: FeedSettings,
        ingestion: &IngestionSettings,
    ) -> Self {
        let cache = FeedCache::new(store, feed_settings.cache_op_timeout);
        let feed = Arc::new(FeedService::new(catalog, cache, feed_settings));

        let views = Arc::new(ViewQueue::new(
            sink,
            ingestion.batch_size,
            ingestion.flush_interval,
        ));
        views.start(ingestion.buffer_size, ingestion.workers);

        Self::new(feed, views)
    }
}
