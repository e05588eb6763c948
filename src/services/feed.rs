//! Feed assembly
//!
//! The featured shorts and the recommendations built from them are the
//! required path: if either fails the request fails. Trending, newest and
//! continue-reading run concurrently beside them, each isolated, and degrade
//! to an empty section. Whole feeds are cached under the current version
//! namespace; concurrent misses on one key are collapsed into one build.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
};

use tokio::sync::Mutex;
use tracing::instrument;

use crate::{
    cached,
    config::FeedSettings,
    error::AppResult,
    models::{FeedRequest, FeedSections, FieldOptions},
    services::{
        catalog::Catalog,
        daily_selector::{DailySelector, ReferenceDay},
        isolation::{run_block, run_required},
        recommendations::get_recommendations,
        sections,
        versioned_cache::{CacheKey, FeedCache},
    },
};

pub struct FeedService {
    catalog: Arc<dyn Catalog>,
    selector: Arc<DailySelector>,
    cache: FeedCache,
    settings: FeedSettings,
    inflight: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FeedService {
    pub fn new(catalog: Arc<dyn Catalog>, cache: FeedCache, settings: FeedSettings) -> Self {
        let selector = Arc::new(DailySelector::new(catalog.clone(), settings.cooldown_days));
        Self {
            catalog,
            selector,
            cache,
            settings,
            inflight: StdMutex::new(HashMap::new()),
        }
    }

    pub fn cache_ttl_secs(&self) -> u64 {
        self.settings.cache_ttl_secs
    }

    /// Serves the feed for one request, from cache when possible
    #[instrument(skip(self, request), fields(user = ?request.user_id))]
    pub async fn get_feed(&self, request: &FeedRequest) -> AppResult<FeedSections> {
        let day = ReferenceDay::containing(request.now, self.settings.time_zone);
        let key = CacheKey::Feed {
            namespace: self.cache.resolve_namespace().await,
            day: day.label().to_string(),
            user: request.user_id,
            limits: request.limits,
            fields: request.fields,
        };

        if let Some(feed) = self.cache.get_from_cache(&key).await {
            return Ok(feed);
        }

        let key_str = key.to_string();
        let lock = self.inflight_lock(&key_str);
        let result = {
            let _guard = lock.lock().await;
            // Whoever held the lock before us may have filled the entry.
            self.build_cached(&key, request, &day).await
        };
        self.release_inflight(&key_str, lock);

        result
    }

    async fn build_cached(
        &self,
        key: &CacheKey,
        request: &FeedRequest,
        day: &ReferenceDay,
    ) -> AppResult<FeedSections> {
        cached!(
            self.cache,
            key,
            self.settings.cache_ttl_secs,
            self.assemble(request, day)
        )
    }

    /// Builds a feed from the catalog, bypassing the cache
    pub async fn assemble(
        &self,
        request: &FeedRequest,
        day: &ReferenceDay,
    ) -> AppResult<FeedSections> {
        let limits = request.limits;
        let fields = request.fields;
        let timeout = self.settings.block_timeout;

        let required = {
            let selector = self.selector.clone();
            let catalog = self.catalog.clone();
            let day = day.clone();
            async move {
                let shorts = run_required("shorts", timeout, async move {
                    selector.select(&day, limits.shorts, fields).await
                })
                .await?;

                let featured = shorts.clone();
                let recommended = run_required("recommended", timeout, async move {
                    get_recommendations(
                        catalog.as_ref(),
                        &featured,
                        limits.recommendations,
                        fields,
                    )
                    .await
                })
                .await?;

                AppResult::Ok((shorts, recommended))
            }
        };

        let trending = run_block(
            "trending",
            timeout,
            sections::trending(self.catalog.clone(), limits.trending, fields),
        );
        let newest = run_block(
            "newest",
            timeout,
            sections::newest(self.catalog.clone(), limits.newest, fields),
        );
        let continue_reading = async {
            match request.user_id {
                Some(user_id) => {
                    run_block(
                        "continue_reading",
                        timeout,
                        sections::continue_reading(
                            self.catalog.clone(),
                            user_id,
                            limits.continue_reading,
                            fields,
                        ),
                    )
                    .await
                }
                None => Vec::new(),
            }
        };

        let (required, trending, newest, continue_reading) =
            tokio::join!(required, trending, newest, continue_reading);
        let (shorts, recommended) = required?;

        Ok(shape(
            FeedSections {
                shorts,
                recommended,
                trending,
                newest,
                continue_reading,
            },
            fields,
        ))
    }

    /// Invalidates every cached feed; call after a catalog mutation commits
    pub async fn catalog_mutated(&self) -> AppResult<i64> {
        self.cache.bump_version().await
    }

    fn inflight_lock(&self, key: &str) -> Arc<Mutex<()>> {
        match self.inflight.lock() {
            Ok(mut inflight) => inflight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone(),
            // Without the map, builds are simply not collapsed.
            Err(_) => Arc::new(Mutex::new(())),
        }
    }

    fn release_inflight(&self, key: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        if let Ok(mut inflight) = self.inflight.lock() {
            if inflight
                .get(key)
                .is_some_and(|entry| Arc::strong_count(entry) == 1)
            {
                inflight.remove(key);
            }
        }
    }
}

/// Applies the payload options to sections selected with full rows
fn shape(feed: FeedSections, fields: FieldOptions) -> FeedSections {
    FeedSections {
        shorts: feed
            .shorts
            .into_iter()
            .map(|s| s.apply_fields(fields))
            .collect(),
        recommended: feed
            .recommended
            .into_iter()
            .map(|r| r.apply_fields(fields))
            .collect(),
        ..feed
    }
}
