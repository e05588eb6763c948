//! Feed cache with a global version namespace
//!
//! Every feed key embeds the current namespace (`v{n}`). Catalog mutations
//! bump the counter, which orphans every existing entry at once; orphans age
//! out on their TTL. A missing or unreachable counter reads as version 1 so
//! the feed keeps serving.
use std::{
    fmt::Display,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::{
    db::CacheStore,
    error::{AppError, AppResult},
    models::{FieldOptions, SelectionLimits},
};

/// Namespace used when the version counter is absent or unreadable
pub const DEFAULT_VERSION: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// The global namespace counter
    Version,
    /// One assembled feed, keyed by everything that shapes its payload
    Feed {
        namespace: String,
        day: String,
        user: Option<Uuid>,
        limits: SelectionLimits,
        fields: FieldOptions,
    },
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Version => write!(f, "feed:cache_version"),
            CacheKey::Feed {
                namespace,
                day,
                user,
                limits,
                fields,
            } => {
                write!(f, "feed:{}:{}:", namespace, day)?;
                match user {
                    Some(id) => write!(f, "u:{}", id)?,
                    None => write!(f, "anon")?,
                }
                write!(f, ":{}:{}", limits.cache_tag(), fields.cache_tag())
            }
        }
    }
}

/// Cache handler for assembled feeds
///
/// Every store call is bounded by `op_timeout`. Reads and writes are soft:
/// failures are logged and treated as a miss or a skipped write.
#[derive(Clone)]
pub struct FeedCache {
    store: Arc<dyn CacheStore>,
    op_timeout: Duration,
    version_warned: Arc<AtomicBool>,
}

impl FeedCache {
    pub fn new(store: Arc<dyn CacheStore>, op_timeout: Duration) -> Self {
        Self {
            store,
            op_timeout,
            version_warned: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AppError::CacheUnavailable(format!(
                "{} {} exceeded {:?}",
                self.store.name(),
                op,
                self.op_timeout
            ))),
        }
    }

    /// Reads the current version, falling back to [`DEFAULT_VERSION`]
    ///
    /// The first fallback caused by a store failure is logged; later ones
    /// stay quiet until the process restarts.
    pub async fn current_version(&self) -> i64 {
        let key = CacheKey::Version.to_string();
        match self.bounded("get_counter", self.store.get_counter(&key)).await {
            Ok(Some(version)) if version >= DEFAULT_VERSION => version,
            Ok(_) => DEFAULT_VERSION,
            Err(e) => {
                if !self.version_warned.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        store = self.store.name(),
                        error = %e,
                        "Cache version unavailable, serving default namespace"
                    );
                }
                DEFAULT_VERSION
            }
        }
    }

    /// The namespace segment for cache keys, e.g. `v3`
    pub async fn resolve_namespace(&self) -> String {
        format!("v{}", self.current_version().await)
    }

    /// Moves every reader to a fresh namespace and returns the new version
    ///
    /// A counter that was absent reads as version 1 already, so incrementing
    /// it from nothing would land on the same namespace; in that case it is
    /// incremented once more.
    pub async fn bump_version(&self) -> AppResult<i64> {
        let key = CacheKey::Version.to_string();
        let mut version = self.bounded("incr", self.store.incr(&key)).await?;
        if version == DEFAULT_VERSION {
            version = self.bounded("incr", self.store.incr(&key)).await?;
        }
        tracing::info!(version, "Feed cache namespace bumped");
        Ok(version)
    }

    /// Retrieves a value from the cache by key
    ///
    /// Store failures and undecodable payloads are both reported as a miss.
    pub async fn get_from_cache<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let raw = match self.bounded("get", self.store.get(&key.to_string())).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!(key = %key, "Cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(value) => {
                tracing::debug!(key = %key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    /// Stores a value in the cache with a TTL, logging instead of failing
    pub async fn set_in_cache<T: Serialize>(&self, key: &CacheKey, value: &T, ttl_secs: u64) {
        let payload = match serde_json::to_vec(value) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to serialize cache value");
                return;
            }
        };

        if let Err(e) = self
            .bounded("set_ex", self.store.set_ex(&key.to_string(), payload, ttl_secs))
            .await
        {
            tracing::warn!(key = %key, error = %e, "Cache write failed");
        }
    }
}
