use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;

use crate::error::{AppError, AppResult};

/// Shared key/value + counter store behind the feed cache
///
/// Implementations report failures; callers decide whether they matter.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>>;

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> AppResult<()>;

    /// Atomically increments a counter, creating it at 1 when absent
    async fn incr(&self, key: &str) -> AppResult<i64>;

    async fn get_counter(&self, key: &str) -> AppResult<Option<i64>>;

    /// Store name for logging
    fn name(&self) -> &'static str;
}

/// Process-local store, used when no Redis URL is configured and in tests
#[derive(Default)]
pub struct MemoryStore {
    // `None` expiry: the TTL overflowed `Instant`, keep until overwritten
    entries: Mutex<HashMap<String, (Vec<u8>, Option<Instant>)>>,
    counters: Mutex<HashMap<String, i64>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the store going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of retained entries, expired or not
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_available(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::CacheUnavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

fn poisoned<T>(_: T) -> AppError {
    AppError::Internal("cache store lock poisoned".to_string())
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        self.ensure_available()?;
        let mut entries = self.entries.lock().map_err(poisoned)?;

        match entries.get(key) {
            Some((_, Some(expires_at))) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> AppResult<()> {
        self.ensure_available()?;
        let now = Instant::now();
        let expires_at = now.checked_add(Duration::from_secs(ttl_secs));

        let mut entries = self.entries.lock().map_err(poisoned)?;
        entries.retain(|_, (_, expiry)| expiry.map_or(true, |at| at > now));
        entries.insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn incr(&self, key: &str) -> AppResult<i64> {
        self.ensure_available()?;
        let mut counters = self.counters.lock().map_err(poisoned)?;
        let counter = counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn get_counter(&self, key: &str) -> AppResult<Option<i64>> {
        self.ensure_available()?;
        Ok(self.counters.lock().map_err(poisoned)?.get(key).copied())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
