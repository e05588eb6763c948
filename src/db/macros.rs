/// Serves a value from the feed cache, building and storing it on a miss.
///
/// Cache failures never fail the expression: a read failure counts as a miss
/// and a write failure only skips storing. Errors from the build future are
/// propagated with `?`.
///
/// # Arguments
/// * `$cache`: a [`FeedCache`](crate::services::versioned_cache::FeedCache).
/// * `$key`: the [`CacheKey`](crate::services::versioned_cache::CacheKey) to read and write.
/// * `$ttl`: time-to-live for a stored value, in seconds.
/// * `$block`: future producing `AppResult<T>` on a miss.
///
/// # Example
/// ```rust,ignore
/// let feed: FeedSections = cached!(cache, key, 120, async move {
///     assemble_feed().await
/// })?;
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        if let Some(cached) = $cache.get_from_cache(&$key).await {
            Ok(cached)
        } else {
            let value = $block.await?;
            $cache.set_in_cache(&$key, &value, $ttl).await;
            Ok(value)
        }
    }};
}
