//! Catalog query boundary
//!
//! The relational catalog (books, authors, categories) is owned elsewhere; the
//! feed engine only needs the bounded, filtered reads below plus one write path
//! that records feature history. Every read returns rows already projected for
//! the requested `FieldOptions`.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{ContentItemRef, FeaturedExcerpt, FieldOptions, IngestionEvent, ItemId},
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryCatalog;
pub use postgres::PgCatalog;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Items with an enabled, non-empty excerpt whose feature stamp falls in
    /// `[start, end)`, oldest stamp first, newest item first on ties.
    async fn featured_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<FeaturedExcerpt>>;

    /// Items with an enabled, non-empty excerpt that were never featured or
    /// were last featured before `cutoff`. Never-featured first, then oldest
    /// stamp first.
    async fn eligible_for_feature(
        &self,
        cutoff: DateTime<Utc>,
        exclude: &[ItemId],
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<FeaturedExcerpt>>;

    /// Items with an enabled, non-empty excerpt that have been featured at
    /// least once, least recently featured first. Ignores the cooldown.
    async fn previously_featured(
        &self,
        exclude: &[ItemId],
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<FeaturedExcerpt>>;

    /// Sets `last_featured_at = at` for every id, all or nothing.
    async fn stamp_featured(&self, ids: &[ItemId], at: DateTime<Utc>) -> AppResult<()>;

    /// Items sharing at least one category slug, most recent activity first.
    async fn related_by_categories(
        &self,
        categories: &[String],
        exclude: &[ItemId],
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<ContentItemRef>>;

    /// Items by creation time, newest first.
    async fn newest(
        &self,
        exclude: &[ItemId],
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<ContentItemRef>>;

    /// Items with an enabled, non-empty excerpt, most recently featured first.
    async fn trending(&self, limit: usize, fields: FieldOptions)
        -> AppResult<Vec<ContentItemRef>>;

    /// Items the user has reading progress on, most recently read first.
    async fn continue_reading(
        &self,
        user_id: Uuid,
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<ContentItemRef>>;
}

/// Bulk write path for engagement events
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Persists the batch in a single insert, returning the rows written.
    async fn insert_views(&self, events: &[IngestionEvent]) -> AppResult<u64>;
}
