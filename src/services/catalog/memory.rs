use std::{cmp::Reverse, collections::HashMap, sync::Mutex, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{ContentItemRef, FeaturedExcerpt, FieldOptions, IngestionEvent, ItemId},
};

use super::{Catalog, EventSink};

/// One catalog row as the in-process catalog stores it
#[derive(Debug, Clone)]
pub struct CatalogItem {
    pub item: ContentItemRef,
    pub excerpt: Option<String>,
    pub excerpt_enabled: bool,
    pub last_featured_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogItem {
    pub fn new(id: ItemId, title: &str) -> Self {
        let slug = title.to_lowercase().replace(' ', "-");
        Self {
            item: ContentItemRef {
                id,
                url: format!("https://example.com/books/{}", slug),
                slug,
                title: title.to_string(),
                author: "Unknown".to_string(),
                categories: Default::default(),
                summary: None,
            },
            excerpt: None,
            excerpt_enabled: false,
            last_featured_at: None,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn author(mut self, author: &str) -> Self {
        self.item.author = author.to_string();
        self
    }

    pub fn categories(mut self, slugs: &[&str]) -> Self {
        self.item.categories = slugs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn summary(mut self, summary: &str) -> Self {
        self.item.summary = Some(summary.to_string());
        self
    }

    /// Gives the item an enabled excerpt
    pub fn excerpt(mut self, excerpt: &str) -> Self {
        self.excerpt = Some(excerpt.to_string());
        self.excerpt_enabled = true;
        self
    }

    pub fn excerpt_disabled(mut self) -> Self {
        self.excerpt_enabled = false;
        self
    }

    pub fn featured_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_featured_at = Some(at);
        self
    }

    /// Sets both creation and last-activity time
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self.updated_at = at;
        self
    }

    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = at;
        self
    }

    fn has_excerpt(&self) -> bool {
        self.excerpt_enabled
            && self
                .excerpt
                .as_deref()
                .is_some_and(|e| !e.trim().is_empty())
    }

    fn project(&self, fields: FieldOptions) -> ContentItemRef {
        self.item.clone().apply_fields(fields)
    }

    fn project_excerpt(&self, fields: FieldOptions) -> FeaturedExcerpt {
        FeaturedExcerpt {
            item: self.project(fields),
            excerpt: self.excerpt.clone().unwrap_or_default(),
        }
    }
}

/// Failure injected into one catalog operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Error,
    DataShape,
    /// Unit tests only
    #[cfg(test)]
    Panic,
    Delay(Duration),
}

/// In-process catalog with the same query semantics as the Postgres one.
/// Backs the test suite and local demos; faults can be injected per operation.
#[derive(Default)]
pub struct MemoryCatalog {
    items: RwLock<Vec<CatalogItem>>,
    progress: RwLock<Vec<(Uuid, ItemId, DateTime<Utc>)>>,
    views: RwLock<Vec<IngestionEvent>>,
    faults: Mutex<HashMap<&'static str, Fault>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<CatalogItem>) -> Self {
        Self {
            items: RwLock::new(items),
            ..Self::default()
        }
    }

    pub async fn insert(&self, item: CatalogItem) {
        let mut items = self.items.write().await;
        items.retain(|existing| existing.item.id != item.item.id);
        items.push(item);
    }

    pub async fn record_progress(&self, user_id: Uuid, item_id: ItemId, at: DateTime<Utc>) {
        let mut progress = self.progress.write().await;
        progress.retain(|(user, item, _)| !(*user == user_id && *item == item_id));
        progress.push((user_id, item_id, at));
    }

    pub async fn last_featured_at(&self, id: ItemId) -> Option<DateTime<Utc>> {
        self.items
            .read()
            .await
            .iter()
            .find(|i| i.item.id == id)
            .and_then(|i| i.last_featured_at)
    }

    pub async fn views(&self) -> Vec<IngestionEvent> {
        self.views.read().await.clone()
    }

    /// Makes every later call of `operation` fail the given way
    pub fn inject(&self, operation: &'static str, fault: Fault) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert(operation, fault);
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.clear();
        }
    }

    /// How many times `operation` has been called
    pub fn calls(&self, operation: &'static str) -> usize {
        self.calls
            .lock()
            .ok()
            .and_then(|calls| calls.get(operation).copied())
            .unwrap_or(0)
    }

    async fn check(&self, operation: &'static str) -> AppResult<()> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(operation).or_insert(0) += 1;
        }
        let fault = self
            .faults
            .lock()
            .ok()
            .and_then(|faults| faults.get(operation).copied());

        match fault {
            None => Ok(()),
            Some(Fault::Error) => Err(AppError::Internal(format!("{} failed", operation))),
            Some(Fault::DataShape) => Err(AppError::DataShape(format!(
                "{} returned an undecodable row",
                operation
            ))),
            #[cfg(test)]
            Some(Fault::Panic) => panic!("{} panicked", operation),
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn featured_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<FeaturedExcerpt>> {
        self.check("featured_between").await?;
        let items = self.items.read().await;

        let mut rows: Vec<&CatalogItem> = items
            .iter()
            .filter(|i| i.has_excerpt())
            .filter(|i| i.last_featured_at.is_some_and(|at| at >= start && at < end))
            .collect();
        rows.sort_by_key(|i| (i.last_featured_at, Reverse(i.created_at), Reverse(i.item.id)));

        Ok(rows
            .into_iter()
            .take(limit)
            .map(|i| i.project_excerpt(fields))
            .collect())
    }

    async fn eligible_for_feature(
        &self,
        cutoff: DateTime<Utc>,
        exclude: &[ItemId],
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<FeaturedExcerpt>> {
        self.check("eligible_for_feature").await?;
        let items = self.items.read().await;

        let mut rows: Vec<&CatalogItem> = items
            .iter()
            .filter(|i| i.has_excerpt() && !exclude.contains(&i.item.id))
            .filter(|i| i.last_featured_at.map_or(true, |at| at < cutoff))
            .collect();
        // None sorts first, matching NULLS FIRST
        rows.sort_by_key(|i| (i.last_featured_at, i.item.id));

        Ok(rows
            .into_iter()
            .take(limit)
            .map(|i| i.project_excerpt(fields))
            .collect())
    }

    async fn previously_featured(
        &self,
        exclude: &[ItemId],
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<FeaturedExcerpt>> {
        self.check("previously_featured").await?;
        let items = self.items.read().await;

        let mut rows: Vec<&CatalogItem> = items
            .iter()
            .filter(|i| i.has_excerpt() && !exclude.contains(&i.item.id))
            .filter(|i| i.last_featured_at.is_some())
            .collect();
        rows.sort_by_key(|i| (i.last_featured_at, i.item.id));

        Ok(rows
            .into_iter()
            .take(limit)
            .map(|i| i.project_excerpt(fields))
            .collect())
    }

    async fn stamp_featured(&self, ids: &[ItemId], at: DateTime<Utc>) -> AppResult<()> {
        self.check("stamp_featured").await?;
        let mut items = self.items.write().await;

        if let Some(missing) = ids
            .iter()
            .find(|id| !items.iter().any(|i| i.item.id == **id))
        {
            return Err(AppError::NotFound(format!("item {}", missing)));
        }

        for item in items.iter_mut().filter(|i| ids.contains(&i.item.id)) {
            item.last_featured_at = Some(at);
        }
        Ok(())
    }

    async fn related_by_categories(
        &self,
        categories: &[String],
        exclude: &[ItemId],
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<ContentItemRef>> {
        self.check("related_by_categories").await?;
        let items = self.items.read().await;

        let mut rows: Vec<&CatalogItem> = items
            .iter()
            .filter(|i| !exclude.contains(&i.item.id))
            .filter(|i| categories.iter().any(|c| i.item.categories.contains(c)))
            .collect();
        rows.sort_by_key(|i| (Reverse(i.updated_at), Reverse(i.item.id)));

        Ok(rows
            .into_iter()
            .take(limit)
            .map(|i| i.project(fields))
            .collect())
    }

    async fn newest(
        &self,
        exclude: &[ItemId],
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<ContentItemRef>> {
        self.check("newest").await?;
        let items = self.items.read().await;

        let mut rows: Vec<&CatalogItem> = items
            .iter()
            .filter(|i| !exclude.contains(&i.item.id))
            .collect();
        rows.sort_by_key(|i| (Reverse(i.created_at), Reverse(i.item.id)));

        Ok(rows
            .into_iter()
            .take(limit)
            .map(|i| i.project(fields))
            .collect())
    }

    async fn trending(
        &self,
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<ContentItemRef>> {
        self.check("trending").await?;
        let items = self.items.read().await;

        let mut rows: Vec<&CatalogItem> = items.iter().filter(|i| i.has_excerpt()).collect();
        // Reverse(None) sorts after every Reverse(Some(_)), matching NULLS LAST
        rows.sort_by_key(|i| (Reverse(i.last_featured_at), Reverse(i.item.id)));

        Ok(rows
            .into_iter()
            .take(limit)
            .map(|i| i.project(fields))
            .collect())
    }

    async fn continue_reading(
        &self,
        user_id: Uuid,
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<ContentItemRef>> {
        self.check("continue_reading").await?;
        let items = self.items.read().await;

        let mut progress: Vec<(ItemId, DateTime<Utc>)> = self
            .progress
            .read()
            .await
            .iter()
            .filter(|(user, _, _)| *user == user_id)
            .map(|(_, item, at)| (*item, *at))
            .collect();
        progress.sort_by_key(|(_, at)| Reverse(*at));

        Ok(progress
            .into_iter()
            .filter_map(|(id, _)| items.iter().find(|i| i.item.id == id))
            .take(limit)
            .map(|i| i.project(fields))
            .collect())
    }
}

#[async_trait]
impl EventSink for MemoryCatalog {
    async fn insert_views(&self, events: &[IngestionEvent]) -> AppResult<u64> {
        self.check("insert_views").await?;
        self.views.write().await.extend_from_slice(events);
        Ok(events.len() as u64)
    }
}
