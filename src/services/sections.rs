//! Stateless section builders. Each one is a single bounded catalog read,
//! meant to run inside [`run_block`](crate::services::isolation::run_block).

use std::{collections::HashSet, sync::Arc};

use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{ContentItemRef, FieldOptions, ItemId},
    services::catalog::Catalog,
};

/// Items with a live excerpt, most recently featured first
pub async fn trending(
    catalog: Arc<dyn Catalog>,
    limit: usize,
    fields: FieldOptions,
) -> AppResult<Vec<ContentItemRef>> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let items = catalog.trending(limit, fields).await?;
    Ok(finish(items, limit, fields))
}

/// Items by creation time, newest first
pub async fn newest(
    catalog: Arc<dyn Catalog>,
    limit: usize,
    fields: FieldOptions,
) -> AppResult<Vec<ContentItemRef>> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let items = catalog.newest(&[], limit, fields).await?;
    Ok(finish(items, limit, fields))
}

/// The user's in-progress items
pub async fn continue_reading(
    catalog: Arc<dyn Catalog>,
    user_id: Uuid,
    limit: usize,
    fields: FieldOptions,
) -> AppResult<Vec<ContentItemRef>> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let items = catalog.continue_reading(user_id, limit, fields).await?;
    Ok(finish(items, limit, fields))
}

fn finish(items: Vec<ContentItemRef>, limit: usize, fields: FieldOptions) -> Vec<ContentItemRef> {
    let mut items = dedup_by_id(items);
    items.truncate(limit);
    items.into_iter().map(|i| i.apply_fields(fields)).collect()
}

/// Keeps the first occurrence of every id, preserving order
pub fn dedup_by_id(items: Vec<ContentItemRef>) -> Vec<ContentItemRef> {
    let mut seen: HashSet<ItemId> = HashSet::with_capacity(items.len());
    items.into_iter().filter(|i| seen.insert(i.id)).collect()
}
