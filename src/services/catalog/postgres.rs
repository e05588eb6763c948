use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{ContentItemRef, FeaturedExcerpt, FieldOptions, IngestionEvent, ItemId},
};

use super::{Catalog, EventSink};

/// Filter shared by every query that deals in featured excerpts
const HAS_EXCERPT: &str = "b.short_enabled AND COALESCE(BTRIM(b.short_excerpt), '') <> ''";

/// Raw projection row, before the canonical URL is attached
#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    id: i64,
    slug: String,
    title: String,
    author: String,
    categories: Vec<String>,
    summary: Option<String>,
    excerpt: Option<String>,
}

/// Postgres-backed catalog queries
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
    public_base_url: String,
}

impl PgCatalog {
    pub fn new(pool: PgPool, public_base_url: impl Into<String>) -> Self {
        Self {
            pool,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// SELECT list for one item row. Only the columns the caller asked for
    /// are materialized.
    fn projection(fields: FieldOptions) -> String {
        let categories = if fields.lite {
            "ARRAY[]::text[]"
        } else {
            "ARRAY(SELECT c.slug FROM book_categories bc \
             JOIN categories c ON c.id = bc.category_id \
             WHERE bc.book_id = b.id ORDER BY c.slug)"
        };
        let summary = if fields.include_summary {
            "NULLIF(BTRIM(b.summary), '')"
        } else {
            "NULL::text"
        };

        format!(
            "SELECT b.id, b.slug, b.title, COALESCE(a.name, '') AS author, \
             {categories} AS categories, {summary} AS summary, b.short_excerpt AS excerpt \
             FROM books b LEFT JOIN authors a ON a.id = b.author_id"
        )
    }

    fn to_item(&self, row: ItemRow) -> AppResult<(ContentItemRef, Option<String>)> {
        if row.slug.is_empty() {
            return Err(AppError::DataShape(format!("item {} has no slug", row.id)));
        }

        let item = ContentItemRef {
            id: row.id,
            url: format!("{}/books/{}", self.public_base_url, row.slug),
            slug: row.slug,
            title: row.title,
            author: row.author,
            categories: row.categories.into_iter().collect(),
            summary: row.summary,
        };
        Ok((item, row.excerpt))
    }

    fn to_items(&self, rows: Vec<ItemRow>) -> AppResult<Vec<ContentItemRef>> {
        rows.into_iter()
            .map(|row| self.to_item(row).map(|(item, _)| item))
            .collect()
    }

    fn to_excerpts(&self, rows: Vec<ItemRow>) -> AppResult<Vec<FeaturedExcerpt>> {
        rows.into_iter()
            .map(|row| {
                let (item, excerpt) = self.to_item(row)?;
                let excerpt = excerpt.filter(|e| !e.trim().is_empty()).ok_or_else(|| {
                    AppError::DataShape(format!("item {} has no excerpt", item.id))
                })?;
                Ok(FeaturedExcerpt { item, excerpt })
            })
            .collect()
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl Catalog for PgCatalog {
    #[instrument(skip(self))]
    async fn featured_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<FeaturedExcerpt>> {
        let sql = format!(
            "{} WHERE {HAS_EXCERPT} \
             AND b.short_last_featured_at >= $1 AND b.short_last_featured_at < $2 \
             ORDER BY b.short_last_featured_at ASC, b.created_at DESC, b.id DESC \
             LIMIT $3",
            Self::projection(fields)
        );
        let rows: Vec<ItemRow> = sqlx::query_as(&sql)
            .bind(start)
            .bind(end)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        self.to_excerpts(rows)
    }

    #[instrument(skip(self, exclude))]
    async fn eligible_for_feature(
        &self,
        cutoff: DateTime<Utc>,
        exclude: &[ItemId],
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<FeaturedExcerpt>> {
        let sql = format!(
            "{} WHERE {HAS_EXCERPT} \
             AND (b.short_last_featured_at IS NULL OR b.short_last_featured_at < $1) \
             AND NOT (b.id = ANY($2)) \
             ORDER BY b.short_last_featured_at ASC NULLS FIRST, b.id ASC \
             LIMIT $3",
            Self::projection(fields)
        );
        let rows: Vec<ItemRow> = sqlx::query_as(&sql)
            .bind(cutoff)
            .bind(exclude)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        self.to_excerpts(rows)
    }

    #[instrument(skip(self, exclude))]
    async fn previously_featured(
        &self,
        exclude: &[ItemId],
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<FeaturedExcerpt>> {
        let sql = format!(
            "{} WHERE {HAS_EXCERPT} \
             AND b.short_last_featured_at IS NOT NULL \
             AND NOT (b.id = ANY($1)) \
             ORDER BY b.short_last_featured_at ASC, b.id ASC \
             LIMIT $2",
            Self::projection(fields)
        );
        let rows: Vec<ItemRow> = sqlx::query_as(&sql)
            .bind(exclude)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        self.to_excerpts(rows)
    }

    #[instrument(skip(self))]
    async fn stamp_featured(&self, ids: &[ItemId], at: DateTime<Utc>) -> AppResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE books
            SET short_last_featured_at = $1
            WHERE id = ANY($2)
            "#,
        )
        .bind(at)
        .bind(ids)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != ids.len() as u64 {
            tx.rollback().await?;
            return Err(AppError::Internal(format!(
                "stamped {} of {} featured items",
                result.rows_affected(),
                ids.len()
            )));
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, exclude))]
    async fn related_by_categories(
        &self,
        categories: &[String],
        exclude: &[ItemId],
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<ContentItemRef>> {
        let sql = format!(
            "{} WHERE EXISTS ( \
                 SELECT 1 FROM book_categories bc \
                 JOIN categories c ON c.id = bc.category_id \
                 WHERE bc.book_id = b.id AND c.slug = ANY($1)) \
             AND NOT (b.id = ANY($2)) \
             ORDER BY b.updated_at DESC, b.id DESC \
             LIMIT $3",
            Self::projection(fields)
        );
        let rows: Vec<ItemRow> = sqlx::query_as(&sql)
            .bind(categories)
            .bind(exclude)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        self.to_items(rows)
    }

    #[instrument(skip(self, exclude))]
    async fn newest(
        &self,
        exclude: &[ItemId],
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<ContentItemRef>> {
        let sql = format!(
            "{} WHERE NOT (b.id = ANY($1)) \
             ORDER BY b.created_at DESC, b.id DESC \
             LIMIT $2",
            Self::projection(fields)
        );
        let rows: Vec<ItemRow> = sqlx::query_as(&sql)
            .bind(exclude)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        self.to_items(rows)
    }

    #[instrument(skip(self))]
    async fn trending(
        &self,
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<ContentItemRef>> {
        let sql = format!(
            "{} WHERE {HAS_EXCERPT} \
             ORDER BY b.short_last_featured_at DESC NULLS LAST, b.id DESC \
             LIMIT $1",
            Self::projection(fields)
        );
        let rows: Vec<ItemRow> = sqlx::query_as(&sql)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        self.to_items(rows)
    }

    #[instrument(skip(self))]
    async fn continue_reading(
        &self,
        user_id: Uuid,
        limit: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<ContentItemRef>> {
        let sql = format!(
            "{} JOIN reading_progress rp ON rp.book_id = b.id \
             WHERE rp.user_id = $1 AND NOT rp.finished \
             ORDER BY rp.updated_at DESC \
             LIMIT $2",
            Self::projection(fields)
        );
        let rows: Vec<ItemRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        self.to_items(rows)
    }
}

#[async_trait]
impl EventSink for PgCatalog {
    async fn insert_views(&self, events: &[IngestionEvent]) -> AppResult<u64> {
        if events.is_empty() {
            return Ok(0);
        }

        let (item_ids, observed): (Vec<i64>, Vec<DateTime<Utc>>) = events
            .iter()
            .map(|e| (e.item_id, e.observed_at))
            .unzip();

        let result = sqlx::query(
            r#"
            INSERT INTO book_views (book_id, viewed_at)
            SELECT * FROM UNNEST($1::bigint[], $2::timestamptz[])
            "#,
        )
        .bind(&item_ids)
        .bind(&observed)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_respects_field_options() {
        let lite = PgCatalog::projection(FieldOptions {
            lite: true,
            include_summary: false,
        });
        assert!(lite.contains("ARRAY[]::text[] AS categories"));
        assert!(lite.contains("NULL::text AS summary"));

        let full = PgCatalog::projection(FieldOptions {
            lite: false,
            include_summary: true,
        });
        assert!(full.contains("JOIN categories c"));
        assert!(full.contains("NULLIF(BTRIM(b.summary), '') AS summary"));
    }

    fn row(id: i64, slug: &str, excerpt: Option<&str>) -> ItemRow {
        ItemRow {
            id,
            slug: slug.to_string(),
            title: "Middlemarch".to_string(),
            author: "George Eliot".to_string(),
            categories: vec!["classics".to_string(), "fiction".to_string()],
            summary: None,
            excerpt: excerpt.map(str::to_string),
        }
    }

    fn catalog() -> PgCatalog {
        // connect_lazy never touches the network until a query runs
        let pool = PgPool::connect_lazy("postgres://localhost/unused").unwrap();
        PgCatalog::new(pool, "https://books.example.com/")
    }

    #[tokio::test]
    async fn test_rows_map_to_items_with_canonical_url() {
        let items = catalog()
            .to_items(vec![row(3, "middlemarch", None)])
            .unwrap();
        assert_eq!(items[0].url, "https://books.example.com/books/middlemarch");
        assert_eq!(items[0].categories.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_excerpt_is_data_shape() {
        let err = catalog()
            .to_excerpts(vec![row(3, "middlemarch", Some("  "))])
            .unwrap_err();
        assert!(matches!(err, AppError::DataShape(_)));

        let err = catalog().to_items(vec![row(4, "", None)]).unwrap_err();
        assert!(matches!(err, AppError::DataShape(_)));
    }
}
