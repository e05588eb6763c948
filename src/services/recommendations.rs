use std::collections::{BTreeSet, HashSet};

use rand::seq::SliceRandom;

use crate::{
    error::AppResult,
    models::{ContentItemRef, FeaturedExcerpt, FieldOptions, ItemId},
    services::catalog::Catalog,
};

/// How many related candidates are fetched per requested recommendation
const CANDIDATE_FACTOR: usize = 2;

/// Expands the day's featured excerpts into category-based recommendations
///
/// Items sharing at least one category with the featured set are fetched by
/// recent activity, shuffled with a fresh per-request seed and cut to `count`.
/// Featured items never reappear. With no categories to go on (empty catalog,
/// nothing featured) this falls back to the newest items.
pub async fn get_recommendations(
    catalog: &dyn Catalog,
    featured: &[FeaturedExcerpt],
    count: usize,
    fields: FieldOptions,
) -> AppResult<Vec<ContentItemRef>> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let exclude: Vec<ItemId> = featured.iter().map(FeaturedExcerpt::id).collect();
    let categories: Vec<String> = featured
        .iter()
        .flat_map(|f| f.item.categories.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut candidates = if categories.is_empty() {
        tracing::debug!("No featured categories, recommending newest items");
        catalog.newest(&exclude, count, fields).await?
    } else {
        let mut related = catalog
            .related_by_categories(
                &categories,
                &exclude,
                count.saturating_mul(CANDIDATE_FACTOR),
                fields,
            )
            .await?;
        related.shuffle(&mut rand::rng());
        related
    };

    let mut seen: HashSet<ItemId> = exclude.into_iter().collect();
    candidates.retain(|item| seen.insert(item.id));
    candidates.truncate(count);

    tracing::debug!(
        categories = categories.len(),
        recommended = candidates.len(),
        "Recommendations expanded"
    );

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::test_item, services::catalog::MockCatalog};

    fn featured(id: ItemId, categories: &[&str]) -> FeaturedExcerpt {
        FeaturedExcerpt {
            item: test_item(id, categories),
            excerpt: "excerpt".to_string(),
        }
    }

    #[tokio::test]
    async fn test_zero_count_never_queries() {
        let catalog = MockCatalog::new();
        let recs = get_recommendations(
            &catalog,
            &[featured(1, &["poetry"])],
            0,
            FieldOptions::default(),
        )
        .await
        .unwrap();
        assert!(recs.is_empty());
    }

    #[tokio::test]
    async fn test_queries_featured_categories_and_excludes_featured() {
        let mut catalog = MockCatalog::new();
        catalog
            .expect_related_by_categories()
            .withf(|categories, exclude, limit, _| {
                categories.to_vec() == vec!["essays".to_string(), "poetry".to_string()]
                    && exclude.to_vec() == vec![1, 2]
                    && *limit == 6
            })
            .times(1)
            .returning(|_, _, _, _| {
                // A featured id slipping through must still be filtered out
                Ok(vec![
                    test_item(2, &["poetry"]),
                    test_item(10, &["poetry"]),
                    test_item(11, &["essays"]),
                    test_item(12, &["essays"]),
                    test_item(13, &["essays"]),
                    test_item(13, &["essays"]),
                ])
            });

        let recs = get_recommendations(
            &catalog,
            &[featured(1, &["poetry"]), featured(2, &["essays", "poetry"])],
            3,
            FieldOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(recs.len(), 3);
        let ids: HashSet<ItemId> = recs.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 3);
        assert!(!ids.contains(&1) && !ids.contains(&2));
    }

    #[tokio::test]
    async fn test_falls_back_to_newest_without_categories() {
        let mut catalog = MockCatalog::new();
        catalog
            .expect_newest()
            .withf(|exclude, limit, _| exclude.is_empty() && *limit == 4)
            .times(1)
            .returning(|_, _, _| Ok(vec![test_item(5, &[]), test_item(4, &[])]));

        let recs = get_recommendations(&catalog, &[], 4, FieldOptions::default())
            .await
            .unwrap();
        let ids: Vec<ItemId> = recs.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![5, 4]);
    }

    #[tokio::test]
    async fn test_errors_propagate() {
        let mut catalog = MockCatalog::new();
        catalog
            .expect_related_by_categories()
            .returning(|_, _, _, _| Err(crate::error::AppError::Internal("down".to_string())));

        let result =
            get_recommendations(&catalog, &[featured(1, &["poetry"])], 3, FieldOptions::default())
                .await;
        assert!(result.is_err());
    }
}
