use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, FixedOffset, NaiveTime, TimeDelta, TimeZone, Utc};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use sha2::{Digest, Sha256};
use tracing::instrument;

use crate::{
    error::AppResult,
    models::{FeaturedExcerpt, FieldOptions, ItemId},
    services::catalog::Catalog,
};

/// Candidate batches are at least this many times the remaining need
const OVERFETCH_FACTOR: usize = 8;
const MIN_CANDIDATES: usize = 32;

/// A calendar day in the product time zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDay {
    start: DateTime<Utc>,
    label: String,
}

impl ReferenceDay {
    /// The day containing `now`, as seen from `tz`
    pub fn containing(now: DateTime<Utc>, tz: FixedOffset) -> Self {
        let date = now.with_timezone(&tz).date_naive();
        let local_midnight = date.and_time(NaiveTime::MIN);
        let start = Utc.from_utc_datetime(
            &(local_midnight - TimeDelta::seconds(i64::from(tz.local_minus_utc()))),
        );

        Self {
            start,
            label: date.format("%Y-%m-%d").to_string(),
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + TimeDelta::hours(24)
    }

    /// `YYYY-MM-DD` in the product time zone
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Shuffle seed: the first 8 bytes of SHA-256 over the day label
    pub fn seed(&self) -> u64 {
        let digest = Sha256::digest(self.label.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }
}

/// Shuffles with a generator seeded from `seed`; equal seeds give equal orders.
pub fn seeded_shuffle<T>(items: &mut [T], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    items.shuffle(&mut rng);
}

/// Picks the day's featured excerpts
///
/// Three tiers, stopping once `count` are collected:
/// 1. items already stamped for this day (keeps repeated calls stable),
/// 2. items never featured or out of cooldown, shuffled with the day seed,
/// 3. any previously featured item, least recent first, shuffled the same way.
///
/// Newly chosen items are then stamped with the day start in one write.
/// A failed stamp is logged and the picks are still returned.
pub struct DailySelector {
    catalog: Arc<dyn Catalog>,
    cooldown: TimeDelta,
}

impl DailySelector {
    pub fn new(catalog: Arc<dyn Catalog>, cooldown_days: i64) -> Self {
        Self {
            catalog,
            cooldown: TimeDelta::days(cooldown_days),
        }
    }

    #[instrument(skip(self, day), fields(day = %day.label()))]
    pub async fn select(
        &self,
        day: &ReferenceDay,
        count: usize,
        fields: FieldOptions,
    ) -> AppResult<Vec<FeaturedExcerpt>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        // Categories drive the recommendation pass, so they are always loaded
        // here and stripped later for lite payloads.
        let fields = FieldOptions {
            lite: false,
            ..fields
        };

        let mut picks = Vec::with_capacity(count);
        let mut seen = HashSet::new();

        let today = self
            .catalog
            .featured_between(day.start(), day.end(), count, fields)
            .await?;
        take_unique(&mut picks, &mut seen, today, count);
        let already_stamped: HashSet<ItemId> = seen.clone();

        if picks.len() < count {
            let need = count - picks.len();
            let exclude: Vec<ItemId> = seen.iter().copied().collect();
            let mut candidates = self
                .catalog
                .eligible_for_feature(
                    day.start() - self.cooldown,
                    &exclude,
                    overfetch(need),
                    fields,
                )
                .await?;
            seeded_shuffle(&mut candidates, day.seed());
            take_unique(&mut picks, &mut seen, candidates, count);
        }

        if picks.len() < count {
            let need = count - picks.len();
            let exclude: Vec<ItemId> = seen.iter().copied().collect();
            let mut candidates = self
                .catalog
                .previously_featured(&exclude, overfetch(need), fields)
                .await?;
            seeded_shuffle(&mut candidates, day.seed());
            take_unique(&mut picks, &mut seen, candidates, count);
        }

        let fresh: Vec<ItemId> = picks
            .iter()
            .map(FeaturedExcerpt::id)
            .filter(|id| !already_stamped.contains(id))
            .collect();

        if !fresh.is_empty() {
            if let Err(e) = self.catalog.stamp_featured(&fresh, day.start()).await {
                tracing::warn!(
                    error = %e,
                    count = fresh.len(),
                    "Failed to stamp featured items; they may be picked again"
                );
            }
        }

        tracing::debug!(
            picked = picks.len(),
            carried_over = already_stamped.len(),
            "Daily selection complete"
        );

        Ok(picks)
    }
}

fn overfetch(need: usize) -> usize {
    need.saturating_mul(OVERFETCH_FACTOR).max(MIN_CANDIDATES)
}

fn take_unique(
    picks: &mut Vec<FeaturedExcerpt>,
    seen: &mut HashSet<ItemId>,
    candidates: Vec<FeaturedExcerpt>,
    count: usize,
) {
    for candidate in candidates {
        if picks.len() >= count {
            break;
        }
        if seen.insert(candidate.id()) {
            picks.push(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::{
        memory::{CatalogItem, Fault, MemoryCatalog},
        MockCatalog,
    };

    fn day(y: i32, m: u32, d: u32) -> ReferenceDay {
        ReferenceDay::containing(
            Utc.with_ymd_and_hms(y, m, d, 15, 30, 0).unwrap(),
            FixedOffset::east_opt(0).unwrap(),
        )
    }

    fn ids(picks: &[FeaturedExcerpt]) -> Vec<ItemId> {
        picks.iter().map(FeaturedExcerpt::id).collect()
    }

    fn eligible_catalog(n: i64) -> MemoryCatalog {
        MemoryCatalog::with_items(
            (1..=n)
                .map(|id| {
                    CatalogItem::new(id, &format!("Book {}", id))
                        .categories(&["fiction"])
                        .excerpt("Call me Ishmael.")
                })
                .collect(),
        )
    }

    #[test]
    fn test_reference_day_in_offset_zone() {
        let tz = FixedOffset::east_opt(-5 * 3600).unwrap();
        // 03:00 UTC on the 2nd is still the 1st in UTC-5
        let day = ReferenceDay::containing(Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).unwrap(), tz);
        assert_eq!(day.label(), "2026-03-01");
        assert_eq!(day.start(), Utc.with_ymd_and_hms(2026, 3, 1, 5, 0, 0).unwrap());
        assert_eq!(day.end() - day.start(), TimeDelta::hours(24));
    }

    #[test]
    fn test_seed_depends_only_on_day() {
        assert_eq!(day(2026, 3, 1).seed(), day(2026, 3, 1).seed());
        assert_ne!(day(2026, 3, 1).seed(), day(2026, 3, 2).seed());
    }

    #[tokio::test]
    async fn test_zero_count_never_queries() {
        // No expectations: any catalog call would panic
        let catalog = MockCatalog::new();
        let selector = DailySelector::new(Arc::new(catalog), 90);

        let picks = selector
            .select(&day(2026, 3, 1), 0, FieldOptions::default())
            .await
            .unwrap();
        assert!(picks.is_empty());
    }

    #[tokio::test]
    async fn test_already_featured_today_comes_first() {
        let today = day(2026, 3, 10);
        let catalog = Arc::new(MemoryCatalog::with_items(vec![
            CatalogItem::new(1, "Fresh One").excerpt("a"),
            CatalogItem::new(2, "Fresh Two").excerpt("b"),
            CatalogItem::new(3, "Fresh Three").excerpt("c"),
            CatalogItem::new(10, "Morning Pick")
                .excerpt("d")
                .featured_at(today.start()),
            CatalogItem::new(11, "Later Pick")
                .excerpt("e")
                .featured_at(today.start() + TimeDelta::hours(2)),
        ]));
        let selector = DailySelector::new(catalog.clone(), 90);

        let picks = selector
            .select(&today, 5, FieldOptions::default())
            .await
            .unwrap();
        let picked = ids(&picks);

        assert_eq!(picked.len(), 5);
        assert_eq!(&picked[..2], &[10, 11]);
        let mut rest = picked[2..].to_vec();
        rest.sort();
        assert_eq!(rest, vec![1, 2, 3]);

        for id in [1, 2, 3] {
            assert_eq!(catalog.last_featured_at(id).await, Some(today.start()));
        }
        // Already stamped today, left untouched
        assert_eq!(
            catalog.last_featured_at(11).await,
            Some(today.start() + TimeDelta::hours(2))
        );
    }

    #[tokio::test]
    async fn test_same_day_same_catalog_state_is_deterministic() {
        let today = day(2026, 3, 10);
        let first = DailySelector::new(Arc::new(eligible_catalog(40)), 90)
            .select(&today, 6, FieldOptions::default())
            .await
            .unwrap();
        let second = DailySelector::new(Arc::new(eligible_catalog(40)), 90)
            .select(&today, 6, FieldOptions::default())
            .await
            .unwrap();
        assert_eq!(ids(&first), ids(&second));

        let other_day = DailySelector::new(Arc::new(eligible_catalog(40)), 90)
            .select(&day(2026, 3, 11), 6, FieldOptions::default())
            .await
            .unwrap();
        assert_ne!(ids(&first), ids(&other_day));
    }

    #[tokio::test]
    async fn test_repeated_calls_in_a_day_return_the_same_set() {
        let today = day(2026, 3, 10);
        let catalog = Arc::new(eligible_catalog(40));
        let selector = DailySelector::new(catalog, 90);

        let mut first = ids(&selector.select(&today, 5, FieldOptions::default()).await.unwrap());
        let mut again = ids(&selector.select(&today, 5, FieldOptions::default()).await.unwrap());
        first.sort();
        again.sort();
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn test_cooldown_boundary_in_eligible_pool() {
        let featured_on = day(2026, 1, 1);
        let catalog = MemoryCatalog::with_items(vec![
            CatalogItem::new(1, "Never Featured").excerpt("x"),
            CatalogItem::new(99, "Recently Featured")
                .excerpt("y")
                .featured_at(featured_on.start()),
        ]);
        let cooldown = TimeDelta::days(90);

        for offset in [1, 30, 60, 89, 90] {
            let later = ReferenceDay::containing(
                featured_on.start() + TimeDelta::days(offset),
                FixedOffset::east_opt(0).unwrap(),
            );
            let pool = catalog
                .eligible_for_feature(later.start() - cooldown, &[], 10, FieldOptions::default())
                .await
                .unwrap();
            assert_eq!(ids(&pool), vec![1], "eligible during cooldown at +{}d", offset);
        }

        let after = ReferenceDay::containing(
            featured_on.start() + TimeDelta::days(91),
            FixedOffset::east_opt(0).unwrap(),
        );
        let pool = catalog
            .eligible_for_feature(after.start() - cooldown, &[], 10, FieldOptions::default())
            .await
            .unwrap();
        let mut pool = ids(&pool);
        pool.sort_unstable();
        assert_eq!(pool, vec![1, 99]);
    }

    #[tokio::test]
    async fn test_tier_two_cutoff_is_day_start_minus_cooldown() {
        let today = day(2026, 4, 1);
        let expected_cutoff = today.start() - TimeDelta::days(90);

        let mut catalog = MockCatalog::new();
        catalog
            .expect_featured_between()
            .times(1)
            .returning(|_, _, _, _| Ok(Vec::new()));
        catalog
            .expect_eligible_for_feature()
            .withf(move |cutoff, exclude, _, _| *cutoff == expected_cutoff && exclude.is_empty())
            .times(1)
            .returning(|_, _, _, _| {
                Ok(vec![FeaturedExcerpt {
                    item: crate::models::test_item(99, &["poetry"]),
                    excerpt: "y".to_string(),
                }])
            });
        catalog
            .expect_stamp_featured()
            .withf(|stamped, _| stamped.to_vec() == vec![99])
            .times(1)
            .returning(|_, _| Ok(()));

        let selector = DailySelector::new(Arc::new(catalog), 90);
        let picks = selector
            .select(&today, 1, FieldOptions::default())
            .await
            .unwrap();
        assert_eq!(ids(&picks), vec![99]);
    }

    #[tokio::test]
    async fn test_soft_fallback_when_everything_is_cooling_down() {
        let today = day(2026, 3, 10);
        let catalog = Arc::new(MemoryCatalog::with_items(
            (1..=4)
                .map(|id| {
                    CatalogItem::new(id, &format!("Book {}", id))
                        .excerpt("x")
                        .featured_at(today.start() - TimeDelta::days(id))
                })
                .collect(),
        ));
        let selector = DailySelector::new(catalog.clone(), 90);

        let picks = selector.select(&today, 3, FieldOptions::default()).await.unwrap();
        let picked: HashSet<ItemId> = ids(&picks).into_iter().collect();
        assert_eq!(picked.len(), 3);
        assert!(picked.iter().all(|id| (1..=4).contains(id)));
        for id in picked {
            assert_eq!(catalog.last_featured_at(id).await, Some(today.start()));
        }
    }

    #[tokio::test]
    async fn test_short_catalog_returns_what_exists() {
        let picks = DailySelector::new(Arc::new(eligible_catalog(2)), 90)
            .select(&day(2026, 3, 10), 5, FieldOptions::default())
            .await
            .unwrap();
        assert_eq!(picks.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_stamp_still_returns_picks() {
        let catalog = Arc::new(eligible_catalog(5));
        catalog.inject("stamp_featured", Fault::Error);
        let selector = DailySelector::new(catalog.clone(), 90);

        let picks = selector
            .select(&day(2026, 3, 10), 3, FieldOptions::default())
            .await
            .unwrap();
        assert_eq!(picks.len(), 3);
        for id in ids(&picks) {
            assert_eq!(catalog.last_featured_at(id).await, None);
        }
    }

    #[tokio::test]
    async fn test_categories_loaded_even_for_lite_requests() {
        let picks = DailySelector::new(Arc::new(eligible_catalog(3)), 90)
            .select(
                &day(2026, 3, 10),
                3,
                FieldOptions {
                    lite: true,
                    include_summary: false,
                },
            )
            .await
            .unwrap();
        assert!(picks.iter().all(|p| p.item.categories.contains("fiction")));
    }
}
