use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ContentItemRef, FeaturedExcerpt};

pub const MAX_SHORTS: usize = 20;
pub const MAX_RECOMMENDATIONS: usize = 50;
pub const MAX_SECTION_ITEMS: usize = 50;

/// The assembled "for you" response. Order inside every section is ranking
/// order and survives caching.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeedSections {
    pub shorts: Vec<FeaturedExcerpt>,
    pub recommended: Vec<ContentItemRef>,
    pub trending: Vec<ContentItemRef>,
    pub newest: Vec<ContentItemRef>,
    pub continue_reading: Vec<ContentItemRef>,
}

/// Per-request section sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectionLimits {
    pub shorts: usize,
    pub recommendations: usize,
    pub trending: usize,
    pub newest: usize,
    pub continue_reading: usize,
}

impl Default for SelectionLimits {
    fn default() -> Self {
        Self {
            shorts: 5,
            recommendations: 10,
            trending: 10,
            newest: 10,
            continue_reading: 10,
        }
    }
}

impl SelectionLimits {
    /// Bounds caller-supplied sizes to the supported maxima
    pub fn clamped(self) -> Self {
        Self {
            shorts: self.shorts.min(MAX_SHORTS),
            recommendations: self.recommendations.min(MAX_RECOMMENDATIONS),
            trending: self.trending.min(MAX_SECTION_ITEMS),
            newest: self.newest.min(MAX_SECTION_ITEMS),
            continue_reading: self.continue_reading.min(MAX_SECTION_ITEMS),
        }
    }

    /// Compact form used inside cache keys
    pub fn cache_tag(&self) -> String {
        format!(
            "s{}r{}t{}n{}c{}",
            self.shorts, self.recommendations, self.trending, self.newest, self.continue_reading
        )
    }
}

/// Optional payload weight toggles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldOptions {
    /// Omit category slugs
    pub lite: bool,
    /// Include summary text when the item has one
    pub include_summary: bool,
}

impl FieldOptions {
    pub fn cache_tag(&self) -> String {
        format!("l{}s{}", self.lite as u8, self.include_summary as u8)
    }
}

/// One feed assembly request, already authenticated and parsed
#[derive(Debug, Clone)]
pub struct FeedRequest {
    pub user_id: Option<Uuid>,
    pub limits: SelectionLimits,
    pub fields: FieldOptions,
    pub now: DateTime<Utc>,
}

impl FeedRequest {
    pub fn new(limits: SelectionLimits, fields: FieldOptions) -> Self {
        Self {
            user_id: None,
            limits: limits.clamped(),
            fields,
            now: Utc::now(),
        }
    }

    pub fn for_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}
