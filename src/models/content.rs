use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::FieldOptions;

/// Catalog identifier of a content item
pub type ItemId = i64;

/// Minimal read-time projection of a catalog item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentItemRef {
    pub id: ItemId,
    pub slug: String,
    pub title: String,
    /// Display name of the primary author
    pub author: String,
    /// Category slugs. Empty (and omitted from JSON) for lite payloads.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub categories: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub url: String,
}

impl ContentItemRef {
    /// Drops the optional payload weight the caller did not ask for
    pub fn apply_fields(mut self, fields: FieldOptions) -> Self {
        if fields.lite {
            self.categories.clear();
        }
        if !fields.include_summary {
            self.summary = None;
        }
        if self.summary.as_deref().is_some_and(|s| s.trim().is_empty()) {
            self.summary = None;
        }
        self
    }
}

/// A content item together with its featured excerpt ("short")
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeaturedExcerpt {
    #[serde(flatten)]
    pub item: ContentItemRef,
    pub excerpt: String,
}

impl FeaturedExcerpt {
    pub fn id(&self) -> ItemId {
        self.item.id
    }

    pub fn apply_fields(self, fields: FieldOptions) -> Self {
        Self {
            item: self.item.apply_fields(fields),
            excerpt: self.excerpt,
        }
    }
}

#[cfg(test)]
pub(crate) fn item(id: ItemId, categories: &[&str]) -> ContentItemRef {
    ContentItemRef {
        id,
        slug: format!("item-{}", id),
        title: format!("Item {}", id),
        author: "Ann Author".to_string(),
        categories: categories.iter().map(|c| c.to_string()).collect(),
        summary: Some(format!("Summary of item {}", id)),
        url: format!("https://example.com/books/item-{}", id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lite_strips_categories() {
        let trimmed = item(1, &["fiction", "poetry"]).apply_fields(FieldOptions {
            lite: true,
            include_summary: true,
        });
        assert!(trimmed.categories.is_empty());
        assert!(trimmed.summary.is_some());

        let json = serde_json::to_value(&trimmed).unwrap();
        assert!(json.get("categories").is_none());
    }

    #[test]
    fn test_summary_only_when_requested_and_non_empty() {
        let without = item(1, &["fiction"]).apply_fields(FieldOptions::default());
        assert_eq!(without.summary, None);
        assert_eq!(without.categories.len(), 1);

        let mut blank = item(2, &[]);
        blank.summary = Some("   ".to_string());
        let blank = blank.apply_fields(FieldOptions {
            lite: false,
            include_summary: true,
        });
        assert_eq!(blank.summary, None);
    }

    #[test]
    fn test_featured_excerpt_serializes_flat() {
        let short = FeaturedExcerpt {
            item: item(7, &["essays"]),
            excerpt: "It was a bright cold day".to_string(),
        };
        let json = serde_json::to_value(&short).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["excerpt"], "It was a bright cold day");
        assert_eq!(json["categories"][0], "essays");

        let back: FeaturedExcerpt = serde_json::from_value(json).unwrap();
        assert_eq!(back, short);
    }
}
