//! Feed payload and request types shared by the services and the API layer.

mod content;
mod event;
mod feed;

pub use content::{ContentItemRef, FeaturedExcerpt, ItemId};
pub use event::IngestionEvent;
pub use feed::{
    FeedRequest, FeedSections, FieldOptions, SelectionLimits, MAX_RECOMMENDATIONS,
    MAX_SECTION_ITEMS, MAX_SHORTS,
};

#[cfg(test)]
pub(crate) use content::item as test_item;
