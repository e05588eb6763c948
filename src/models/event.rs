use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ItemId;

/// A single "item viewed" engagement event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionEvent {
    pub item_id: ItemId,
    pub observed_at: DateTime<Utc>,
}

impl IngestionEvent {
    pub fn viewed_now(item_id: ItemId) -> Self {
        Self {
            item_id,
            observed_at: Utc::now(),
        }
    }
}
