use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{FeedRequest, FieldOptions, ItemId, SelectionLimits},
};

use super::AppState;

/// Header carrying the caller identity, set by the upstream auth gateway
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    pub shorts: Option<usize>,
    pub recs: Option<usize>,
    pub trending: Option<usize>,
    pub newest: Option<usize>,
    #[serde(rename = "continue")]
    pub continue_reading: Option<usize>,
    pub lite: Option<bool>,
    pub summary: Option<bool>,
}

impl FeedQuery {
    fn limits(&self) -> SelectionLimits {
        let defaults = SelectionLimits::default();
        SelectionLimits {
            shorts: self.shorts.unwrap_or(defaults.shorts),
            recommendations: self.recs.unwrap_or(defaults.recommendations),
            trending: self.trending.unwrap_or(defaults.trending),
            newest: self.newest.unwrap_or(defaults.newest),
            continue_reading: self.continue_reading.unwrap_or(defaults.continue_reading),
        }
    }

    fn fields(&self) -> FieldOptions {
        FieldOptions {
            lite: self.lite.unwrap_or(false),
            include_summary: self.summary.unwrap_or(false),
        }
    }
}

fn caller_identity(headers: &HeaderMap) -> AppResult<Option<Uuid>> {
    let Some(value) = headers.get(USER_ID_HEADER) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
        .map(Some)
        .ok_or_else(|| AppError::InvalidInput(format!("{} must be a UUID", USER_ID_HEADER)))
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "ingestion": state.views.snapshot(),
    }))
}

/// The "for you" feed
pub async fn get_feed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FeedQuery>,
) -> AppResult<Response> {
    let mut request = FeedRequest::new(query.limits(), query.fields());
    if let Some(user_id) = caller_identity(&headers)? {
        request = request.for_user(user_id);
    }

    let feed = state.feed.get_feed(&request).await?;
    let cache_control = format!("private, max-age={}", state.feed.cache_ttl_secs());

    Ok((
        [(header::CACHE_CONTROL, cache_control)],
        Json(json!({
            "status": "success",
            "data": feed,
        })),
    )
        .into_response())
}

/// Records an item view; never fails once the path parses
pub async fn record_view(
    State(state): State<AppState>,
    Path(item_id): Path<ItemId>,
) -> (StatusCode, Json<Value>) {
    state.views.enqueue(item_id);
    (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" })))
}

/// Catalog mutation hook: moves all feeds to a fresh cache namespace
pub async fn invalidate_feed(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let version = state.feed.catalog_mutated().await?;
    Ok(Json(json!({
        "status": "success",
        "data": { "version": version },
    })))
}
