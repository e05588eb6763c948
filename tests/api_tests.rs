use std::{sync::Arc, time::Duration};

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use chrono::{TimeDelta, Utc};
use serde_json::Value;
use uuid::Uuid;

use feed_engine::{
    api::{create_router, AppState},
    config::{FeedSettings, IngestionSettings},
    db::MemoryStore,
    services::catalog::memory::{CatalogItem, Fault, MemoryCatalog},
};

fn seeded_catalog() -> Arc<MemoryCatalog> {
    let base = Utc::now() - TimeDelta::days(365);
    let topics = ["history", "poetry", "science"];
    Arc::new(MemoryCatalog::with_items(
        (1..=24)
            .map(|id| {
                CatalogItem::new(id, &format!("Book {}", id))
                    .author("A. Writer")
                    .categories(&["fiction", topics[(id % 3) as usize]])
                    .summary("A summary worth reading")
                    .excerpt("The opening paragraph")
                    .created_at(base + TimeDelta::days(id))
            })
            .collect(),
    ))
}

fn create_test_server(catalog: Arc<MemoryCatalog>) -> (TestServer, AppState) {
    let feed_settings = FeedSettings {
        block_timeout: Duration::from_millis(500),
        ..FeedSettings::default()
    };
    let ingestion = IngestionSettings {
        flush_interval: Duration::from_secs(60),
        ..IngestionSettings::default()
    };
    let state = AppState::from_parts(
        catalog.clone(),
        catalog,
        Arc::new(MemoryStore::new()),
        feed_settings,
        &ingestion,
    );
    let server = TestServer::new(create_router(state.clone())).unwrap();
    (server, state)
}

fn user_header() -> HeaderName {
    HeaderName::from_static("x-user-id")
}

#[tokio::test]
async fn test_health_check() {
    let (server, _) = create_test_server(seeded_catalog());
    let response = server.get("/health").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["ingestion"]["accepted"], 0);
}

#[tokio::test]
async fn test_feed_envelope_and_cache_header() {
    let (server, _) = create_test_server(seeded_catalog());
    let response = server.get("/api/v1/feed").await;
    response.assert_status_ok();

    assert_eq!(
        response.header("cache-control").to_str().unwrap(),
        "private, max-age=120"
    );

    let body: Value = response.json();
    assert_eq!(body["status"], "success");
    let data = &body["data"];
    assert_eq!(data["shorts"].as_array().unwrap().len(), 5);
    assert_eq!(data["recommended"].as_array().unwrap().len(), 10);
    assert_eq!(data["newest"].as_array().unwrap().len(), 10);
    assert!(data["continue_reading"].as_array().unwrap().is_empty());

    let short = &data["shorts"][0];
    assert!(short["excerpt"].is_string());
    assert!(short["url"].as_str().unwrap().contains("/books/"));
    assert!(short["categories"].as_array().unwrap().len() >= 1);
    assert!(short.get("summary").is_none());
}

#[tokio::test]
async fn test_limits_are_clamped() {
    let (server, _) = create_test_server(seeded_catalog());
    let response = server
        .get("/api/v1/feed")
        .add_query_param("shorts", 500)
        .add_query_param("recs", 0)
        .add_query_param("newest", 2)
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    // 24 candidates exist; shorts stop at the maximum of 20.
    assert_eq!(body["data"]["shorts"].as_array().unwrap().len(), 20);
    assert!(body["data"]["recommended"].as_array().unwrap().is_empty());
    assert_eq!(body["data"]["newest"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_lite_and_summary_flags() {
    let (server, _) = create_test_server(seeded_catalog());
    let response = server
        .get("/api/v1/feed")
        .add_query_param("lite", true)
        .add_query_param("summary", true)
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    let data = &body["data"];
    for section in ["shorts", "recommended", "newest"] {
        for item in data[section].as_array().unwrap() {
            assert!(item.get("categories").is_none(), "{} kept categories", section);
            assert_eq!(item["summary"], "A summary worth reading");
        }
    }
}

#[tokio::test]
async fn test_invalid_user_header_rejected() {
    let (server, _) = create_test_server(seeded_catalog());
    let response = server
        .get("/api/v1/feed")
        .add_header(user_header(), HeaderValue::from_static("not-a-uuid"))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let body: Value = response.json();
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_continue_reading_for_identified_user() {
    let catalog = seeded_catalog();
    let user = Uuid::new_v4();
    catalog
        .record_progress(user, 3, Utc::now() - TimeDelta::hours(2))
        .await;
    catalog.record_progress(user, 9, Utc::now()).await;
    let (server, _) = create_test_server(catalog);

    let response = server
        .get("/api/v1/feed")
        .add_header(
            user_header(),
            HeaderValue::from_str(&user.to_string()).unwrap(),
        )
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    let ids: Vec<i64> = body["data"]["continue_reading"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![9, 3]);
}

#[tokio::test]
async fn test_failing_trending_still_serves_feed() {
    let catalog = seeded_catalog();
    catalog.inject("trending", Fault::Error);
    let (server, _) = create_test_server(catalog);

    let response = server.get("/api/v1/feed").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert!(body["data"]["trending"].as_array().unwrap().is_empty());
    assert_eq!(body["data"]["shorts"].as_array().unwrap().len(), 5);
    assert_eq!(body["data"]["newest"].as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn test_required_failure_is_generic_500() {
    let catalog = seeded_catalog();
    catalog.inject("featured_between", Fault::Error);
    let (server, _) = create_test_server(catalog);

    let response = server.get("/api/v1/feed").await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);

    let body: Value = response.json();
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "internal server error");
}

#[tokio::test]
async fn test_invalidate_refreshes_cached_feed() {
    let catalog = seeded_catalog();
    let (server, _) = create_test_server(catalog.clone());

    let first: Value = server.get("/api/v1/feed").await.json();

    catalog
        .insert(CatalogItem::new(500, "Just Published").created_at(Utc::now()))
        .await;
    let cached: Value = server.get("/api/v1/feed").await.json();
    assert_eq!(cached, first);

    let response = server.post("/api/v1/admin/feed/invalidate").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["version"], 2);

    let refreshed: Value = server.get("/api/v1/feed").await.json();
    assert_eq!(refreshed["data"]["newest"][0]["id"], 500);

    let body: Value = server.post("/api/v1/admin/feed/invalidate").await.json();
    assert_eq!(body["data"]["version"], 3);
}

#[tokio::test]
async fn test_record_view_is_accepted_and_persisted() {
    let catalog = seeded_catalog();
    let (server, state) = create_test_server(catalog.clone());

    for _ in 0..3 {
        server
            .post("/api/v1/items/7/views")
            .await
            .assert_status(StatusCode::ACCEPTED);
    }

    state.views.shutdown().await;

    let views = catalog.views().await;
    assert_eq!(views.len(), 3);
    assert!(views.iter().all(|event| event.item_id == 7));
    assert_eq!(state.views.snapshot().persisted, 3);
}

#[tokio::test]
async fn test_record_view_rejects_bad_ids() {
    let (server, _) = create_test_server(seeded_catalog());
    server
        .post("/api/v1/items/seven/views")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_request_id_round_trip() {
    let (server, _) = create_test_server(seeded_catalog());

    let response = server
        .get("/health")
        .add_header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("edge-1234"),
        )
        .await;
    assert_eq!(
        response.header("x-request-id").to_str().unwrap(),
        "edge-1234"
    );

    let response = server.get("/health").await;
    let generated = response.header("x-request-id");
    assert!(Uuid::parse_str(generated.to_str().unwrap()).is_ok());
}
