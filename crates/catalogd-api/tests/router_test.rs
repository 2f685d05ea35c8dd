// SPDX-License-Identifier: GPL-3.0-or-later
use axum::body::Body;
use axum::http::{Request, StatusCode};
use catalogd_application::AppState;
use catalogd_config::AppConfig;
use catalogd_infrastructure::init_database;
use http_body_util::BodyExt;
use tower::ServiceExt;

async fn test_state() -> AppState {
    let mut config = AppConfig::default();
    config.database.url = "sqlite://:memory:".into();
    config.database.pool_max_size = 1;
    let pool = init_database(&config).await.expect("test database");
    AppState::new(config, pool)
}

#[tokio::test]
async fn health_returns_ok_status() {
    let router = catalogd_api::router(test_state().await);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn follow_artist_enqueues_sync_for_a_new_artist() {
    let router = catalogd_api::router(test_state().await);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/artists/UC123abc/follow")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["artist_id"], "UC123abc");
    assert!(json["job_id"].as_i64().is_some());
}

#[tokio::test]
async fn swagger_ui_is_mounted() {
    let router = catalogd_api::router(test_state().await);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api-doc/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
