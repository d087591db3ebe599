use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::{body::Body, http::Request, http::StatusCode};
use pm_api::auth::AuthConfig;
use pm_common::store::MemoryStore;
use tower::ServiceExt;

async fn readyz_status(app: axum::Router) -> StatusCode {
    app.oneshot(
        Request::builder()
            .uri("/readyz")
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
    .status()
}

#[tokio::test]
async fn readyz_returns_service_unavailable_when_not_ready() {
    let state = pm_api::test_state("test-key");
    state.readiness.store(false, Ordering::SeqCst);

    let status = readyz_status(pm_api::create_router(state)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn readyz_follows_store_availability() {
    let store = Arc::new(MemoryStore::new());
    let state = pm_api::test_state_with(store.clone(), AuthConfig::api_key("test-key"));
    let app = pm_api::create_router(state);

    assert_eq!(readyz_status(app.clone()).await, StatusCode::OK);

    store.set_offline(true);
    assert_eq!(readyz_status(app).await, StatusCode::SERVICE_UNAVAILABLE);
}
