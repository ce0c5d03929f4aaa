use super::*;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use std::time::Duration;
use tower::ServiceExt;


fn test_app() -> (Router, Arc<WorkQueue>) {
    let config = Arc::new(Config::default());
    let queue = Arc::new(WorkQueue::new(config.queue.recent_capacity));
    let app = create_router(queue.clone(), config).unwrap();
    (app, queue)
}

async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_api_server_spawns_and_stops() {
    let mut config = Config::default();
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();
    let queue = Arc::new(WorkQueue::new(10));
    let shutdown = CancellationToken::new();

    let handle = tokio::spawn(start_api_server(
        queue,
        Arc::new(config),
        shutdown.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_cors_enabled() {
    let (app, _queue) = test_app();

    let request = Request::builder()
        .uri("/")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let mut config = Config::default();
    config.api.cors_enabled = false;
    let app = create_router(Arc::new(WorkQueue::new(10)), Arc::new(config)).unwrap();

    let request = Request::builder()
        .uri("/")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[test]
fn test_invalid_id_pattern_is_rejected() {
    let mut config = Config::default();
    config.storage.id_pattern = "(".to_string();
    assert!(create_router(Arc::new(WorkQueue::new(10)), Arc::new(config)).is_err());
}
