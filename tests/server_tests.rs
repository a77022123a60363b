//! Control surface routes

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{fast_monitor_config, FakeGateway, StaticAuthenticator, StaticClassifier};
use gmail_labeler::client::MailGateway;
use gmail_labeler::controller::MonitorController;
use gmail_labeler::server;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn app_with(authenticator: StaticAuthenticator) -> (Router, Arc<MonitorController>) {
    let controller = Arc::new(MonitorController::new(
        Arc::new(authenticator),
        Arc::new(StaticClassifier::new("Others")),
        fast_monitor_config(),
    ));
    (server::router(Arc::clone(&controller)), controller)
}

fn working_app() -> (Router, Arc<MonitorController>) {
    let gateway: Arc<dyn MailGateway> = Arc::new(FakeGateway::new("314"));
    app_with(StaticAuthenticator::succeeding(gateway))
}

async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn test_root_reports_service_and_monitoring_flag() {
    let (app, _controller) = working_app();

    let (status, body) = call(&app, "GET", "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Gmail Email Logger is running");
    assert_eq!(body["monitoring"], false);
}

#[tokio::test]
async fn test_status_before_start() {
    let (app, _controller) = working_app();

    let (status, body) = call(&app, "GET", "/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["monitoring"], false);
    assert_eq!(body["authenticated"], false);
    assert_eq!(body["last_history_id"], Value::Null);
    assert_eq!(body["phase"], "stopped");
    assert_eq!(body["stats"]["ticks"], 0);
}

#[tokio::test]
async fn test_start_stop_cycle() {
    let (app, controller) = working_app();

    let (status, body) = call(&app, "GET", "/start-monitoring").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Monitoring started successfully");

    let (_, body) = call(&app, "GET", "/start-monitoring").await;
    assert_eq!(body["message"], "Monitoring is already active");

    let (_, body) = call(&app, "GET", "/status").await;
    assert_eq!(body["monitoring"], true);
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["last_history_id"], "314");
    assert_eq!(body["phase"], "running");
    assert!(body["session_id"].is_string());

    let (status, body) = call(&app, "POST", "/stop-monitoring").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Monitoring stopped");

    let (_, body) = call(&app, "GET", "/").await;
    assert_eq!(body["monitoring"], false);

    controller.shutdown().await;
}

#[tokio::test]
async fn test_stop_when_not_running_still_succeeds() {
    let (app, _controller) = working_app();

    let (status, body) = call(&app, "POST", "/stop-monitoring").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Monitoring stopped");
}

#[tokio::test]
async fn test_start_with_failed_auth_returns_500() {
    let (app, _controller) = app_with(StaticAuthenticator::failing());

    let (status, body) = call(&app, "GET", "/start-monitoring").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.contains("Authentication failed"), "detail: {}", detail);

    let (_, body) = call(&app, "GET", "/status").await;
    assert_eq!(body["monitoring"], false);
    assert_eq!(body["phase"], "stopped");
}

#[tokio::test]
async fn test_stop_requires_post() {
    let (app, _controller) = working_app();

    let (status, _) = call(&app, "GET", "/stop-monitoring").await;

    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}
