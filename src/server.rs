//! HTTP control surface over the monitor controller

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::controller::{MonitorController, StartOutcome};
use crate::error::{LabelerError, Result};

#[derive(Clone)]
pub struct AppState {
    controller: Arc<MonitorController>,
}

pub fn router(controller: Arc<MonitorController>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/status", get(status))
        .route("/start-monitoring", get(start_monitoring))
        .route("/stop-monitoring", post(stop_monitoring))
        .with_state(AppState { controller })
}

/// Serve the control surface until `shutdown` resolves
pub async fn serve<F>(
    controller: Arc<MonitorController>,
    host: &str,
    port: u16,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|_| LabelerError::ConfigError(format!("Invalid listen address {}:{}", host, port)))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Control surface listening on {}", addr);

    axum::serve(listener, router(controller))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn root(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.controller.status().await;
    Json(json!({
        "message": "Gmail Email Logger is running",
        "monitoring": status.monitoring,
    }))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller.status().await)
}

async fn start_monitoring(State(state): State<AppState>) -> Response {
    match state.controller.start().await {
        Ok(StartOutcome::Started) => {
            Json(json!({ "message": "Monitoring started successfully" })).into_response()
        }
        Ok(StartOutcome::AlreadyRunning) => {
            Json(json!({ "message": "Monitoring is already active" })).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": format!("Failed to start monitoring: {}", e) })),
        )
            .into_response(),
    }
}

async fn stop_monitoring(State(state): State<AppState>) -> impl IntoResponse {
    state.controller.stop().await;
    Json(json!({ "message": "Monitoring stopped" }))
}
