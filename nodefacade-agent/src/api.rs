//! Read-only status API.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use nodefacade_registration::EngineStatus;
use nodefacade_store::ResourceStore;
use nodefacade_types::ResourceId;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ResourceStore>,
    pub status: watch::Receiver<EngineStatus>,
}

impl AppState {
    pub fn new(store: Arc<ResourceStore>, status: watch::Receiver<EngineStatus>) -> Self {
        Self { store, status }
    }
}

/// 200 while registered and in sync, 503 otherwise. The body is the engine
/// status either way.
async fn health_handler(State(state): State<AppState>) -> Response {
    let status = state.status.borrow().clone();
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status)).into_response()
}

async fn resources_handler(State(state): State<AppState>) -> Response {
    Json(state.store.snapshot()).into_response()
}

async fn resource_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(id) = ResourceId::parse(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid resource id"})),
        )
            .into_response();
    };
    match state.store.get(&id) {
        Some(resource) => Json(resource).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("resource {id} not found")})),
        )
            .into_response(),
    }
}

/// Build the HTTP API router over the store and the engine status.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/resources", get(resources_handler))
        .route("/resources/{id}", get(resource_handler))
        .with_state(state)
}
