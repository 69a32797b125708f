use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};

use crate::server::ServerState;

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ReadyChecks {
    pub storage: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub checks: ReadyChecks,
}

#[axum::debug_handler]
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[axum::debug_handler]
pub async fn readyz(State(state): State<ServerState>) -> impl IntoResponse {
    let storage = state.storage.is_ready().await;
    let status = if storage {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadyResponse {
            status: if storage { "ready" } else { "unready" },
            checks: ReadyChecks { storage },
        }),
    )
}

#[axum::debug_handler]
pub async fn metrics_handler(State(state): State<ServerState>) -> impl IntoResponse {
    if let Ok((total_bytes, count)) = state.storage.stats().await {
        state.metrics.set_storage_stats(total_bytes, count);
    }
    (
        [(http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}
