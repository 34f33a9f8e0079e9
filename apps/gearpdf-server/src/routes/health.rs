//! Health check endpoints

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct RootResponse {
    pub message: &'static str,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
    pub compressor: String,
    pub compressor_available: bool,
    /// Compressor run when the primary misses the target or fails
    pub second_stage: Option<String>,
    pub started_at: DateTime<Utc>,
}

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "PDF compression API is running",
    })
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let compression = state.compression();
    let compressor = compression.compressor();
    let available = compressor.is_available().await;

    Json(HealthResponse {
        status: if available { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        service: "gearpdf-server",
        compressor: compressor.name().to_string(),
        compressor_available: available,
        second_stage: compression.second_stage().map(|c| c.name().to_string()),
        started_at: state.started_at(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/v1/health", get(health_check))
}
