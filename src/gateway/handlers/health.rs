//! Health check handler

use std::sync::Arc;

use axum::extract::State;
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, ErrorResponse, ok};

/// Health check response data
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: &'static str,
    /// Build revision
    #[schema(example = "a1b2c3d")]
    pub version: &'static str,
    /// Server timestamp in milliseconds
    #[schema(example = 1703494800000_i64)]
    pub timestamp_ms: i64,
}

/// Health check endpoint
///
/// Pings the store; the failure cause is logged, never returned.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 503, description = "Store unreachable", body = ErrorResponse)
    ),
    tag = "System"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    if let Err(e) = state.store.ping().await {
        tracing::error!(error = %e, "[HEALTH] store ping failed");
        return ApiError::service_unavailable("store unreachable").into_err();
    }
    ok(HealthResponse {
        status: "ok",
        version: env!("GIT_HASH"),
        timestamp_ms: Utc::now().timestamp_millis(),
    })
}
