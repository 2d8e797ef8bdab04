//! Health and status endpoints.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState, SystemStatus};
use crate::clients::SessionStatus;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: bool,
    pub tradingview: SessionStatus,
}

/// `GET /api/system/health`
///
/// Public probe. The database must answer; the TradingView session is
/// reported but does not fail the probe, since it is re-established on demand.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let database = state.store().ping().await.is_ok();
    let tradingview = state.tradingview().session_status().await;

    let (status, label) = if database {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(ApiResponse::success(HealthResponse {
            status: label,
            database,
            tradingview,
        })),
    )
        .into_response()
}

/// `GET /api/system/status`
pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<SystemStatus>>, ApiError> {
    let database = if state.store().ping().await.is_ok() {
        "connected"
    } else {
        "unreachable"
    };

    let keys = state.keys().stats().await?;
    let scripts = state.store().script_count().await?;
    let summary = state.audit().summary().await?;

    Ok(Json(ApiResponse::success(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime: state.start_time.elapsed().as_secs(),
        database: database.to_string(),
        tradingview: state.tradingview().session_status().await,
        keys,
        scripts,
        grants_succeeded: summary.grants_succeeded,
    })))
}
