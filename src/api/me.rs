use axum::{Extension, Json, extract::State};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::CurrentUser;
use super::validation::validate_tradingview_username;
use super::{ApiError, ApiResponse, AppState, PineIds};
use crate::db::MirroredGrant;
use crate::domain::AccessDuration;
use crate::services::{BatchReport, UserInfo};

#[derive(Debug, Deserialize)]
pub struct BindRequest {
    pub username: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct AccessRequest {
    pub pine_ids: Option<PineIds>,
    pub duration: Option<String>,
}

/// PUT /me/tradingview
/// Verifies the username on TradingView and binds it to the caller
pub async fn bind_tradingview(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(payload): Json<BindRequest>,
) -> Result<Json<ApiResponse<UserInfo>>, ApiError> {
    let username = validate_tradingview_username(&payload.username)?;

    let updated = state
        .auth_service()
        .bind_tradingview_username(user.id, username)
        .await?;

    Ok(Json(ApiResponse::success(updated)))
}

/// POST /me/access
/// Grants the caller's bound username access to the visible scripts
pub async fn request_access(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    payload: Option<Json<AccessRequest>>,
) -> Result<Json<ApiResponse<BatchReport>>, ApiError> {
    let Json(payload) = payload.unwrap_or_default();

    let duration = payload
        .duration
        .as_deref()
        .map(AccessDuration::parse)
        .transpose()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let pine_ids = payload
        .pine_ids
        .map(PineIds::into_vec)
        .filter(|ids| !ids.is_empty());

    let report = state
        .auth_service()
        .request_access(user.id, pine_ids, duration)
        .await?;

    tracing::info!(
        email = %user.email,
        succeeded = report.succeeded,
        failed = report.failed,
        "Self-service access request finished"
    );

    Ok(Json(ApiResponse::success(report)))
}

/// GET /me/access
pub async fn my_access(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<Vec<MirroredGrant>>>, ApiError> {
    let grants = state.auth_service().my_access(user.id).await?;
    Ok(Json(ApiResponse::success(grants)))
}
