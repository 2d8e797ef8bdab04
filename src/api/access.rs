use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::CurrentUser;
use super::validation::{validate_pine_id, validate_tradingview_username};
use super::{ApiError, ApiResponse, AppState, PineIds};
use crate::clients::tradingview::{Holder, UsernameCheck};
use crate::domain::AccessDuration;
use crate::services::{AccessCheck, AccessContext, BatchReport};

#[derive(Debug, Deserialize)]
pub struct UsernameRequest {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub username: String,
    pub pine_ids: PineIds,
    pub duration: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScriptsRequest {
    pub username: String,
    pub pine_ids: PineIds,
}

#[derive(Debug, Serialize)]
pub struct ScriptUsers {
    pub pine_id: String,
    pub count: usize,
    pub users: Vec<Holder>,
}

fn admin_context(user: &CurrentUser) -> AccessContext {
    AccessContext::admin(user.0.email.clone())
}

/// POST /validate-username
pub async fn validate_username(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(payload): Json<UsernameRequest>,
) -> Result<Json<ApiResponse<UsernameCheck>>, ApiError> {
    let username = validate_tradingview_username(&payload.username)?;

    let check = state
        .permissions()
        .validate_username(&admin_context(&user), username)
        .await?;

    Ok(Json(ApiResponse::success(check)))
}

/// POST /grant-access
pub async fn grant_access(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(payload): Json<GrantRequest>,
) -> Result<Json<ApiResponse<BatchReport>>, ApiError> {
    let username = validate_tradingview_username(&payload.username)?;

    let duration = match payload.duration.as_deref() {
        Some(raw) => AccessDuration::parse(raw).map_err(|e| ApiError::validation(e.to_string()))?,
        None => {
            let config = state.config().read().await;
            AccessDuration::parse(&config.access_keys.default_duration)
                .map_err(|e| ApiError::internal(e.to_string()))?
        }
    };

    let report = state
        .permissions()
        .grant(
            &admin_context(&user),
            username,
            &payload.pine_ids.into_vec(),
            duration,
        )
        .await?;

    Ok(Json(ApiResponse::success(report)))
}

/// POST /remove-access
pub async fn remove_access(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(payload): Json<ScriptsRequest>,
) -> Result<Json<ApiResponse<BatchReport>>, ApiError> {
    let username = validate_tradingview_username(&payload.username)?;

    let report = state
        .permissions()
        .remove(&admin_context(&user), username, &payload.pine_ids.into_vec())
        .await?;

    Ok(Json(ApiResponse::success(report)))
}

/// POST /check-access
pub async fn check_access(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(payload): Json<ScriptsRequest>,
) -> Result<Json<ApiResponse<Vec<AccessCheck>>>, ApiError> {
    let username = validate_tradingview_username(&payload.username)?;

    let checks = state
        .permissions()
        .check_access(&admin_context(&user), username, &payload.pine_ids.into_vec())
        .await?;

    Ok(Json(ApiResponse::success(checks)))
}

/// GET /script-users/{pine_id}
pub async fn script_users(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(pine_id): Path<String>,
) -> Result<Json<ApiResponse<ScriptUsers>>, ApiError> {
    let pine_id = validate_pine_id(&pine_id)?;

    let users = state
        .permissions()
        .list_holders(&admin_context(&user), pine_id)
        .await?;

    Ok(Json(ApiResponse::success(ScriptUsers {
        pine_id: pine_id.to_string(),
        count: users.len(),
        users,
    })))
}
