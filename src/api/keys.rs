use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::validation::validate_key_count;
use super::{ApiError, ApiResponse, AppState};
use crate::db::AccessKey;
use crate::services::access_keys::normalize_code;
use crate::services::{KeyAccess, KeyError, KeyStats};

#[derive(Debug, Deserialize, Default)]
pub struct GenerateKeysRequest {
    pub count: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateKeyRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct KeyValidation {
    pub code: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// POST /keys
pub async fn generate_keys(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<GenerateKeysRequest>>,
) -> Result<Json<ApiResponse<Vec<AccessKey>>>, ApiError> {
    let Json(payload) = payload.unwrap_or_default();
    let count = validate_key_count(payload.count.unwrap_or(1))?;

    let keys = state.keys().generate_batch(count).await?;

    Ok(Json(ApiResponse::success(keys)))
}

/// GET /keys
pub async fn list_keys(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<AccessKey>>>, ApiError> {
    let keys = state.keys().list().await?;
    Ok(Json(ApiResponse::success(keys)))
}

/// GET /keys/stats
pub async fn key_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<KeyStats>>, ApiError> {
    let stats = state.keys().stats().await?;
    Ok(Json(ApiResponse::success(stats)))
}

/// GET /keys/{code}
/// The key together with every audit entry recorded under it
pub async fn key_access(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<ApiResponse<KeyAccess>>, ApiError> {
    let access = state.keys().key_access(&normalize_code(&code)).await?;
    Ok(Json(ApiResponse::success(access)))
}

/// POST /keys/validate
/// Reports whether a key can still be redeemed; never consumes it
pub async fn validate_key(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ValidateKeyRequest>,
) -> Result<Json<ApiResponse<KeyValidation>>, ApiError> {
    let code = normalize_code(&payload.code);
    if code.is_empty() {
        return Err(ApiError::validation("Access key is required"));
    }

    let validation = match state.keys().validate(&code).await {
        Ok(key) => KeyValidation {
            code: key.code,
            valid: true,
            reason: None,
        },
        Err(e @ (KeyError::NotFound | KeyError::AlreadyUsed | KeyError::Expired)) => {
            KeyValidation {
                code,
                valid: false,
                reason: Some(e.to_string()),
            }
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Json(ApiResponse::success(validation)))
}
