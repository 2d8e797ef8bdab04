use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::validation::validate_pine_id;
use super::{ApiError, ApiResponse, AppState, MessageResponse};
use crate::db::ScriptEntry;

#[derive(Debug, Deserialize)]
pub struct AddScriptRequest {
    pub pine_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

/// What a regular user sees of a script.
#[derive(Debug, Serialize)]
pub struct VisibleScript {
    pub pine_id: String,
    pub name: String,
    pub description: String,
}

impl From<ScriptEntry> for VisibleScript {
    fn from(script: ScriptEntry) -> Self {
        Self {
            pine_id: script.pine_id,
            name: script.name,
            description: script.description,
        }
    }
}

/// GET /scripts
pub async fn list_scripts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<ScriptEntry>>>, ApiError> {
    let scripts = state.catalog().list().await?;
    Ok(Json(ApiResponse::success(scripts)))
}

/// GET /scripts/visible
pub async fn list_visible_scripts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<VisibleScript>>>, ApiError> {
    let scripts = state.catalog().list_agent_visible().await?;
    Ok(Json(ApiResponse::success(
        scripts.into_iter().map(VisibleScript::from).collect(),
    )))
}

/// POST /scripts
pub async fn add_script(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AddScriptRequest>,
) -> Result<Json<ApiResponse<ScriptEntry>>, ApiError> {
    let pine_id = validate_pine_id(&payload.pine_id)?;

    let script = state
        .catalog()
        .add(pine_id, &payload.name, &payload.description)
        .await?;

    tracing::info!(pine_id = %script.pine_id, name = %script.name, "Script added to catalog");

    Ok(Json(ApiResponse::success(script)))
}

/// DELETE /scripts/{pine_id}
pub async fn delete_script(
    State(state): State<Arc<AppState>>,
    Path(pine_id): Path<String>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let pine_id = validate_pine_id(&pine_id)?;

    state.catalog().remove(pine_id).await?;

    tracing::info!(pine_id = %pine_id, "Script removed from catalog");

    Ok(Json(ApiResponse::success(MessageResponse::new(format!(
        "Script {pine_id} removed"
    )))))
}

/// PUT /scripts/{pine_id}/active
pub async fn set_script_active(
    State(state): State<Arc<AppState>>,
    Path(pine_id): Path<String>,
    Json(payload): Json<ToggleRequest>,
) -> Result<Json<ApiResponse<ScriptEntry>>, ApiError> {
    let pine_id = validate_pine_id(&pine_id)?;
    let script = state.catalog().set_active(pine_id, payload.enabled).await?;
    Ok(Json(ApiResponse::success(script)))
}

/// PUT /scripts/{pine_id}/visibility
pub async fn set_script_visibility(
    State(state): State<Arc<AppState>>,
    Path(pine_id): Path<String>,
    Json(payload): Json<ToggleRequest>,
) -> Result<Json<ApiResponse<ScriptEntry>>, ApiError> {
    let pine_id = validate_pine_id(&pine_id)?;
    let script = state
        .catalog()
        .set_agent_visible(pine_id, payload.enabled)
        .await?;
    Ok(Json(ApiResponse::success(script)))
}
