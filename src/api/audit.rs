use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use std::sync::Arc;

use super::validation::validate_limit;
use super::{ApiError, ApiResponse, AppState, PagedResponse};
use crate::constants::limits::DEFAULT_AUDIT_LIMIT;
use crate::db::{AuditEntry, AuditFilter};
use crate::domain::{Operation, Outcome};
use crate::services::AuditSummary;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub operation: Option<String>,
    pub outcome: Option<String>,
    pub username: Option<String>,
    pub pine_id: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl AuditQuery {
    fn filter(&self) -> Result<AuditFilter, ApiError> {
        let operation = self
            .operation
            .as_deref()
            .map(str::parse::<Operation>)
            .transpose()
            .map_err(|e| ApiError::validation(e.to_string()))?;

        let outcome = self
            .outcome
            .as_deref()
            .map(str::parse::<Outcome>)
            .transpose()
            .map_err(|e| ApiError::validation(e.to_string()))?;

        Ok(AuditFilter {
            operation,
            outcome,
            username: non_empty(self.username.as_deref()),
            pine_id: non_empty(self.pine_id.as_deref()),
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// GET /audit
pub async fn list_audit(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<ApiResponse<PagedResponse<AuditEntry>>>, ApiError> {
    let filter = query.filter()?;
    let limit = validate_limit(query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT))?;
    let offset = query.offset.unwrap_or(0);

    let (items, total) = state.audit().list(filter, limit, offset).await?;

    Ok(Json(ApiResponse::success(PagedResponse {
        items,
        total,
        limit,
        offset,
    })))
}

/// GET /audit/summary
pub async fn audit_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<AuditSummary>>, ApiError> {
    let summary = state.audit().summary().await?;
    Ok(Json(ApiResponse::success(summary)))
}
