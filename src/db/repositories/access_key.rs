use crate::domain::KeyStatus;
use crate::entities::{access_keys, prelude::*};
use anyhow::{Context, Result};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, SqlErr, sea_query::Expr,
};
use serde::Serialize;

/// Repository for access key operations
pub struct AccessKeyRepository {
    conn: DatabaseConnection,
}

impl AccessKeyRepository {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    fn map_model(m: access_keys::Model) -> Result<AccessKey> {
        Ok(AccessKey {
            id: m.id,
            status: m
                .status
                .parse()
                .with_context(|| format!("Corrupt status on access key {}", m.code))?,
            code: m.code,
            created_at: m.created_at,
            used_at: m.used_at,
            bound_user_id: m.bound_user_id,
            bound_username: m.bound_username,
        })
    }

    /// Inserts a new active key. Returns `None` when the code already exists.
    pub async fn insert(&self, code: &str) -> Result<Option<AccessKey>> {
        let active_model = access_keys::ActiveModel {
            code: Set(code.to_string()),
            status: Set(KeyStatus::Active.as_str().to_string()),
            created_at: Set(chrono::Utc::now().to_rfc3339()),
            ..Default::default()
        };

        match AccessKeys::insert(active_model).exec(&self.conn).await {
            Ok(_) => self.get(code).await,
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Ok(None)
            }
            Err(e) => Err(e).context("Failed to insert access key"),
        }
    }

    pub async fn get(&self, code: &str) -> Result<Option<AccessKey>> {
        Self::get_with(&self.conn, code).await
    }

    pub async fn get_with<C: ConnectionTrait>(conn: &C, code: &str) -> Result<Option<AccessKey>> {
        let row = AccessKeys::find()
            .filter(access_keys::Column::Code.eq(code))
            .one(conn)
            .await
            .context("Failed to query access key")?;

        row.map(Self::map_model).transpose()
    }

    /// The key a user redeemed at registration, if any.
    pub async fn get_by_bound_user(&self, user_id: i32) -> Result<Option<AccessKey>> {
        let row = AccessKeys::find()
            .filter(access_keys::Column::BoundUserId.eq(user_id))
            .order_by_desc(access_keys::Column::Id)
            .one(&self.conn)
            .await
            .context("Failed to query access key by user")?;

        row.map(Self::map_model).transpose()
    }

    pub async fn list_all(&self) -> Result<Vec<AccessKey>> {
        let rows = AccessKeys::find()
            .order_by_desc(access_keys::Column::CreatedAt)
            .order_by_desc(access_keys::Column::Id)
            .all(&self.conn)
            .await?;

        rows.into_iter().map(Self::map_model).collect()
    }

    pub async fn count_by_status(&self, status: KeyStatus) -> Result<u64> {
        let count = AccessKeys::find()
            .filter(access_keys::Column::Status.eq(status.as_str()))
            .count(&self.conn)
            .await?;
        Ok(count)
    }

    /// `active -> used`, only if the key is still active. Returns whether a
    /// row changed; concurrent callers racing on one key see exactly one `true`.
    pub async fn mark_used_with<C: ConnectionTrait>(
        conn: &C,
        code: &str,
        bound_user_id: Option<i32>,
        bound_username: Option<&str>,
    ) -> Result<bool> {
        let result = AccessKeys::update_many()
            .col_expr(
                access_keys::Column::Status,
                Expr::value(KeyStatus::Used.as_str()),
            )
            .col_expr(
                access_keys::Column::UsedAt,
                Expr::value(chrono::Utc::now().to_rfc3339()),
            )
            .col_expr(access_keys::Column::BoundUserId, Expr::value(bound_user_id))
            .col_expr(
                access_keys::Column::BoundUsername,
                Expr::value(bound_username.map(str::to_string)),
            )
            .filter(access_keys::Column::Code.eq(code))
            .filter(access_keys::Column::Status.eq(KeyStatus::Active.as_str()))
            .exec(conn)
            .await
            .context("Failed to mark access key used")?;

        Ok(result.rows_affected > 0)
    }

    /// `active -> expired`. Returns whether a row changed.
    pub async fn mark_expired(&self, code: &str) -> Result<bool> {
        let result = AccessKeys::update_many()
            .col_expr(
                access_keys::Column::Status,
                Expr::value(KeyStatus::Expired.as_str()),
            )
            .filter(access_keys::Column::Code.eq(code))
            .filter(access_keys::Column::Status.eq(KeyStatus::Active.as_str()))
            .exec(&self.conn)
            .await
            .context("Failed to expire access key")?;

        Ok(result.rows_affected > 0)
    }
}

// ============================================================================
// Data Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct AccessKey {
    pub id: i32,
    pub code: String,
    pub status: KeyStatus,
    pub created_at: String,
    pub used_at: Option<String>,
    pub bound_user_id: Option<i32>,
    pub bound_username: Option<String>,
}
