use crate::entities::{access_grants, pine_scripts, prelude::*};
use anyhow::Result;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    sea_query::OnConflict,
};
use serde::Serialize;

/// Local mirror of grants made on TradingView for registered users.
///
/// Nothing reconciles these rows with the remote side; they only reflect the
/// calls this service saw succeed.
pub struct GrantRepository {
    conn: DatabaseConnection,
}

impl GrantRepository {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn upsert(
        &self,
        user_id: i32,
        script_id: i32,
        tradingview_username: &str,
        expiration: Option<String>,
    ) -> Result<()> {
        let active_model = access_grants::ActiveModel {
            user_id: Set(user_id),
            script_id: Set(script_id),
            tradingview_username: Set(tradingview_username.to_string()),
            expiration: Set(expiration),
            granted_at: Set(chrono::Utc::now().to_rfc3339()),
            ..Default::default()
        };

        AccessGrants::insert(active_model)
            .on_conflict(
                OnConflict::columns([
                    access_grants::Column::UserId,
                    access_grants::Column::ScriptId,
                ])
                .update_columns([
                    access_grants::Column::TradingviewUsername,
                    access_grants::Column::Expiration,
                    access_grants::Column::GrantedAt,
                ])
                .to_owned(),
            )
            .exec(&self.conn)
            .await?;

        Ok(())
    }

    /// Drops every mirror row for `tradingview_username` on the script.
    pub async fn remove_for_username(
        &self,
        tradingview_username: &str,
        script_id: i32,
    ) -> Result<u64> {
        let result = AccessGrants::delete_many()
            .filter(access_grants::Column::TradingviewUsername.eq(tradingview_username))
            .filter(access_grants::Column::ScriptId.eq(script_id))
            .exec(&self.conn)
            .await?;

        Ok(result.rows_affected)
    }

    pub async fn count_for_user(&self, user_id: i32) -> Result<u64> {
        let count = AccessGrants::find()
            .filter(access_grants::Column::UserId.eq(user_id))
            .count(&self.conn)
            .await?;
        Ok(count)
    }

    pub async fn list_for_user(&self, user_id: i32) -> Result<Vec<MirroredGrant>> {
        let rows = AccessGrants::find()
            .filter(access_grants::Column::UserId.eq(user_id))
            .find_also_related(PineScripts)
            .order_by_asc(access_grants::Column::GrantedAt)
            .all(&self.conn)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(grant, script)| script.map(|s| Self::map_row(grant, s)))
            .collect())
    }

    fn map_row(grant: access_grants::Model, script: pine_scripts::Model) -> MirroredGrant {
        MirroredGrant {
            pine_id: script.pine_id,
            script_name: script.name,
            tradingview_username: grant.tradingview_username,
            expiration: grant.expiration,
            granted_at: grant.granted_at,
        }
    }
}

// ============================================================================
// Data Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct MirroredGrant {
    pub pine_id: String,
    pub script_name: String,
    pub tradingview_username: String,
    pub expiration: Option<String>,
    pub granted_at: String,
}
