use crate::entities::{pine_scripts, prelude::*};
use anyhow::Result;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    sea_query::Expr,
};
use serde::Serialize;
use tracing::info;

/// Repository for the Pine Script catalog
pub struct ScriptRepository {
    conn: DatabaseConnection,
}

impl ScriptRepository {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    fn map_model(m: pine_scripts::Model) -> ScriptEntry {
        ScriptEntry {
            id: m.id,
            pine_id: m.pine_id,
            name: m.name,
            description: m.description,
            is_active: m.is_active,
            agent_visible: m.agent_visible,
            created_at: m.created_at,
        }
    }

    pub async fn insert(&self, pine_id: &str, name: &str, description: &str) -> Result<ScriptEntry> {
        let active_model = pine_scripts::ActiveModel {
            pine_id: Set(pine_id.to_string()),
            name: Set(name.to_string()),
            description: Set(description.to_string()),
            is_active: Set(true),
            agent_visible: Set(true),
            created_at: Set(chrono::Utc::now().to_rfc3339()),
            ..Default::default()
        };

        let res = PineScripts::insert(active_model).exec(&self.conn).await?;
        info!(pine_id = %pine_id, "Added Pine Script {}", name);

        self.get_by_id(res.last_insert_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Inserted script {pine_id} not found"))
    }

    pub async fn get_by_id(&self, id: i32) -> Result<Option<ScriptEntry>> {
        let row = PineScripts::find_by_id(id).one(&self.conn).await?;
        Ok(row.map(Self::map_model))
    }

    pub async fn get(&self, pine_id: &str) -> Result<Option<ScriptEntry>> {
        let row = PineScripts::find()
            .filter(pine_scripts::Column::PineId.eq(pine_id))
            .one(&self.conn)
            .await?;
        Ok(row.map(Self::map_model))
    }

    pub async fn get_many(&self, pine_ids: &[String]) -> Result<Vec<ScriptEntry>> {
        if pine_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = PineScripts::find()
            .filter(pine_scripts::Column::PineId.is_in(pine_ids.iter().cloned()))
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(Self::map_model).collect())
    }

    pub async fn list_all(&self) -> Result<Vec<ScriptEntry>> {
        let rows = PineScripts::find()
            .order_by_asc(pine_scripts::Column::Name)
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(Self::map_model).collect())
    }

    pub async fn list_active(&self) -> Result<Vec<ScriptEntry>> {
        let rows = PineScripts::find()
            .filter(pine_scripts::Column::IsActive.eq(true))
            .order_by_asc(pine_scripts::Column::Name)
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(Self::map_model).collect())
    }

    pub async fn list_agent_visible(&self) -> Result<Vec<ScriptEntry>> {
        let rows = PineScripts::find()
            .filter(pine_scripts::Column::IsActive.eq(true))
            .filter(pine_scripts::Column::AgentVisible.eq(true))
            .order_by_asc(pine_scripts::Column::Name)
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(Self::map_model).collect())
    }

    pub async fn count(&self) -> Result<u64> {
        Ok(PineScripts::find().count(&self.conn).await?)
    }

    pub async fn set_active(&self, pine_id: &str, active: bool) -> Result<bool> {
        self.set_flag(pine_id, pine_scripts::Column::IsActive, active)
            .await
    }

    pub async fn set_agent_visible(&self, pine_id: &str, visible: bool) -> Result<bool> {
        self.set_flag(pine_id, pine_scripts::Column::AgentVisible, visible)
            .await
    }

    async fn set_flag(&self, pine_id: &str, column: pine_scripts::Column, value: bool) -> Result<bool> {
        let result = PineScripts::update_many()
            .col_expr(column, Expr::value(value))
            .filter(pine_scripts::Column::PineId.eq(pine_id))
            .exec(&self.conn)
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Hard delete; mirrored grants for the script cascade with it.
    pub async fn delete(&self, pine_id: &str) -> Result<bool> {
        let result = PineScripts::delete_many()
            .filter(pine_scripts::Column::PineId.eq(pine_id))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }
}

// ============================================================================
// Data Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ScriptEntry {
    pub id: i32,
    pub pine_id: String,
    pub name: String,
    pub description: String,
    pub is_active: bool,
    pub agent_visible: bool,
    pub created_at: String,
}
