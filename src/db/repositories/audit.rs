use crate::domain::{Operation, Outcome};
use crate::entities::{access_logs, prelude::*};
use anyhow::{Context, Result};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, sea_query::Expr,
};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub id: i32,
    pub actor: String,
    pub username: String,
    pub pine_id: String,
    pub script_name: Option<String>,
    pub operation: Operation,
    pub outcome: Outcome,
    pub details: String,
    pub key_code: Option<String>,
    pub created_at: String,
}

/// A row about to be appended to the audit log.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub actor: String,
    pub username: String,
    pub pine_id: String,
    pub script_name: Option<String>,
    pub operation: Operation,
    pub outcome: Outcome,
    pub details: String,
    pub key_code: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub operation: Option<Operation>,
    pub outcome: Option<Outcome>,
    pub username: Option<String>,
    pub pine_id: Option<String>,
}

/// Append-only access log: rows are inserted and read, never changed.
pub struct AuditRepository {
    conn: DatabaseConnection,
}

impl AuditRepository {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    fn map_model(m: access_logs::Model) -> Result<AuditEntry> {
        Ok(AuditEntry {
            operation: m
                .operation
                .parse()
                .with_context(|| format!("Corrupt operation on audit entry {}", m.id))?,
            outcome: m
                .outcome
                .parse()
                .with_context(|| format!("Corrupt outcome on audit entry {}", m.id))?,
            id: m.id,
            actor: m.actor,
            username: m.username,
            pine_id: m.pine_id,
            script_name: m.script_name,
            details: m.details,
            key_code: m.key_code,
            created_at: m.created_at,
        })
    }

    pub async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry> {
        let active_model = access_logs::ActiveModel {
            actor: Set(entry.actor),
            username: Set(entry.username),
            pine_id: Set(entry.pine_id),
            script_name: Set(entry.script_name),
            operation: Set(entry.operation.as_str().to_string()),
            outcome: Set(entry.outcome.as_str().to_string()),
            details: Set(entry.details),
            key_code: Set(entry.key_code),
            created_at: Set(chrono::Utc::now().to_rfc3339()),
            ..Default::default()
        };

        let res = AccessLogs::insert(active_model).exec(&self.conn).await?;

        let model = AccessLogs::find_by_id(res.last_insert_id)
            .one(&self.conn)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Audit entry {} vanished", res.last_insert_id))?;
        Self::map_model(model)
    }

    pub async fn list(
        &self,
        filter: AuditFilter,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<AuditEntry>, u64)> {
        let mut query = AccessLogs::find()
            .order_by_desc(access_logs::Column::CreatedAt)
            .order_by_desc(access_logs::Column::Id);

        if let Some(operation) = filter.operation {
            query = query.filter(access_logs::Column::Operation.eq(operation.as_str()));
        }

        if let Some(outcome) = filter.outcome {
            query = query.filter(access_logs::Column::Outcome.eq(outcome.as_str()));
        }

        if let Some(username) = filter.username {
            query = query.filter(access_logs::Column::Username.eq(username));
        }

        if let Some(pine_id) = filter.pine_id {
            query = query.filter(access_logs::Column::PineId.eq(pine_id));
        }

        let total = query.clone().count(&self.conn).await?;
        let items = query
            .offset(offset)
            .limit(limit)
            .all(&self.conn)
            .await?
            .into_iter()
            .map(Self::map_model)
            .collect::<Result<Vec<_>>>()?;

        Ok((items, total))
    }

    pub async fn for_key_code(&self, key_code: &str) -> Result<Vec<AuditEntry>> {
        let rows = AccessLogs::find()
            .filter(access_logs::Column::KeyCode.eq(key_code))
            .order_by_asc(access_logs::Column::Id)
            .all(&self.conn)
            .await?;
        rows.into_iter().map(Self::map_model).collect()
    }

    /// Row counts grouped by `(operation, outcome)`.
    pub async fn counts(&self) -> Result<Vec<(String, String, i64)>> {
        let rows = AccessLogs::find()
            .select_only()
            .column(access_logs::Column::Operation)
            .column(access_logs::Column::Outcome)
            .column_as(Expr::col(access_logs::Column::Id).count(), "count")
            .group_by(access_logs::Column::Operation)
            .group_by(access_logs::Column::Outcome)
            .into_tuple::<(String, String, i64)>()
            .all(&self.conn)
            .await?;

        Ok(rows)
    }
}
