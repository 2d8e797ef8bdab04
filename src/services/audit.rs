use serde::Serialize;
use std::collections::BTreeMap;
use tracing::error;

use crate::constants::limits::MAX_AUDIT_LIMIT;
use crate::db::{AuditEntry, AuditFilter, NewAuditEntry, Store};
use crate::domain::{Operation, Outcome};

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AuditSummary {
    pub total: i64,
    pub grants_succeeded: i64,
    /// operation -> outcome -> count
    pub by_operation: BTreeMap<String, BTreeMap<String, i64>>,
}

pub struct AuditService {
    store: Store,
}

impl AuditService {
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn record(&self, entry: NewAuditEntry) -> anyhow::Result<AuditEntry> {
        self.store.append_audit(entry).await
    }

    /// Appends and logs failures instead of returning them, for callers that
    /// already finished the remote call and must report its outcome anyway.
    pub async fn record_or_log(&self, entry: NewAuditEntry) {
        let operation = entry.operation;
        let username = entry.username.clone();

        if let Err(e) = self.store.append_audit(entry).await {
            error!(error = %e, %operation, username = %username, "Failed to write audit entry");
        }
    }

    pub async fn recent(&self, limit: u64) -> anyhow::Result<Vec<AuditEntry>> {
        let (items, _) = self
            .list(AuditFilter::default(), limit, 0)
            .await?;
        Ok(items)
    }

    pub async fn list(
        &self,
        filter: AuditFilter,
        limit: u64,
        offset: u64,
    ) -> anyhow::Result<(Vec<AuditEntry>, u64)> {
        self.store
            .list_audit(filter, limit.clamp(1, MAX_AUDIT_LIMIT), offset)
            .await
    }

    pub async fn for_key(&self, code: &str) -> anyhow::Result<Vec<AuditEntry>> {
        self.store.audit_for_key(code).await
    }

    pub async fn for_username(&self, username: &str, limit: u64) -> anyhow::Result<Vec<AuditEntry>> {
        let filter = AuditFilter {
            username: Some(username.to_string()),
            ..AuditFilter::default()
        };
        let (items, _) = self.list(filter, limit, 0).await?;
        Ok(items)
    }

    pub async fn summary(&self) -> anyhow::Result<AuditSummary> {
        let mut summary = AuditSummary::default();

        for (operation, outcome, count) in self.store.audit_counts().await? {
            summary.total += count;
            if operation == Operation::Grant.as_str() && outcome == Outcome::Success.as_str() {
                summary.grants_succeeded += count;
            }
            summary
                .by_operation
                .entry(operation)
                .or_default()
                .insert(outcome, count);
        }

        Ok(summary)
    }
}
