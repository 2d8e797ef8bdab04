//! Remote permission operations with auditing and the local grant mirror.
//!
//! Multi-script operations run one remote call at a time with a fixed pause
//! between calls. Every call is audited, whatever its outcome.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::clients::PermissionClient;
use crate::clients::tradingview::{
    AccessStatus, Holder, MutationReport, TradingViewError, UsernameCheck,
};
use crate::db::{NewAuditEntry, ScriptEntry, Store};
use crate::domain::{AccessDuration, Operation, Outcome};
use crate::services::audit::AuditService;

/// `pine_id` recorded for username validations, which concern no script.
pub const VALIDATION_PINE_ID: &str = "validation";

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Remote(#[from] TradingViewError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for PermissionError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Who is acting, and on whose behalf.
#[derive(Debug, Clone, Default)]
pub struct AccessContext {
    pub actor: String,
    /// Local user whose grant mirror follows successful calls.
    pub user_id: Option<i32>,
    /// Access key the user registered with, carried into audit entries.
    pub key_code: Option<String>,
}

impl AccessContext {
    pub fn admin(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptReport {
    pub pine_id: String,
    pub script_name: Option<String>,
    pub outcome: Outcome,
    pub status: Option<u16>,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub username: String,
    pub operation: Operation,
    pub results: Vec<ScriptReport>,
    pub succeeded: usize,
    pub failed: usize,
    pub ambiguous: usize,
}

impl BatchReport {
    fn new(username: &str, operation: Operation, results: Vec<ScriptReport>) -> Self {
        let count = |outcome: Outcome| results.iter().filter(|r| r.outcome == outcome).count();
        Self {
            username: username.to_string(),
            operation,
            succeeded: count(Outcome::Success),
            failed: count(Outcome::Failure),
            ambiguous: count(Outcome::Ambiguous),
            results,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessCheck {
    pub pine_id: String,
    pub script_name: Option<String>,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Trims, drops blanks and duplicates, keeps order.
pub fn normalize_pine_ids(pine_ids: &[String]) -> Result<Vec<String>, PermissionError> {
    let mut seen = std::collections::HashSet::new();
    let ids: Vec<String> = pine_ids
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect();

    if ids.is_empty() {
        return Err(PermissionError::Validation(
            "At least one Pine Script ID is required".to_string(),
        ));
    }
    Ok(ids)
}

fn normalize_username(username: &str) -> Result<String, PermissionError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(PermissionError::Validation("Username is required".to_string()));
    }
    Ok(username.to_string())
}

fn record_metric(operation: Operation, outcome: Outcome) {
    metrics::counter!(
        "tradingview_operations_total",
        "operation" => operation.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub struct PermissionService {
    store: Store,
    client: Arc<dyn PermissionClient>,
    audit: Arc<AuditService>,
    call_delay: Duration,
}

impl PermissionService {
    #[must_use]
    pub fn new(
        store: Store,
        client: Arc<dyn PermissionClient>,
        audit: Arc<AuditService>,
        call_delay: Duration,
    ) -> Self {
        Self {
            store,
            client,
            audit,
            call_delay,
        }
    }

    #[must_use]
    pub fn client(&self) -> &Arc<dyn PermissionClient> {
        &self.client
    }

    async fn scripts_by_id(&self, pine_ids: &[String]) -> Result<HashMap<String, ScriptEntry>, PermissionError> {
        Ok(self
            .store
            .get_scripts(pine_ids)
            .await?
            .into_iter()
            .map(|s| (s.pine_id.clone(), s))
            .collect())
    }

    async fn pause(&self, index: usize) {
        if index > 0 && !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn audit(
        &self,
        ctx: &AccessContext,
        username: &str,
        pine_id: &str,
        script_name: Option<String>,
        operation: Operation,
        outcome: Outcome,
        details: String,
    ) {
        record_metric(operation, outcome);
        self.audit
            .record_or_log(NewAuditEntry {
                actor: ctx.actor.clone(),
                username: username.to_string(),
                pine_id: pine_id.to_string(),
                script_name,
                operation,
                outcome,
                details,
                key_code: ctx.key_code.clone(),
            })
            .await;
    }

    pub async fn validate_username(
        &self,
        ctx: &AccessContext,
        username: &str,
    ) -> Result<UsernameCheck, PermissionError> {
        let username = normalize_username(username)?;

        match self.client.validate_username(&username).await {
            Ok(check) => {
                let (outcome, details) = if check.valid {
                    (Outcome::Success, format!("Verified as: {}", check.username))
                } else {
                    (Outcome::Failure, "Username not found".to_string())
                };
                self.audit(ctx, &username, VALIDATION_PINE_ID, None, Operation::Validate, outcome, details)
                    .await;
                Ok(check)
            }
            Err(e) => {
                warn!(username = %username, error = %e, "Username validation failed");
                self.audit(
                    ctx,
                    &username,
                    VALIDATION_PINE_ID,
                    None,
                    Operation::Validate,
                    Outcome::Failure,
                    e.to_string(),
                )
                .await;
                Err(e.into())
            }
        }
    }

    pub async fn grant(
        &self,
        ctx: &AccessContext,
        username: &str,
        pine_ids: &[String],
        duration: AccessDuration,
    ) -> Result<BatchReport, PermissionError> {
        let username = normalize_username(username)?;
        let pine_ids = normalize_pine_ids(pine_ids)?;
        let scripts = self.scripts_by_id(&pine_ids).await?;
        let expiration = duration
            .expires_at(Utc::now())
            .map_err(|e| PermissionError::Validation(e.to_string()))?;

        let mut results = Vec::with_capacity(pine_ids.len());

        for (index, pine_id) in pine_ids.iter().enumerate() {
            self.pause(index).await;

            let script = scripts.get(pine_id);
            let report = self.client.grant(&username, pine_id, expiration).await;

            if report.outcome.is_success()
                && let (Some(user_id), Some(script)) = (ctx.user_id, script)
                && let Err(e) = self
                    .store
                    .upsert_grant(user_id, script.id, &username, expiration.map(|at| at.to_rfc3339()))
                    .await
            {
                warn!(error = %e, pine_id = %pine_id, "Granted remotely but failed to update mirror");
            }

            let details = format!("{} ({duration}): {}", report.outcome, report.detail);
            results.push(
                self.finish(ctx, &username, pine_id, script, Operation::Grant, report, details)
                    .await,
            );
        }

        let batch = BatchReport::new(&username, Operation::Grant, results);
        info!(
            username = %username,
            succeeded = batch.succeeded,
            failed = batch.failed,
            ambiguous = batch.ambiguous,
            "Grant finished"
        );
        Ok(batch)
    }

    pub async fn remove(
        &self,
        ctx: &AccessContext,
        username: &str,
        pine_ids: &[String],
    ) -> Result<BatchReport, PermissionError> {
        let username = normalize_username(username)?;
        let pine_ids = normalize_pine_ids(pine_ids)?;
        let scripts = self.scripts_by_id(&pine_ids).await?;

        let mut results = Vec::with_capacity(pine_ids.len());

        for (index, pine_id) in pine_ids.iter().enumerate() {
            self.pause(index).await;

            let script = scripts.get(pine_id);
            let report = self.client.remove(&username, pine_id).await;

            if report.outcome.is_success()
                && let Some(script) = script
                && let Err(e) = self.store.remove_grants_for_username(&username, script.id).await
            {
                warn!(error = %e, pine_id = %pine_id, "Removed remotely but failed to update mirror");
            }

            let details = format!("{}: {}", report.outcome, report.detail);
            results.push(
                self.finish(ctx, &username, pine_id, script, Operation::Remove, report, details)
                    .await,
            );
        }

        let batch = BatchReport::new(&username, Operation::Remove, results);
        info!(
            username = %username,
            succeeded = batch.succeeded,
            failed = batch.failed,
            ambiguous = batch.ambiguous,
            "Remove finished"
        );
        Ok(batch)
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        ctx: &AccessContext,
        username: &str,
        pine_id: &str,
        script: Option<&ScriptEntry>,
        operation: Operation,
        report: MutationReport,
        details: String,
    ) -> ScriptReport {
        let script_name = script.map(|s| s.name.clone());

        self.audit(
            ctx,
            username,
            pine_id,
            script_name.clone(),
            operation,
            report.outcome,
            details,
        )
        .await;

        ScriptReport {
            pine_id: pine_id.to_string(),
            script_name,
            outcome: report.outcome,
            status: report.status,
            detail: report.detail,
        }
    }

    pub async fn check_access(
        &self,
        ctx: &AccessContext,
        username: &str,
        pine_ids: &[String],
    ) -> Result<Vec<AccessCheck>, PermissionError> {
        let username = normalize_username(username)?;
        let pine_ids = normalize_pine_ids(pine_ids)?;
        let scripts = self.scripts_by_id(&pine_ids).await?;

        let mut checks = Vec::with_capacity(pine_ids.len());

        for (index, pine_id) in pine_ids.iter().enumerate() {
            self.pause(index).await;

            let script_name = scripts.get(pine_id).map(|s| s.name.clone());
            let check = match self.client.check_access(&username, pine_id).await {
                Ok(status) => {
                    let details = if status.has_access { "Has Access" } else { "No Access" };
                    self.audit(
                        ctx,
                        &username,
                        pine_id,
                        script_name.clone(),
                        Operation::Check,
                        Outcome::Success,
                        details.to_string(),
                    )
                    .await;
                    AccessCheck {
                        pine_id: pine_id.clone(),
                        script_name,
                        outcome: Outcome::Success,
                        access: Some(status),
                        error: None,
                    }
                }
                Err(e) => {
                    self.audit(
                        ctx,
                        &username,
                        pine_id,
                        script_name.clone(),
                        Operation::Check,
                        Outcome::Failure,
                        e.to_string(),
                    )
                    .await;
                    AccessCheck {
                        pine_id: pine_id.clone(),
                        script_name,
                        outcome: Outcome::Failure,
                        access: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            checks.push(check);
        }

        Ok(checks)
    }

    pub async fn list_holders(
        &self,
        ctx: &AccessContext,
        pine_id: &str,
    ) -> Result<Vec<Holder>, PermissionError> {
        let pine_id = pine_id.trim();
        if pine_id.is_empty() {
            return Err(PermissionError::Validation("pine_id is required".to_string()));
        }
        let script_name = self.store.get_script(pine_id).await?.map(|s| s.name);

        match self.client.list_holders(pine_id).await {
            Ok(holders) => {
                self.audit(
                    ctx,
                    "",
                    pine_id,
                    script_name,
                    Operation::List,
                    Outcome::Success,
                    format!("{} holders", holders.len()),
                )
                .await;
                Ok(holders)
            }
            Err(e) => {
                self.audit(
                    ctx,
                    "",
                    pine_id,
                    script_name,
                    Operation::List,
                    Outcome::Failure,
                    e.to_string(),
                )
                .await;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::SessionStatus;
    use crate::config::SecurityConfig;
    use crate::db::{AuditFilter, NewUser};
    use async_trait::async_trait;
    use chrono::DateTime;

    /// Fixed grant outcome per pine id.
    #[derive(Default)]
    struct ScriptedClient {
        outcomes: HashMap<String, Outcome>,
    }

    #[async_trait]
    impl PermissionClient for ScriptedClient {
        async fn validate_username(&self, username: &str) -> Result<UsernameCheck, TradingViewError> {
            Ok(UsernameCheck {
                valid: username != "ghost",
                username: username.to_string(),
            })
        }

        async fn grant(
            &self,
            _username: &str,
            pine_id: &str,
            _expiration: Option<DateTime<Utc>>,
        ) -> MutationReport {
            let outcome = self.outcomes.get(pine_id).copied().unwrap_or(Outcome::Success);
            MutationReport {
                outcome,
                status: Some(200),
                detail: String::new(),
            }
        }

        async fn remove(&self, _username: &str, _pine_id: &str) -> MutationReport {
            MutationReport {
                outcome: Outcome::Success,
                status: Some(200),
                detail: String::new(),
            }
        }

        async fn list_holders(&self, _pine_id: &str) -> Result<Vec<Holder>, TradingViewError> {
            Err(TradingViewError::SessionLost)
        }

        async fn check_access(
            &self,
            username: &str,
            pine_id: &str,
        ) -> Result<AccessStatus, TradingViewError> {
            Ok(AccessStatus::from_holder(pine_id, username, None))
        }

        async fn session_status(&self) -> SessionStatus {
            SessionStatus {
                authenticated: true,
                credentials_configured: true,
                csrf_token_known: false,
                last_login: None,
            }
        }
    }

    async fn setup(client: ScriptedClient) -> (Store, PermissionService) {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let audit = Arc::new(AuditService::new(store.clone()));
        let service =
            PermissionService::new(store.clone(), Arc::new(client), audit, Duration::ZERO);
        (store, service)
    }

    #[test]
    fn test_normalize_pine_ids() {
        let ids = vec![" PUB;1 ".to_string(), String::new(), "PUB;2".into(), "PUB;1".into()];
        assert_eq!(normalize_pine_ids(&ids).unwrap(), vec!["PUB;1", "PUB;2"]);
        assert!(normalize_pine_ids(&[" ".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_grant_audits_each_script_and_mirrors_successes() {
        let client = ScriptedClient {
            outcomes: HashMap::from([("PUB;2".to_string(), Outcome::Ambiguous)]),
        };
        let (store, service) = setup(client).await;

        let security = SecurityConfig {
            argon2_memory_cost_kib: 1024,
            argon2_time_cost: 1,
            ..SecurityConfig::default()
        };
        let user = store
            .create_user(
                NewUser {
                    email: "u@example.com",
                    password: "password123",
                    display_name: "U",
                    is_admin: false,
                },
                &security,
            )
            .await
            .unwrap();
        store.insert_script("PUB;1", "One", "").await.unwrap();
        store.insert_script("PUB;2", "Two", "").await.unwrap();

        let ctx = AccessContext {
            actor: user.email.clone(),
            user_id: Some(user.id),
            key_code: Some("ABCD1234".to_string()),
        };
        let ids = vec!["PUB;1".to_string(), "PUB;2".to_string()];
        let batch = service
            .grant(&ctx, "trader", &ids, AccessDuration::Days(30))
            .await
            .unwrap();

        assert_eq!(batch.succeeded, 1);
        assert_eq!(batch.ambiguous, 1);
        assert_eq!(batch.results[0].script_name.as_deref(), Some("One"));

        let mirror = store.list_grants_for_user(user.id).await.unwrap();
        assert_eq!(mirror.len(), 1);
        assert_eq!(mirror[0].pine_id, "PUB;1");
        assert!(mirror[0].expiration.is_some());

        let logs = store.audit_for_key("ABCD1234").await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].outcome, Outcome::Ambiguous);

        let removed = service.remove(&ctx, "trader", &ids[..1]).await.unwrap();
        assert_eq!(removed.succeeded, 1);
        assert!(store.list_grants_for_user(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validation_and_listing_failures_are_audited() {
        let (store, service) = setup(ScriptedClient::default()).await;
        let ctx = AccessContext::admin("admin");

        assert!(!service.validate_username(&ctx, "ghost").await.unwrap().valid);
        assert!(matches!(
            service.list_holders(&ctx, "PUB;1").await,
            Err(PermissionError::Remote(TradingViewError::SessionLost))
        ));
        assert!(matches!(
            service.validate_username(&ctx, "  ").await,
            Err(PermissionError::Validation(_))
        ));

        let (entries, total) = store
            .list_audit(
                AuditFilter {
                    outcome: Some(Outcome::Failure),
                    ..AuditFilter::default()
                },
                10,
                0,
            )
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert!(entries.iter().any(|e| e.operation == Operation::List));
        assert!(entries.iter().any(|e| e.pine_id == VALIDATION_PINE_ID));
    }
}
