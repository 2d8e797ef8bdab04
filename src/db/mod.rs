use anyhow::Result;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, Statement,
    TransactionTrait,
};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::config::SecurityConfig;
use crate::domain::KeyStatus;

pub mod migrator;
pub mod repositories;

pub use repositories::access_key::AccessKey;
pub use repositories::audit::{AuditEntry, AuditFilter, NewAuditEntry};
pub use repositories::grant::MirroredGrant;
pub use repositories::script::ScriptEntry;
pub use repositories::user::{NewUser, User};

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        let in_memory = db_url.contains(":memory:");

        if !in_memory {
            let path_str = db_url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
            let path_str = path_str.split('?').next().unwrap_or(path_str);
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        // Every pooled connection to `:memory:` would open its own empty database
        let (max_connections, min_connections) = if in_memory {
            (1, 1)
        } else {
            (max_connections, min_connections)
        };

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .sqlx_logging(false);

        if !in_memory {
            opt.max_lifetime(Duration::from_secs(600));
        }

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    pub async fn begin(&self) -> Result<DatabaseTransaction> {
        Ok(self.conn.begin().await?)
    }

    fn user_repo(&self) -> repositories::user::UserRepository {
        repositories::user::UserRepository::new(self.conn.clone())
    }

    fn access_key_repo(&self) -> repositories::access_key::AccessKeyRepository {
        repositories::access_key::AccessKeyRepository::new(self.conn.clone())
    }

    fn script_repo(&self) -> repositories::script::ScriptRepository {
        repositories::script::ScriptRepository::new(self.conn.clone())
    }

    fn grant_repo(&self) -> repositories::grant::GrantRepository {
        repositories::grant::GrantRepository::new(self.conn.clone())
    }

    fn audit_repo(&self) -> repositories::audit::AuditRepository {
        repositories::audit::AuditRepository::new(self.conn.clone())
    }

    // ========================================================================
    // Access keys
    // ========================================================================

    pub async fn insert_access_key(&self, code: &str) -> Result<Option<AccessKey>> {
        self.access_key_repo().insert(code).await
    }

    pub async fn get_access_key(&self, code: &str) -> Result<Option<AccessKey>> {
        self.access_key_repo().get(code).await
    }

    pub async fn get_access_key_for_user(&self, user_id: i32) -> Result<Option<AccessKey>> {
        self.access_key_repo().get_by_bound_user(user_id).await
    }

    pub async fn list_access_keys(&self) -> Result<Vec<AccessKey>> {
        self.access_key_repo().list_all().await
    }

    pub async fn count_access_keys(&self, status: KeyStatus) -> Result<u64> {
        self.access_key_repo().count_by_status(status).await
    }

    pub async fn mark_access_key_used(
        &self,
        code: &str,
        bound_user_id: Option<i32>,
        bound_username: Option<&str>,
    ) -> Result<bool> {
        repositories::access_key::AccessKeyRepository::mark_used_with(
            &self.conn,
            code,
            bound_user_id,
            bound_username,
        )
        .await
    }

    pub async fn mark_access_key_expired(&self, code: &str) -> Result<bool> {
        self.access_key_repo().mark_expired(code).await
    }

    // ========================================================================
    // Script catalog
    // ========================================================================

    pub async fn insert_script(
        &self,
        pine_id: &str,
        name: &str,
        description: &str,
    ) -> Result<ScriptEntry> {
        self.script_repo().insert(pine_id, name, description).await
    }

    pub async fn get_script(&self, pine_id: &str) -> Result<Option<ScriptEntry>> {
        self.script_repo().get(pine_id).await
    }

    pub async fn get_scripts(&self, pine_ids: &[String]) -> Result<Vec<ScriptEntry>> {
        self.script_repo().get_many(pine_ids).await
    }

    pub async fn list_scripts(&self) -> Result<Vec<ScriptEntry>> {
        self.script_repo().list_all().await
    }

    pub async fn list_active_scripts(&self) -> Result<Vec<ScriptEntry>> {
        self.script_repo().list_active().await
    }

    pub async fn list_agent_visible_scripts(&self) -> Result<Vec<ScriptEntry>> {
        self.script_repo().list_agent_visible().await
    }

    pub async fn script_count(&self) -> Result<u64> {
        self.script_repo().count().await
    }

    pub async fn set_script_active(&self, pine_id: &str, active: bool) -> Result<bool> {
        self.script_repo().set_active(pine_id, active).await
    }

    pub async fn set_script_agent_visible(&self, pine_id: &str, visible: bool) -> Result<bool> {
        self.script_repo().set_agent_visible(pine_id, visible).await
    }

    pub async fn delete_script(&self, pine_id: &str) -> Result<bool> {
        self.script_repo().delete(pine_id).await
    }

    // ========================================================================
    // Grant mirror
    // ========================================================================

    pub async fn upsert_grant(
        &self,
        user_id: i32,
        script_id: i32,
        tradingview_username: &str,
        expiration: Option<String>,
    ) -> Result<()> {
        self.grant_repo()
            .upsert(user_id, script_id, tradingview_username, expiration)
            .await
    }

    pub async fn remove_grants_for_username(
        &self,
        tradingview_username: &str,
        script_id: i32,
    ) -> Result<u64> {
        self.grant_repo()
            .remove_for_username(tradingview_username, script_id)
            .await
    }

    pub async fn grant_count_for_user(&self, user_id: i32) -> Result<u64> {
        self.grant_repo().count_for_user(user_id).await
    }

    pub async fn list_grants_for_user(&self, user_id: i32) -> Result<Vec<MirroredGrant>> {
        self.grant_repo().list_for_user(user_id).await
    }

    // ========================================================================
    // Audit log
    // ========================================================================

    pub async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry> {
        self.audit_repo().append(entry).await
    }

    pub async fn list_audit(
        &self,
        filter: AuditFilter,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<AuditEntry>, u64)> {
        self.audit_repo().list(filter, limit, offset).await
    }

    pub async fn audit_for_key(&self, key_code: &str) -> Result<Vec<AuditEntry>> {
        self.audit_repo().for_key_code(key_code).await
    }

    pub async fn audit_counts(&self) -> Result<Vec<(String, String, i64)>> {
        self.audit_repo().counts().await
    }

    // ========================================================================
    // Users
    // ========================================================================

    pub async fn create_user(&self, new_user: NewUser<'_>, config: &SecurityConfig) -> Result<User> {
        self.user_repo().create(new_user, config).await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.user_repo().get_by_email(email).await
    }

    pub async fn get_user(&self, id: i32) -> Result<Option<User>> {
        self.user_repo().get_by_id(id).await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.user_repo().list().await
    }

    pub async fn admin_count(&self) -> Result<u64> {
        self.user_repo().admin_count().await
    }

    pub async fn verify_user_password(&self, email: &str, password: &str) -> Result<bool> {
        self.user_repo().verify_password(email, password).await
    }

    pub async fn update_user_password(
        &self,
        user_id: i32,
        new_password: &str,
        config: &SecurityConfig,
    ) -> Result<()> {
        self.user_repo()
            .update_password(user_id, new_password, config)
            .await
    }

    pub async fn verify_api_key(&self, api_key: &str) -> Result<Option<User>> {
        self.user_repo().verify_api_key(api_key).await
    }

    pub async fn regenerate_user_api_key(&self, user_id: i32) -> Result<String> {
        self.user_repo().regenerate_api_key(user_id).await
    }

    pub async fn set_user_tradingview_username(
        &self,
        user_id: i32,
        username: Option<&str>,
    ) -> Result<User> {
        self.user_repo()
            .set_tradingview_username(user_id, username)
            .await
    }

    pub async fn set_user_has_generated_access(&self, user_id: i32, value: bool) -> Result<()> {
        self.user_repo()
            .set_has_generated_access(user_id, value)
            .await
    }

    /// Creates the configured admin account when no admin exists yet.
    pub async fn ensure_bootstrap_admin(&self, config: &SecurityConfig) -> Result<Option<User>> {
        if self.admin_count().await? > 0 {
            return Ok(None);
        }

        let admin = self
            .create_user(
                NewUser {
                    email: &config.bootstrap_admin_email,
                    password: &config.bootstrap_admin_password,
                    display_name: "Administrator",
                    is_admin: true,
                },
                config,
            )
            .await?;

        info!(email = %admin.email, "Bootstrap admin user created");
        Ok(Some(admin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> Store {
        Store::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_mark_used_is_one_way() {
        let store = memory_store().await;
        store.insert_access_key("ABCD1234").await.unwrap().unwrap();

        assert!(store.mark_access_key_used("ABCD1234", None, Some("trader")).await.unwrap());
        assert!(!store.mark_access_key_used("ABCD1234", None, None).await.unwrap());
        assert!(!store.mark_access_key_expired("ABCD1234").await.unwrap());

        let key = store.get_access_key("ABCD1234").await.unwrap().unwrap();
        assert_eq!(key.status, KeyStatus::Used);
        assert_eq!(key.bound_username.as_deref(), Some("trader"));
        assert!(key.used_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_code_insert_returns_none() {
        let store = memory_store().await;
        assert!(store.insert_access_key("DUPLICAT").await.unwrap().is_some());
        assert!(store.insert_access_key("DUPLICAT").await.unwrap().is_none());
        assert_eq!(store.count_access_keys(KeyStatus::Active).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_script_delete_cascades_grants() {
        let store = memory_store().await;
        let security = SecurityConfig {
            argon2_memory_cost_kib: 1024,
            argon2_time_cost: 1,
            ..SecurityConfig::default()
        };
        let user = store
            .create_user(
                NewUser {
                    email: "User@Example.com",
                    password: "password123",
                    display_name: "User",
                    is_admin: false,
                },
                &security,
            )
            .await
            .unwrap();
        assert_eq!(user.email, "user@example.com");

        let script = store.insert_script("PUB;abc", "Alpha", "").await.unwrap();
        store.upsert_grant(user.id, script.id, "trader", None).await.unwrap();
        store
            .upsert_grant(user.id, script.id, "trader", Some("2030-01-01T00:00:00Z".into()))
            .await
            .unwrap();
        assert_eq!(store.grant_count_for_user(user.id).await.unwrap(), 1);

        let grants = store.list_grants_for_user(user.id).await.unwrap();
        assert_eq!(grants[0].pine_id, "PUB;abc");
        assert!(grants[0].expiration.is_some());

        assert!(store.delete_script("PUB;abc").await.unwrap());
        assert_eq!(store.grant_count_for_user(user.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bootstrap_admin_once() {
        let store = memory_store().await;
        let security = SecurityConfig {
            argon2_memory_cost_kib: 1024,
            argon2_time_cost: 1,
            ..SecurityConfig::default()
        };

        assert!(store.ensure_bootstrap_admin(&security).await.unwrap().is_some());
        assert!(store.ensure_bootstrap_admin(&security).await.unwrap().is_none());
        assert!(
            store
                .verify_user_password(&security.bootstrap_admin_email, &security.bootstrap_admin_password)
                .await
                .unwrap()
        );
    }
}
