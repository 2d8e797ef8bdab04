use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::clients::{PermissionClient, TradingViewClient};
use crate::config::Config;
use crate::db::Store;
use crate::domain::AccessDuration;
use crate::services::{
    AccessKeyService, AuditService, AuthService, CatalogService, PermissionService,
    SeaOrmAuthService,
};

#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<RwLock<Config>>,

    pub store: Store,

    pub tradingview: Arc<dyn PermissionClient>,

    pub keys: Arc<AccessKeyService>,

    pub catalog: Arc<CatalogService>,

    pub audit: Arc<AuditService>,

    pub permissions: Arc<PermissionService>,

    pub auth_service: Arc<dyn AuthService>,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let client = TradingViewClient::new(config.tradingview.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to build TradingView client: {e}"))?;

        Self::with_client(config, Arc::new(client)).await
    }

    /// Builds the state around any permission client; tests pass a fake.
    pub async fn with_client(
        config: Config,
        tradingview: Arc<dyn PermissionClient>,
    ) -> anyhow::Result<Self> {
        let store = Store::with_pool_options(
            &config.general.database_path,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await?;

        store.ensure_bootstrap_admin(&config.security).await?;

        let default_duration = AccessDuration::parse(&config.access_keys.default_duration)?;

        let keys = Arc::new(AccessKeyService::new(
            store.clone(),
            config.access_keys.clone(),
        ));

        let catalog = Arc::new(CatalogService::new(store.clone()));
        catalog.seed(&config.catalog.seed_scripts).await?;

        let audit = Arc::new(AuditService::new(store.clone()));

        let permissions = Arc::new(PermissionService::new(
            store.clone(),
            tradingview.clone(),
            audit.clone(),
            Duration::from_millis(config.tradingview.call_delay_ms),
        ));

        let auth_service = Arc::new(SeaOrmAuthService::new(
            store.clone(),
            config.security.clone(),
            keys.clone(),
            permissions.clone(),
            default_duration,
        )) as Arc<dyn AuthService + Send + Sync + 'static>;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            store,
            tradingview,
            keys,
            catalog,
            audit,
            permissions,
            auth_service,
        })
    }

    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }
}
