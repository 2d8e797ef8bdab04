use thiserror::Error;
use tracing::info;

use crate::config::SeedScript;
use crate::db::{ScriptEntry, Store};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Script not found: {0}")]
    NotFound(String),

    #[error("Script {0} already exists and is active")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for CatalogError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Pine Script catalog, keyed by TradingView's publisher id.
pub struct CatalogService {
    store: Store,
}

impl CatalogService {
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// Adds a script. An inactive row with the same id is replaced; an active
    /// one is a conflict.
    pub async fn add(
        &self,
        pine_id: &str,
        name: &str,
        description: &str,
    ) -> Result<ScriptEntry, CatalogError> {
        let pine_id = pine_id.trim();
        let name = name.trim();

        if pine_id.is_empty() || name.is_empty() {
            return Err(CatalogError::Validation(
                "pine_id and name are required".to_string(),
            ));
        }

        if let Some(existing) = self.store.get_script(pine_id).await? {
            if existing.is_active {
                return Err(CatalogError::Conflict(pine_id.to_string()));
            }

            self.store.delete_script(pine_id).await?;
            info!(pine_id = %pine_id, "Replaced inactive script");
        }

        match self
            .store
            .insert_script(pine_id, name, description.trim())
            .await
        {
            Ok(entry) => Ok(entry),
            Err(e) => {
                // Lost a race with a concurrent add of the same id
                if self.store.get_script(pine_id).await?.is_some() {
                    Err(CatalogError::Conflict(pine_id.to_string()))
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// Hard delete.
    pub async fn remove(&self, pine_id: &str) -> Result<(), CatalogError> {
        if !self.store.delete_script(pine_id).await? {
            return Err(CatalogError::NotFound(pine_id.to_string()));
        }

        info!(pine_id = %pine_id, "Removed script from catalog");
        Ok(())
    }

    pub async fn set_active(&self, pine_id: &str, active: bool) -> Result<ScriptEntry, CatalogError> {
        if !self.store.set_script_active(pine_id, active).await? {
            return Err(CatalogError::NotFound(pine_id.to_string()));
        }
        self.get(pine_id).await
    }

    pub async fn set_agent_visible(
        &self,
        pine_id: &str,
        visible: bool,
    ) -> Result<ScriptEntry, CatalogError> {
        if !self.store.set_script_agent_visible(pine_id, visible).await? {
            return Err(CatalogError::NotFound(pine_id.to_string()));
        }
        self.get(pine_id).await
    }

    pub async fn get(&self, pine_id: &str) -> Result<ScriptEntry, CatalogError> {
        self.store
            .get_script(pine_id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(pine_id.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<ScriptEntry>, CatalogError> {
        Ok(self.store.list_scripts().await?)
    }

    pub async fn list_active(&self) -> Result<Vec<ScriptEntry>, CatalogError> {
        Ok(self.store.list_active_scripts().await?)
    }

    pub async fn list_agent_visible(&self) -> Result<Vec<ScriptEntry>, CatalogError> {
        Ok(self.store.list_agent_visible_scripts().await?)
    }

    /// Inserts `scripts` into an empty catalog. Returns how many were added.
    pub async fn seed(&self, scripts: &[SeedScript]) -> Result<usize, CatalogError> {
        if scripts.is_empty() || self.store.script_count().await? > 0 {
            return Ok(0);
        }

        let mut added = 0;
        for script in scripts {
            match self
                .add(&script.pine_id, &script.name, &script.description)
                .await
            {
                Ok(_) => added += 1,
                Err(CatalogError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }

        info!(count = added, "Seeded script catalog");
        Ok(added)
    }
}
