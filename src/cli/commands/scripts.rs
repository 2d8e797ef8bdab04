//! Catalog command handlers

use crate::config::Config;
use crate::db::Store;
use crate::services::{CatalogError, CatalogService};

pub async fn cmd_scripts_add(
    config: &Config,
    pine_id: &str,
    name: &str,
    description: &str,
) -> anyhow::Result<()> {
    let store = Store::new(&config.general.database_path).await?;
    let catalog = CatalogService::new(store);

    match catalog.add(pine_id, name, description).await {
        Ok(script) => println!("✓ Added: {} ({})", script.name, script.pine_id),
        Err(CatalogError::Conflict(id)) => println!("Script {id} is already in the catalog."),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

pub async fn cmd_scripts_list(config: &Config) -> anyhow::Result<()> {
    let store = Store::new(&config.general.database_path).await?;
    let scripts = CatalogService::new(store).list().await?;

    if scripts.is_empty() {
        println!("The catalog is empty.");
        println!();
        println!("Add a script with: pinegate scripts add \"PUB;abc123\" \"My Indicator\"");
        return Ok(());
    }

    println!("Pine Scripts ({} total)", scripts.len());
    println!("{:-<70}", "");

    for script in scripts {
        let active = if script.is_active { "●" } else { "○" };
        let visible = if script.agent_visible { "visible" } else { "hidden" };
        println!("{} {} [{}]", active, script.name, visible);
        println!("  ID: {}", script.pine_id);
    }

    println!();
    println!("Legend: ● Active | ○ Inactive");

    Ok(())
}

pub async fn cmd_scripts_remove(config: &Config, pine_id: &str) -> anyhow::Result<()> {
    let store = Store::new(&config.general.database_path).await?;
    let catalog = CatalogService::new(store);

    match catalog.remove(pine_id).await {
        Ok(()) => println!("✓ Removed: {pine_id}"),
        Err(CatalogError::NotFound(_)) => {
            println!("Script {pine_id} is not in the catalog.");
            println!("Use 'pinegate scripts list' to see ids.");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
