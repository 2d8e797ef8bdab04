//! Access key command handlers

use crate::config::Config;
use crate::db::Store;
use crate::services::AccessKeyService;

fn key_service(config: &Config, store: Store) -> AccessKeyService {
    AccessKeyService::new(store, config.access_keys.clone())
}

pub async fn cmd_keys_generate(config: &Config, count: usize) -> anyhow::Result<()> {
    let store = Store::new(&config.general.database_path).await?;
    let keys = key_service(config, store).generate_batch(count).await?;

    println!("Generated {} access key(s):", keys.len());
    for key in keys {
        println!("  {}", key.code);
    }

    Ok(())
}

pub async fn cmd_keys_list(config: &Config) -> anyhow::Result<()> {
    let store = Store::new(&config.general.database_path).await?;
    let keys = key_service(config, store).list().await?;

    if keys.is_empty() {
        println!("No access keys yet.");
        println!();
        println!("Generate some with: pinegate keys generate --count 5");
        return Ok(());
    }

    println!("Access Keys ({} total)", keys.len());
    println!("{:-<70}", "");

    for key in keys {
        let bound = key.bound_username.as_deref().unwrap_or("");
        println!(
            "{:<18} {:<8} created {}  {}",
            key.code,
            key.status.to_string(),
            key.created_at,
            bound
        );
    }

    Ok(())
}

pub async fn cmd_keys_stats(config: &Config) -> anyhow::Result<()> {
    let store = Store::new(&config.general.database_path).await?;
    let stats = key_service(config, store).stats().await?;

    println!("Access Keys");
    println!("  Total:   {}", stats.total);
    println!("  Active:  {}", stats.active);
    println!("  Used:    {}", stats.used);
    println!("  Expired: {}", stats.expired);

    Ok(())
}
