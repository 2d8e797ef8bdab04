//! TradingView command handlers. Calls go through the permission service so
//! they land in the audit log like API calls do.

use crate::config::Config;
use crate::services::AccessContext;
use crate::state::SharedState;

const CLI_ACTOR: &str = "cli";

pub async fn cmd_tv_validate(config: &Config, username: &str) -> anyhow::Result<()> {
    let state = SharedState::new(config.clone()).await?;

    let check = state
        .permissions
        .validate_username(&AccessContext::admin(CLI_ACTOR), username)
        .await?;

    if check.valid {
        println!("✓ {} exists on TradingView", check.username);
    } else {
        println!("✗ {username} was not found on TradingView");
    }

    Ok(())
}

pub async fn cmd_tv_holders(config: &Config, pine_id: &str) -> anyhow::Result<()> {
    let state = SharedState::new(config.clone()).await?;

    let holders = state
        .permissions
        .list_holders(&AccessContext::admin(CLI_ACTOR), pine_id)
        .await?;

    if holders.is_empty() {
        println!("Nobody holds access to {pine_id}.");
        return Ok(());
    }

    println!("Holders of {} ({} total)", pine_id, holders.len());
    println!("{:-<70}", "");

    for holder in holders {
        let expiration = holder.expiration.as_deref().unwrap_or("lifetime");
        println!("{:<32} expires {}", holder.username, expiration);
    }

    Ok(())
}
