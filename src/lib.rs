pub mod api;
pub mod cli;
pub mod clients;
pub mod config;
pub mod constants;
pub mod db;
pub mod domain;
pub mod entities;
pub mod services;
pub mod state;

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands, KeyCommands, ScriptCommands, TvCommands};
pub use config::Config;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load()?;
    config.validate()?;

    let prometheus_handle = if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let builder = PrometheusBuilder::new();
        let handle = builder
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        info!("Prometheus metrics recorder initialized");
        Some(handle)
    } else {
        None
    };

    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    let fmt_layer = tracing_subscriber::fmt::layer();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if config.observability.loki_enabled {
        let url = url::Url::parse(&config.observability.loki_url).context("Invalid Loki URL")?;

        let (layer, task) = tracing_loki::builder()
            .label("app", "pinegate")?
            .extra_field("env", "production")?
            .build_url(url)?;

        tokio::spawn(task);

        registry.with(layer).init();
        info!(
            "Loki logging initialized at {}",
            config.observability.loki_url
        );
    } else {
        registry.init();
    }

    let Some(command) = cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        return Ok(());
    };

    match command {
        Commands::Serve => run_server(config, prometheus_handle).await,

        Commands::Keys { command } => match command {
            KeyCommands::Generate { count } => cli::cmd_keys_generate(&config, count).await,
            KeyCommands::List => cli::cmd_keys_list(&config).await,
            KeyCommands::Stats => cli::cmd_keys_stats(&config).await,
        },

        Commands::Scripts { command } => match command {
            ScriptCommands::Add {
                pine_id,
                name,
                description,
            } => cli::cmd_scripts_add(&config, &pine_id, &name, &description).await,
            ScriptCommands::List => cli::cmd_scripts_list(&config).await,
            ScriptCommands::Remove { pine_id } => cli::cmd_scripts_remove(&config, &pine_id).await,
        },

        Commands::Tv { command } => match command {
            TvCommands::Validate { username } => cli::cmd_tv_validate(&config, &username).await,
            TvCommands::Holders { pine_id } => cli::cmd_tv_holders(&config, &pine_id).await,
        },

        Commands::Init => {
            let path = Path::new("config.toml");
            if path.exists() {
                println!("config.toml already exists; leaving it untouched.");
            } else {
                Config::default().save_to_path(path)?;
                println!("✓ Config file created. Edit config.toml and run again.");
            }
            Ok(())
        }
    }
}

async fn run_server(
    config: Config,
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
) -> anyhow::Result<()> {
    info!("Pinegate v{} starting...", env!("CARGO_PKG_VERSION"));

    let port = config.server.port;
    let api_state = api::create_app_state_from_config(config, prometheus_handle).await?;

    let app = api::router(api_state).await;
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("🌐 Web Server running at http://0.0.0.0:{}", port);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Web server error: {}", e);
        return Err(e.into());
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Error listening for shutdown: {}", e),
    }
}
