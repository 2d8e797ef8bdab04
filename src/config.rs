use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::constants::keys::{MAX_CODE_LENGTH, MIN_CODE_LENGTH};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub tradingview: TradingViewConfig,

    pub access_keys: AccessKeyConfig,

    pub catalog: CatalogConfig,

    pub security: SecurityConfig,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,

    pub log_level: String,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    /// Maximum database connections (default: 5)
    pub max_db_connections: u32,

    /// Minimum database connections (default: 1)
    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/pinegate.db".to_string(),
            log_level: "info".to_string(),
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,

    pub cors_allowed_origins: Vec<String>,

    /// Whether to set the Secure flag on session cookies.
    /// Set to false for local development without HTTPS.
    pub secure_cookies: bool,

    /// Minutes of inactivity before a web session expires.
    pub session_inactivity_minutes: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            cors_allowed_origins: vec![
                "http://localhost:5000".to_string(),
                "http://127.0.0.1:5000".to_string(),
            ],
            secure_cookies: true,
            session_inactivity_minutes: 60,
        }
    }
}

/// How a 2xx answer to a grant or remove call is judged.
///
/// TradingView has answered these endpoints with plain status codes as well
/// as JSON bodies carrying `success`/`status`/`error`, so the rule is left to
/// the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SuccessPolicy {
    /// Any 2xx status is a success.
    #[default]
    StatusOnly,
    /// The JSON body decides; a body without a signal is ambiguous.
    JsonField,
    /// 2xx and a positive JSON signal are both required.
    StatusAndJson,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingViewConfig {
    pub base_url: String,

    pub username: String,

    pub password: String,

    /// Where cookies and the CSRF token are persisted between restarts.
    pub session_file: String,

    pub user_agent: String,

    pub request_timeout_seconds: u64,

    /// Fixed pause between sequential remote calls.
    pub call_delay_ms: u64,

    pub list_page_size: u32,

    pub max_list_pages: u32,

    pub signin_path: String,

    /// Page that only renders for a logged-in session.
    pub probe_path: String,

    pub username_hint_path: String,

    pub profile_path_prefix: String,

    pub list_users_path: String,

    pub add_path: String,

    pub remove_path: String,

    pub grant_success_policy: SuccessPolicy,

    pub remove_success_policy: SuccessPolicy,
}

impl Default for TradingViewConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.tradingview.com".to_string(),
            username: String::new(),
            password: String::new(),
            session_file: "session.json".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
                .to_string(),
            request_timeout_seconds: 30,
            call_delay_ms: 500,
            list_page_size: 30,
            max_list_pages: 100,
            signin_path: "/accounts/signin/".to_string(),
            probe_path: "/chart/".to_string(),
            username_hint_path: "/username_hint/".to_string(),
            profile_path_prefix: "/u/".to_string(),
            list_users_path: "/pine_perm/list_users/".to_string(),
            add_path: "/pine_perm/add/".to_string(),
            remove_path: "/pine_perm/remove/".to_string(),
            grant_success_policy: SuccessPolicy::StatusOnly,
            remove_success_policy: SuccessPolicy::StatusOnly,
        }
    }
}

impl TradingViewConfig {
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessKeyConfig {
    /// Length of generated codes, 8 to 16 characters.
    pub code_length: usize,

    /// Keys older than this are treated as expired. `None` disables expiry.
    pub ttl_hours: Option<u32>,

    /// Duration granted when a registered user requests access.
    pub default_duration: String,
}

impl Default for AccessKeyConfig {
    fn default() -> Self {
        Self {
            code_length: 8,
            ttl_hours: None,
            default_duration: "lifetime".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedScript {
    pub pine_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Inserted at startup when the catalog is empty.
    pub seed_scripts: Vec<SeedScript>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Argon2 memory cost in KiB (default: 8192 = 8MB)
    pub argon2_memory_cost_kib: u32,

    /// Argon2 time cost (iterations)
    pub argon2_time_cost: u32,

    /// Argon2 parallelism (default: 1)
    pub argon2_parallelism: u32,

    /// Created on startup when the users table holds no admin.
    pub bootstrap_admin_email: String,

    pub bootstrap_admin_password: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            argon2_memory_cost_kib: 8192,
            argon2_time_cost: 3,
            argon2_parallelism: 1,
            bootstrap_admin_email: "admin@localhost".to_string(),
            bootstrap_admin_password: "change-me-now".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub loki_enabled: bool,

    pub loki_url: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // A missing .env is the normal case outside development.
        let _ = dotenvy::dotenv();

        let mut config = Self::load_file()?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_file() -> Result<Self> {
        for path in &Self::config_paths() {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    /// Secrets are usually supplied through the environment rather than the
    /// config file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(username) = lookup("TRADINGVIEW_USERNAME") {
            self.tradingview.username = username;
        }
        if let Some(password) = lookup("TRADINGVIEW_PASSWORD") {
            self.tradingview.password = password;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.general.database_path = url;
        }
        if let Some(port) = lookup("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.general.log_level = level;
        }
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("pinegate").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".pinegate").join("config.toml"));
        }

        paths
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&self.access_keys.code_length) {
            anyhow::bail!(
                "access_keys.code_length must be between {MIN_CODE_LENGTH} and {MAX_CODE_LENGTH}"
            );
        }

        if self.tradingview.base_url.is_empty() {
            anyhow::bail!("tradingview.base_url cannot be empty");
        }

        url::Url::parse(&self.tradingview.base_url).context("Invalid tradingview.base_url")?;

        if self.tradingview.list_page_size == 0 {
            anyhow::bail!("tradingview.list_page_size must be > 0");
        }

        if self.tradingview.max_list_pages == 0 {
            anyhow::bail!("tradingview.max_list_pages must be > 0");
        }

        crate::domain::AccessDuration::parse(&self.access_keys.default_duration)
            .context("Invalid access_keys.default_duration")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.access_keys.code_length, 8);
        assert_eq!(config.tradingview.base_url, "https://www.tradingview.com");
        assert_eq!(
            config.tradingview.remove_success_policy,
            SuccessPolicy::StatusOnly
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [general]
            log_level = "debug"

            [tradingview]
            remove_success_policy = "status_and_json"
            call_delay_ms = 0

            [access_keys]
            code_length = 12
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(
            config.tradingview.remove_success_policy,
            SuccessPolicy::StatusAndJson
        );
        assert_eq!(config.tradingview.call_delay_ms, 0);
        assert_eq!(config.access_keys.code_length, 12);
        assert_eq!(config.tradingview.probe_path, "/chart/");
    }

    #[test]
    fn test_validate_rejects_code_length() {
        let mut config = Config::default();
        config.access_keys.code_length = 6;
        assert!(config.validate().is_err());
        config.access_keys.code_length = 17;
        assert!(config.validate().is_err());
        config.access_keys.code_length = 16;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides_from(|key| match key {
            "TRADINGVIEW_USERNAME" => Some("bot".to_string()),
            "TRADINGVIEW_PASSWORD" => Some("secret".to_string()),
            "PORT" => Some("8080".to_string()),
            _ => None,
        });

        assert!(config.tradingview.has_credentials());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.general.database_path, "sqlite:data/pinegate.db");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[tradingview]"));
        assert!(toml_str.contains("[access_keys]"));
    }
}
