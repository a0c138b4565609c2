use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";

/// Application configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Secret used to sign session tokens
    pub jwt_secret: String,

    /// Session token lifetime in seconds
    pub jwt_expiration: i64,

    /// Bind host
    pub host: String,

    /// Bind port
    pub port: u16,

    /// Runtime environment: "development", "test", "production"
    pub environment: String,

    /// Default tracing filter level
    pub log_level: String,

    /// Emit logs as JSON
    pub log_json: bool,

    /// Maximum database connections
    pub db_max_connections: u32,

    /// Minimum database connections
    pub db_min_connections: u32,

    /// Create the schema on startup (SQLite development/test runs)
    pub auto_migrate: bool,

    /// eSewa gateway form action URL
    pub esewa_payment_url: String,

    /// Merchant product code registered with eSewa
    pub esewa_product_code: String,

    /// Shared secret for signing eSewa payment forms
    pub esewa_secret_key: String,

    /// Base URL the gateway redirects back to after payment
    pub payment_return_url: String,
}

impl AppConfig {
    /// Builds a configuration programmatically; used by tests and tools.
    pub fn new(
        database_url: impl Into<String>,
        jwt_secret: impl Into<String>,
        jwt_expiration: i64,
        host: impl Into<String>,
        port: u16,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            database_url: database_url.into(),
            jwt_secret: jwt_secret.into(),
            jwt_expiration,
            host: host.into(),
            port,
            environment: environment.into(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            db_max_connections: 10,
            db_min_connections: 1,
            auto_migrate: false,
            esewa_payment_url: "https://rc-epay.esewa.com.np/api/epay/main/v2/form".to_string(),
            esewa_product_code: "EPAYTEST".to_string(),
            esewa_secret_key: "8gBm/:&EnhH.1/q".to_string(),
            payment_return_url: "http://localhost:8080/api/v1/payments/return".to_string(),
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development" || self.environment == "test"
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),
}

/// Initializes tracing using the provided log level as the default filter.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("kinmel_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration.
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // jwt_secret and esewa_secret_key have defaults only for development;
    // production deployments must override them via APP__* variables.
    let builder = Config::builder()
        .set_default("database_url", "sqlite://kinmel.db?mode=rwc")?
        .set_default("jwt_secret", "kinmel_development_secret_do_not_use_in_prod")?
        .set_default("jwt_expiration", 3600)?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("db_max_connections", 10)?
        .set_default("db_min_connections", 1)?
        .set_default("auto_migrate", true)?
        .set_default(
            "esewa_payment_url",
            "https://rc-epay.esewa.com.np/api/epay/main/v2/form",
        )?
        .set_default("esewa_product_code", "EPAYTEST")?
        .set_default("esewa_secret_key", "8gBm/:&EnhH.1/q")?
        .set_default(
            "payment_return_url",
            "http://localhost:8080/api/v1/payments/return",
        )?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    if !app_config.is_development()
        && app_config.jwt_secret == "kinmel_development_secret_do_not_use_in_prod"
    {
        error!("The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret must be configured outside development".into(),
        )));
    }

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn programmatic_config_defaults() {
        let cfg = AppConfig::new(
            "sqlite::memory:",
            "secret",
            3600,
            "127.0.0.1",
            8080,
            "test",
        );
        assert!(cfg.is_development());
        assert_eq!(cfg.log_level(), "info");
        assert!(!cfg.log_json);
    }
}
