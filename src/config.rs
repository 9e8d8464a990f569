use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use tracing_subscriber::EnvFilter;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_GATEWAY_BASE_URL: &str = "https://api.mercadopago.com";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";
const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
const CONFIG_DIR: &str = "config";

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_gateway_base_url() -> String {
    DEFAULT_GATEWAY_BASE_URL.to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_frontend_url() -> String {
    DEFAULT_FRONTEND_URL.to_string()
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment ("development", "production", "test")
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Mercado Pago access token
    #[validate(length(min = 1))]
    pub mercadopago_access_token: String,

    /// Shared secret for webhook signature verification. When absent,
    /// verification is skipped; acceptable only outside production.
    #[serde(default)]
    pub mercadopago_webhook_secret: Option<String>,

    /// Payment gateway API base URL (overridable for tests)
    #[serde(default = "default_gateway_base_url")]
    pub gateway_base_url: String,

    /// Timeout for gateway calls, in seconds
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    /// Public URL of the storefront, used for post-payment redirects
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,

    /// Public URL of this API, used to build the webhook notification URL
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// API key for the transactional email provider; emails are skipped
    /// when absent
    #[serde(default)]
    pub email_api_key: Option<String>,

    /// Sender address for confirmation emails
    #[serde(default)]
    pub email_from: Option<String>,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,
}

impl AppConfig {
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Post-load sanity checks that cross field boundaries.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        if self.is_production() && self.mercadopago_webhook_secret.is_none() {
            return Err(ConfigError::Message(
                "mercadopago_webhook_secret must be set in production".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads configuration from `config/default.toml` (optional),
/// `config/{environment}.toml` (optional), then environment variables
/// prefixed with `APP__`.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment =
        std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder()
        .add_source(File::from(Path::new(CONFIG_DIR).join("default")).required(false))
        .add_source(File::from(Path::new(CONFIG_DIR).join(&environment)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    // Bare DATABASE_URL wins over file-provided values, matching how the
    // deployment platform injects it.
    if let Ok(url) = std::env::var("DATABASE_URL") {
        builder = builder.set_override("database_url", url)?;
    }
    if let Ok(token) = std::env::var("MERCADOPAGO_TOKEN") {
        builder = builder.set_override("mercadopago_access_token", token)?;
    }
    if let Ok(secret) = std::env::var("MERCADOPAGO_WEBHOOK_SECRET") {
        builder = builder.set_override("mercadopago_webhook_secret", secret)?;
    }

    let config: AppConfig = builder.build()?.try_deserialize()?;
    config.check()?;

    Ok(config)
}

/// Initializes the global tracing subscriber. Level comes from `RUST_LOG`
/// when set, otherwise from the configured log level.
pub fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".to_string(),
            host: default_host(),
            port: default_port(),
            environment: "test".to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            mercadopago_access_token: "TEST-token".to_string(),
            mercadopago_webhook_secret: None,
            gateway_base_url: default_gateway_base_url(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            frontend_url: default_frontend_url(),
            backend_url: default_backend_url(),
            email_api_key: None,
            email_from: None,
            cors_allowed_origins: None,
        }
    }

    #[test]
    fn production_requires_webhook_secret() {
        let mut cfg = base_config();
        cfg.environment = "production".to_string();
        assert!(cfg.check().is_err());

        cfg.mercadopago_webhook_secret = Some("secret".to_string());
        assert!(cfg.check().is_ok());
    }

    #[test]
    fn non_production_allows_missing_secret() {
        let cfg = base_config();
        assert!(cfg.check().is_ok());
    }
}
