use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::info;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
const DEFAULT_RATE_REFRESH_SECS: u64 = 3600;
const DEFAULT_FALLBACK_USD_PER_TON: &str = "5.0";

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("missing required setting: {0}")]
    MissingSetting(&'static str),
    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

/// Application configuration, loaded once at startup. Missing required
/// secrets are fatal: the process refuses to start rather than limping
/// along with a rail it cannot talk to.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Database connection URL (sqlite or postgres)
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_env")]
    pub environment: String,

    /// Logging level filter
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Wallet address that receives on-chain payments. All wallet-rail
    /// orders are disambiguated by memo against this single address.
    pub owner_wallet_address: String,

    /// Base URL of the crypto-invoice service
    pub invoice_api_url: String,
    /// API token for the crypto-invoice service
    pub invoice_api_token: String,

    /// Base URL of the chain explorer used for wallet-rail verification
    pub chain_api_url: String,

    /// Base URL of the star issuance service
    pub issuance_api_url: String,
    /// API token for the star issuance service
    pub issuance_api_token: String,

    /// Exchange-rate feed endpoint (USD per TON)
    pub rate_feed_url: String,

    /// Last-known-good rate used until the first successful feed fetch
    #[serde(default = "default_fallback_rate")]
    pub fallback_usd_per_ton: Decimal,

    /// Interval between background reconciliation sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Interval between exchange-rate refreshes
    #[serde(default = "default_rate_refresh")]
    pub rate_refresh_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_env() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_fallback_rate() -> Decimal {
    DEFAULT_FALLBACK_USD_PER_TON.parse().unwrap_or(Decimal::ONE)
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_rate_refresh() -> u64 {
    DEFAULT_RATE_REFRESH_SECS
}

impl AppConfig {
    pub fn is_development(&self) -> bool {
        self.environment == "development" || self.environment == "test"
    }

    /// Validates the loaded configuration. Any failure here aborts startup.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigurationError::MissingSetting("database_url"));
        }
        if self.owner_wallet_address.trim().is_empty() {
            return Err(ConfigurationError::MissingSetting("owner_wallet_address"));
        }
        if self.invoice_api_token.trim().is_empty() {
            return Err(ConfigurationError::MissingSetting("invoice_api_token"));
        }
        if self.issuance_api_token.trim().is_empty() {
            return Err(ConfigurationError::MissingSetting("issuance_api_token"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigurationError::InvalidSetting {
                name: "sweep_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.fallback_usd_per_ton <= Decimal::ZERO {
            return Err(ConfigurationError::InvalidSetting {
                name: "fallback_usd_per_ton",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Loads configuration from `config/default.toml`, an environment-specific
/// overlay, and `APP__`-prefixed environment variables, in that order.
pub fn load_config() -> Result<AppConfig, ConfigurationError> {
    let run_env = std::env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder()
        .set_default("environment", run_env.clone())?
        .set_default("fallback_usd_per_ton", DEFAULT_FALLBACK_USD_PER_TON)?;

    let default_file = Path::new(CONFIG_DIR).join("default.toml");
    if default_file.exists() {
        builder = builder.add_source(File::from(default_file));
    }
    let env_file = Path::new(CONFIG_DIR).join(format!("{run_env}.toml"));
    if env_file.exists() {
        builder = builder.add_source(File::from(env_file));
    }

    let settings = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let cfg: AppConfig = settings.try_deserialize()?;
    cfg.validate()?;

    info!(
        environment = %cfg.environment,
        port = cfg.port,
        sweep_interval_secs = cfg.sweep_interval_secs,
        "Configuration loaded"
    );
    Ok(cfg)
}

/// Initializes the global tracing subscriber with an env-filter built from
/// the configured log level (RUST_LOG still wins when set).
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("starshop_api={log_level},tower_http=info")));

    let _ = fmt().with_env_filter(filter).try_init();
}
