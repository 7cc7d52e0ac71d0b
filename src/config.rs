use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use validator::{Validate, ValidationError};

use crate::services::fiscal::TaxCondition;

pub const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_SELLER_TAX_CONDITION: &str = "RESPONSABLE_INSCRIPTO";
const DEFAULT_QUOTATION_VALID_DAYS: i64 = 15;
const DEFAULT_CAE_VALIDITY_DAYS: i64 = 10;
const DEFAULT_LOW_MARGIN_THRESHOLD: i64 = 10;
const DEFAULT_EXPIRY_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Settlement service settings, validated after every load.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Emit one JSON object per log line
    #[serde(default)]
    pub log_json: bool,

    /// Apply the embedded schema before serving
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Event channel capacity for the audit pipeline
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    /// Fiscal condition of the selling company, drives invoice type selection
    #[serde(default = "default_seller_tax_condition")]
    #[validate(custom = "validate_tax_condition")]
    pub seller_tax_condition: String,

    /// Point of sale used when a request does not name one
    #[serde(default = "default_point_of_sale")]
    #[validate(range(min = 1, max = 99999))]
    pub default_point_of_sale: i32,

    /// Validity window for new and duplicated quotations
    #[serde(default = "default_quotation_valid_days")]
    #[validate(range(min = 1, max = 365))]
    pub quotation_valid_days: i64,

    /// Days until a mock CAE expires
    #[serde(default = "default_cae_validity_days")]
    #[validate(range(min = 1))]
    pub cae_validity_days: i64,

    /// Lines under this margin percentage produce a warning
    #[serde(default = "default_low_margin_threshold")]
    #[validate(range(min = 0, max = 100))]
    pub low_margin_threshold_percent: i64,

    /// Interval for the quotation expiry sweeper, 0 disables it
    #[serde(default = "default_expiry_sweep_interval_secs")]
    pub expiry_sweep_interval_secs: u64,
}

impl AppConfig {
    /// Settings with every optional field at its default.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            seller_tax_condition: default_seller_tax_condition(),
            default_point_of_sale: default_point_of_sale(),
            quotation_valid_days: default_quotation_valid_days(),
            cae_validity_days: default_cae_validity_days(),
            low_margin_threshold_percent: default_low_margin_threshold(),
            expiry_sweep_interval_secs: default_expiry_sweep_interval_secs(),
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Seller fiscal condition; unknown values were rejected at load time.
    pub fn seller_tax_condition(&self) -> TaxCondition {
        TaxCondition::from_str(&self.seller_tax_condition).unwrap_or(TaxCondition::Other)
    }

    pub fn low_margin_threshold(&self) -> Decimal {
        Decimal::from(self.low_margin_threshold_percent)
    }

    /// Reports the effective settings. Call once tracing is installed.
    pub fn log_summary(&self) {
        if !Path::new(CONFIG_DIR).exists() {
            info!(dir = CONFIG_DIR, "no settings directory, using defaults and APP__ variables");
        }
        info!(
            environment = %self.environment,
            seller = %self.seller_tax_condition,
            point_of_sale = self.default_point_of_sale,
            auto_migrate = self.auto_migrate,
            "settlement settings loaded"
        );
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("could not read settings: {0}")]
    Load(#[from] ConfigError),

    #[error("invalid settings: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_seller_tax_condition() -> String {
    DEFAULT_SELLER_TAX_CONDITION.to_string()
}

fn default_point_of_sale() -> i32 {
    1
}

fn default_quotation_valid_days() -> i64 {
    DEFAULT_QUOTATION_VALID_DAYS
}

fn default_cae_validity_days() -> i64 {
    DEFAULT_CAE_VALIDITY_DAYS
}

fn default_low_margin_threshold() -> i64 {
    DEFAULT_LOW_MARGIN_THRESHOLD
}

fn default_expiry_sweep_interval_secs() -> u64 {
    DEFAULT_EXPIRY_SWEEP_INTERVAL_SECS
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
    if LEVELS.iter().any(|l| l.eq_ignore_ascii_case(level)) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some(format!("expected one of {}", LEVELS.join(", ")).into());
        Err(err)
    }
}

fn validate_tax_condition(value: &str) -> Result<(), ValidationError> {
    if TaxCondition::from_str(value).is_some() {
        Ok(())
    } else {
        let mut err = ValidationError::new("seller_tax_condition");
        err.message = Some(
            "Must be one of: RESPONSABLE_INSCRIPTO, MONOTRIBUTISTA, EXENTO, CONSUMIDOR_FINAL, OTHER"
                .into(),
        );
        Err(err)
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over `level` when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("wholesale_settlement={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|directive| !directive.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Reads settings from, lowest precedence first: built-in defaults,
/// `config/default.toml`, `config/{RUN_ENV}.toml`, then `APP__*` variables.
///
/// Runs before tracing is installed, so it reports through its result only.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let config = Config::builder()
        .set_default("database_url", "sqlite://settlement.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let settings: AppConfig = config.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}
