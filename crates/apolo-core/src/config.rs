//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use crate::decimal::RoundingMethod;
use crate::error::AppError;
use crate::AppResult;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Main application configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub rating: RatingConfig,
    #[serde(default)]
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rating configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RatingConfig {
    /// Maximum activation windows collected per rate and query
    #[serde(default = "default_verbosity")]
    pub verbosity: usize,

    /// Decimals kept by the final cost correction (None disables rounding)
    #[serde(default = "default_rounding_decimals")]
    pub rounding_decimals: Option<u32>,

    /// Rounding method name, e.g. `*toNearestEven`
    #[serde(default = "default_rounding_method")]
    pub rounding_method: String,
}

fn default_verbosity() -> usize {
    1000
}

fn default_rounding_decimals() -> Option<u32> {
    Some(5)
}

fn default_rounding_method() -> String {
    "*toNearestAway".to_string()
}

impl RatingConfig {
    /// Parsed rounding method
    pub fn rounding(&self) -> AppResult<RoundingMethod> {
        self.rounding_method.parse()
    }
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            verbosity: default_verbosity(),
            rounding_decimals: default_rounding_decimals(),
            rounding_method: default_rounding_method(),
        }
    }
}

/// Account debiting configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AccountsConfig {
    /// Upper bound on balances walked by one usage debit
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_max_iterations() -> usize {
    100
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of plain text
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("rating.verbosity", default_verbosity() as i64)?
            .set_default("rating.rounding_decimals", 5)?
            .set_default("rating.rounding_method", default_rounding_method())?
            .set_default("accounts.max_iterations", default_max_iterations() as i64)?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.json", false)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with APOLO_ prefix
            .add_source(
                Environment::with_prefix("APOLO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("APOLO").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Reject values the rating path cannot work with
    pub fn validate(&self) -> AppResult<()> {
        if self.rating.verbosity == 0 {
            return Err(AppError::Config(
                "rating.verbosity must be greater than zero".to_string(),
            ));
        }
        if self.accounts.max_iterations == 0 {
            return Err(AppError::Config(
                "accounts.max_iterations must be greater than zero".to_string(),
            ));
        }
        self.rating.rounding()?;
        Ok(())
    }
}
