//! Unified error handling for the rating core
//!
//! Every fallible operation in the rating and debiting path returns an
//! [`AppError`]. Variants are grouped by the category callers apply policy on:
//! configuration problems fail fast, selection problems abort the current
//! charge attempt, account problems are reported distinctly.

use thiserror::Error;

/// Main application error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    // ==================== Configuration / Parse Errors ====================
    #[error("can't convert <{0}> to decimal")]
    DecimalConversion(String),

    #[error("time: unknown unit \"{unit}\" in duration \"{input}\"")]
    UnknownDurationUnit { unit: String, input: String },

    #[error("time: invalid duration \"{0}\"")]
    InvalidDuration(String),

    #[error("invalid time <{input}>: {reason}")]
    InvalidTime { input: String, reason: String },

    #[error("unsupported rounding: <{0}>")]
    UnsupportedRounding(String),

    #[error("invalid DynamicWeight format for string <{0}>")]
    InvalidDynamicWeight(String),

    #[error("invalid Weight <{weight}> in string: <{input}>")]
    InvalidWeight { weight: String, input: String },

    #[error("invalid activation times <{expr}>: {reason}")]
    InvalidSchedule { expr: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    // ==================== Arithmetic Errors ====================
    #[error("decimal overflow: {0}")]
    Overflow(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("cannot convert decimal {0} to float64")]
    FloatConversion(String),

    // ==================== Rating Errors ====================
    #[error("rate not compiled: <{0}>")]
    RateNotCompiled(String),

    #[error("zero increment to be charged within rate: <{0}>")]
    ZeroIncrement(String),

    #[error("no IntervalRates defined for rate: <{0}>")]
    NoIntervalRates(String),

    #[error("intervalStart for rate: <{rate}> higher than usage: {usage}")]
    IntervalStartAboveUsage { rate: String, usage: String },

    #[error("Rate not found: {0}")]
    RateNotFound(String),

    // ==================== Selection Errors ====================
    #[error("no cost increment matching on balance <{0}>")]
    NoCostIncrement(String),

    #[error("ambiguous cost increment on balance <{balance}>: {matched} matches")]
    AmbiguousCostIncrement { balance: String, matched: usize },

    #[error("ambiguous unit factor on balance <{balance}>: {matched} matches")]
    AmbiguousUnitFactor { balance: String, matched: usize },

    #[error("filter error: {0}")]
    Filter(String),

    // ==================== Account Errors ====================
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Balance not found: {balance} on account {account}")]
    BalanceNotFound { account: String, balance: String },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: String, available: String },

    // ==================== Internal Errors ====================
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::DecimalConversion(_) => "decimal_conversion",
            AppError::UnknownDurationUnit { .. } => "unknown_duration_unit",
            AppError::InvalidDuration(_) => "invalid_duration",
            AppError::InvalidTime { .. } => "invalid_time",
            AppError::UnsupportedRounding(_) => "unsupported_rounding",
            AppError::InvalidDynamicWeight(_) => "invalid_dynamic_weight",
            AppError::InvalidWeight { .. } => "invalid_weight",
            AppError::InvalidSchedule { .. } => "invalid_schedule",
            AppError::Config(_) => "config_error",
            AppError::Overflow(_) => "decimal_overflow",
            AppError::DivisionByZero => "division_by_zero",
            AppError::FloatConversion(_) => "float_conversion",
            AppError::RateNotCompiled(_) => "rate_not_compiled",
            AppError::ZeroIncrement(_) => "zero_increment",
            AppError::NoIntervalRates(_) => "no_interval_rates",
            AppError::IntervalStartAboveUsage { .. } => "interval_start_above_usage",
            AppError::RateNotFound(_) => "rate_not_found",
            AppError::NoCostIncrement(_) => "no_cost_increment",
            AppError::AmbiguousCostIncrement { .. } => "ambiguous_cost_increment",
            AppError::AmbiguousUnitFactor { .. } => "ambiguous_unit_factor",
            AppError::Filter(_) => "filter_error",
            AppError::AccountNotFound(_) => "account_not_found",
            AppError::BalanceNotFound { .. } => "balance_not_found",
            AppError::InsufficientBalance { .. } => "insufficient_balance",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// True for malformed input that must be rejected before any computation
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            AppError::DecimalConversion(_)
                | AppError::UnknownDurationUnit { .. }
                | AppError::InvalidDuration(_)
                | AppError::InvalidTime { .. }
                | AppError::UnsupportedRounding(_)
                | AppError::InvalidDynamicWeight(_)
                | AppError::InvalidWeight { .. }
                | AppError::InvalidSchedule { .. }
                | AppError::Config(_)
        )
    }

    /// True when zero or several candidates matched where exactly one was required
    pub fn is_selection_error(&self) -> bool {
        matches!(
            self,
            AppError::NoCostIncrement(_)
                | AppError::AmbiguousCostIncrement { .. }
                | AppError::AmbiguousUnitFactor { .. }
        )
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(err: rust_decimal::Error) -> Self {
        AppError::Overflow(err.to_string())
    }
}
