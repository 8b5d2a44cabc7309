//! ApoloBilling Rating Core
//!
//! This crate provides the foundational types for rating usage events and
//! debiting account balances. It includes:
//!
//! - Exact decimal arithmetic for money and usage
//! - Cron activation schedules and rate profiles
//! - Charged interval traces with cost memoization
//! - Accounts, balances and the backup/restore undo mechanism
//! - Event charges returned to callers
//! - Unified error handling and application configuration

pub mod config;
pub mod decimal;
pub mod error;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use decimal::{Decimal, RoundingMethod};
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
