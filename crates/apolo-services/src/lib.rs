//! Business logic services for the ApoloBilling rating core
//!
//! This crate orchestrates the core models into the two operations callers
//! run per usage event: rating it against a rate profile and debiting the
//! result from account balances.
//!
//! # Architecture
//!
//! Services are designed to be composable and testable:
//! - Each service owns its collaborators (filter matcher, logger) behind Arc
//! - All operations are synchronous, in-memory and instrumented with tracing
//! - Comprehensive error handling with AppError
//!
//! # Services
//!
//! - `RatingService` - Rate ordering over time, increment computation and
//!   rate profile cost queries
//! - `DebitService` - Balance selection and debiting with backup/restore
//!   rollback

pub mod debit;
pub mod rating;

pub use debit::{ChargeRequest, DebitService};
pub use rating::{
    compute_rate_s_intervals, order_rates_on_intervals, OrderedRate, RatingQuery, RatingService,
};

/// Business logic constants
pub mod constants {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    /// Event option carrying the usage to rate
    pub const OPT_USAGE: &str = "*usage";

    /// Event option carrying the session start time (RFC3339)
    pub const OPT_START_TIME: &str = "*startTime";

    /// Event option carrying the usage already rated in this session
    pub const OPT_INTERVAL_START: &str = "*intervalStart";

    /// Usage rated when the event carries none (one minute, in nanoseconds)
    pub const DEFAULT_USAGE_NANOS: i64 = 60_000_000_000;

    /// Factor applied when no UnitFactor matches
    pub const DEFAULT_UNIT_FACTOR: Decimal = dec!(1);
}
