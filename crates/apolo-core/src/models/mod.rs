//! Domain models for the rating core
//!
//! Rate profiles and their schedules, the charged interval traces produced by
//! rating, accounts with their balances, and the event charges envelope.

pub mod account;
pub mod api;
pub mod charges;
pub mod interval;
pub mod rate;
pub mod schedule;
pub mod weights;

pub use account::{
    Account, AccountBalancesBackup, AccountWithWeight, AccountsWithWeight, Balance,
    BalanceWithWeight, BalancesWithWeight, CostIncrement, ExtAccount, ExtBalance, UnitFactor,
};
pub use api::{APIAccount, APIBalance, APIIntervalRate, APIRate, APIRateProfile, Amount};
pub use charges::{AccountCharge, ChargeEntry, EventCharges, ExtAccountCharge, ExtEventCharges};
pub use interval::{
    cost_for_intervals, IntervalRates, RateProfileCost, RateSIncrement, RateSIncrementCost,
    RateSInterval, RateSIntervalCost,
};
pub use rate::{IntervalRate, Rate, RateProfile, RunTime};
pub use schedule::CronSchedule;
pub use weights::{DynamicWeight, DynamicWeights};
