//! Charged interval traces
//!
//! The computed charging trace of a usage window: a [`RateSInterval`] holds
//! ordered [`RateSIncrement`]s, each pointing at an [`IntervalRate`] through
//! a key into a shared reference map. Costs are computed lazily and cached.

use super::rate::IntervalRate;
use crate::decimal::{Decimal, RoundingMethod};
use crate::error::AppError;
use crate::AppResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Usage marker of an increment charging the FixedFee
pub const FIXED_FEE_USAGE: Decimal = Decimal::NEGATIVE_ONE;

/// Names recorded in [`RateProfileCost::altered`]
pub const ALTERED_MIN_COST: &str = "MinCost";
pub const ALTERED_MAX_COST: &str = "MaxCost";
pub const ALTERED_ROUNDING_DECIMALS: &str = "RoundingDecimals";

/// Reference map from increment RateID to the IntervalRate it was priced with
pub type IntervalRates = HashMap<String, IntervalRate>;

/// Compute-once cost slot
#[derive(Default)]
struct CostCache(Mutex<Option<Decimal>>);

impl CostCache {
    fn get_or_try_init(&self, init: impl FnOnce() -> AppResult<Decimal>) -> AppResult<Decimal> {
        let mut slot = self.0.lock();
        if let Some(cost) = *slot {
            return Ok(cost);
        }
        let cost = init()?;
        *slot = Some(cost);
        Ok(cost)
    }
}

impl Clone for CostCache {
    fn clone(&self) -> Self {
        CostCache(Mutex::new(*self.0.lock()))
    }
}

impl fmt::Debug for CostCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", *self.0.lock())
    }
}

/// One priced step of a charging trace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateSIncrement {
    #[serde(rename = "IncrementStart", default, skip_serializing_if = "Option::is_none")]
    pub increment_start: Option<Decimal>,

    /// Index of the IntervalRate within its Rate
    #[serde(rename = "RateIntervalIndex")]
    pub rate_interval_index: usize,

    /// Key into the IntervalRate reference map
    #[serde(rename = "RateID")]
    pub rate_id: String,

    /// How many times this increment repeats
    #[serde(rename = "CompressFactor")]
    pub compress_factor: i64,

    #[serde(rename = "Usage", default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Decimal>,

    #[serde(skip)]
    cost: CostCache,
}

impl PartialEq for RateSIncrement {
    fn eq(&self, other: &Self) -> bool {
        self.increment_start == other.increment_start
            && self.rate_interval_index == other.rate_interval_index
            && self.rate_id == other.rate_id
            && self.compress_factor == other.compress_factor
            && self.usage == other.usage
    }
}

impl RateSIncrement {
    pub fn new(
        increment_start: Option<Decimal>,
        rate_interval_index: usize,
        rate_id: &str,
        compress_factor: i64,
        usage: Option<Decimal>,
    ) -> Self {
        Self {
            increment_start,
            rate_interval_index,
            rate_id: rate_id.to_string(),
            compress_factor,
            usage,
            cost: CostCache::default(),
        }
    }

    /// Increment charging the FixedFee of `rates[rate_id]` once
    pub fn fixed_fee(increment_start: Decimal, rate_interval_index: usize, rate_id: &str) -> Self {
        Self::new(
            Some(increment_start),
            rate_interval_index,
            rate_id,
            1,
            Some(FIXED_FEE_USAGE),
        )
    }

    pub fn is_fixed_fee(&self) -> bool {
        self.usage == Some(FIXED_FEE_USAGE)
    }

    /// Cost of this increment priced with `rates[rate_id]`
    ///
    /// FixedFee increments cost the FixedFee. Others cost the RecurrentFee
    /// scaled by Increment/Unit when those differ, times the CompressFactor.
    pub fn cost(&self, rates: &IntervalRates) -> AppResult<Decimal> {
        self.cost.get_or_try_init(|| {
            let ir = rates.get(&self.rate_id).ok_or_else(|| {
                AppError::RateNotFound(format!("interval rate <{}>", self.rate_id))
            })?;
            if self.is_fixed_fee() {
                return Ok(ir.fixed_fee.unwrap_or(Decimal::ZERO));
            }
            let mut cost = ir.recurrent_fee.unwrap_or(Decimal::ZERO);
            if let (Some(increment), Some(unit)) = (ir.increment, ir.unit) {
                if increment != unit {
                    cost = cost.checked_mul(increment)?.checked_div(unit)?;
                }
            }
            if self.compress_factor != 1 {
                cost = cost.checked_mul(Decimal::from(self.compress_factor))?;
            }
            Ok(cost)
        })
    }

    /// Interchangeable for compression: same rate, same IntervalRate, same usage
    pub fn compress_equals(&self, other: &RateSIncrement) -> bool {
        self.rate_id == other.rate_id
            && self.rate_interval_index == other.rate_interval_index
            && self.usage == other.usage
    }

    /// Full equality resolving RateIDs through each side's reference map
    pub fn equals(
        &self,
        other: &RateSIncrement,
        self_ref: Option<&IntervalRates>,
        other_ref: Option<&IntervalRates>,
    ) -> bool {
        if self.usage != other.usage
            || self.increment_start != other.increment_start
            || self.compress_factor != other.compress_factor
            || self.rate_interval_index != other.rate_interval_index
        {
            return false;
        }
        match (self_ref, other_ref) {
            (Some(a), Some(b)) if !self.rate_id.is_empty() && !other.rate_id.is_empty() => {
                a.get(&self.rate_id) == b.get(&other.rate_id)
            }
            _ => true,
        }
    }

    pub fn as_rate_s_increment_cost(&self) -> RateSIncrementCost {
        RateSIncrementCost {
            usage: self.usage,
            rate_id: self.rate_id.clone(),
            rate_interval_index: self.rate_interval_index,
            compress_factor: self.compress_factor,
        }
    }
}

/// Increments charged for one ordered rate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateSInterval {
    #[serde(rename = "IntervalStart", default, skip_serializing_if = "Option::is_none")]
    pub interval_start: Option<Decimal>,

    #[serde(rename = "Increments", default, skip_serializing_if = "Option::is_none")]
    pub increments: Option<Vec<RateSIncrement>>,

    #[serde(rename = "CompressFactor")]
    pub compress_factor: i64,

    #[serde(skip)]
    cost: CostCache,
}

impl PartialEq for RateSInterval {
    fn eq(&self, other: &Self) -> bool {
        self.interval_start == other.interval_start
            && self.increments == other.increments
            && self.compress_factor == other.compress_factor
    }
}

impl RateSInterval {
    pub fn new(interval_start: Decimal, increments: Vec<RateSIncrement>) -> Self {
        Self {
            interval_start: Some(interval_start),
            increments: Some(increments),
            compress_factor: 1,
            cost: CostCache::default(),
        }
    }

    pub fn increments(&self) -> &[RateSIncrement] {
        self.increments.as_deref().unwrap_or(&[])
    }

    /// Sum of the increment costs, computed once
    pub fn cost(&self, rates: &IntervalRates) -> AppResult<Decimal> {
        self.cost.get_or_try_init(|| {
            self.increments()
                .iter()
                .try_fold(Decimal::ZERO, |acc, incr| acc.checked_add(incr.cost(rates)?))
        })
    }

    pub fn compress_equals(&self, other: &RateSInterval) -> bool {
        let (a, b) = (self.increments(), other.increments());
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.compress_equals(y))
    }

    pub fn equals(
        &self,
        other: &RateSInterval,
        self_ref: Option<&IntervalRates>,
        other_ref: Option<&IntervalRates>,
    ) -> bool {
        if self.interval_start != other.interval_start
            || self.increments.is_some() != other.increments.is_some()
            || self.compress_factor != other.compress_factor
        {
            return false;
        }
        let (a, b) = (self.increments(), other.increments());
        a.len() == b.len()
            && a
                .iter()
                .zip(b)
                .all(|(x, y)| x.equals(y, self_ref, other_ref))
    }

    pub fn as_rate_s_interval_cost(&self) -> RateSIntervalCost {
        RateSIntervalCost {
            increments: self.increments.as_ref().map(|incrs| {
                incrs
                    .iter()
                    .map(RateSIncrement::as_rate_s_increment_cost)
                    .collect()
            }),
            compress_factor: self.compress_factor,
        }
    }
}

/// Total cost of a sequence of intervals, each weighted by its CompressFactor
pub fn cost_for_intervals(intervals: &[RateSInterval], rates: &IntervalRates) -> AppResult<Decimal> {
    intervals.iter().try_fold(Decimal::ZERO, |acc, interval| {
        let cost = interval
            .cost(rates)?
            .checked_mul(Decimal::from(interval.compress_factor))?;
        acc.checked_add(cost)
    })
}

/// Cost trace form of an increment, without IncrementStart
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RateSIncrementCost {
    #[serde(rename = "Usage", default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Decimal>,

    #[serde(rename = "RateID")]
    pub rate_id: String,

    #[serde(rename = "RateIntervalIndex")]
    pub rate_interval_index: usize,

    #[serde(rename = "CompressFactor")]
    pub compress_factor: i64,
}

impl RateSIncrementCost {
    pub fn equals(
        &self,
        other: &RateSIncrementCost,
        self_ref: Option<&IntervalRates>,
        other_ref: Option<&IntervalRates>,
    ) -> bool {
        if self.usage != other.usage
            || self.compress_factor != other.compress_factor
            || self.rate_interval_index != other.rate_interval_index
        {
            return false;
        }
        match (self_ref, other_ref) {
            (None, None) => true,
            (Some(a), Some(b)) => a.get(&self.rate_id) == b.get(&other.rate_id),
            _ => false,
        }
    }
}

/// Cost trace form of an interval, without IntervalStart
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RateSIntervalCost {
    #[serde(rename = "Increments", default, skip_serializing_if = "Option::is_none")]
    pub increments: Option<Vec<RateSIncrementCost>>,

    #[serde(rename = "CompressFactor")]
    pub compress_factor: i64,
}

impl RateSIntervalCost {
    pub fn equals(
        &self,
        other: &RateSIntervalCost,
        self_ref: Option<&IntervalRates>,
        other_ref: Option<&IntervalRates>,
    ) -> bool {
        match (&self.increments, &other.increments) {
            (None, None) => self.compress_factor == other.compress_factor,
            (Some(a), Some(b)) => {
                self.compress_factor == other.compress_factor
                    && a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| x.equals(y, self_ref, other_ref))
            }
            _ => false,
        }
    }
}

/// Cost returned by a rate profile cost query
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RateProfileCost {
    /// RateProfile ID
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Cost")]
    pub cost: Decimal,

    #[serde(rename = "MinCost", default, skip_serializing_if = "Option::is_none")]
    pub min_cost: Option<Decimal>,

    #[serde(rename = "MaxCost", default, skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<Decimal>,

    #[serde(rename = "MaxCostStrategy", default)]
    pub max_cost_strategy: String,

    #[serde(rename = "CostIntervals", default, skip_serializing_if = "Option::is_none")]
    pub cost_intervals: Option<Vec<RateSIntervalCost>>,

    #[serde(rename = "Rates", default, skip_serializing_if = "Option::is_none")]
    pub rates: Option<IntervalRates>,

    /// Corrections applied by [`RateProfileCost::correct_cost`], in order
    #[serde(rename = "Altered", default, skip_serializing_if = "Option::is_none")]
    pub altered: Option<Vec<String>>,
}

impl RateProfileCost {
    /// Final correction: MinCost, then MaxCost, then rounding
    ///
    /// Clamping runs first so rounding cannot move a clamped cost out of
    /// bounds in the wrong direction.
    pub fn correct_cost(&mut self, rounding_decimals: Option<u32>, method: RoundingMethod) {
        if let Some(min) = self.min_cost {
            if self.cost < min {
                self.cost = min;
                self.record_altered(ALTERED_MIN_COST);
            }
        }
        if let Some(max) = self.max_cost {
            if self.cost > max {
                self.cost = max;
                self.record_altered(ALTERED_MAX_COST);
            }
        }
        if let Some(decimals) = rounding_decimals {
            self.cost = self.cost.round(decimals, method);
            self.record_altered(ALTERED_ROUNDING_DECIMALS);
        }
    }

    fn record_altered(&mut self, what: &str) {
        self.altered
            .get_or_insert_with(Vec::new)
            .push(what.to_string());
    }

    pub fn equals(&self, other: &RateProfileCost) -> bool {
        if self.id != other.id
            || self.cost != other.cost
            || self.min_cost != other.min_cost
            || self.max_cost != other.max_cost
            || self.max_cost_strategy != other.max_cost_strategy
            || self.altered != other.altered
            || self.rates.is_some() != other.rates.is_some()
            || self.rates.as_ref().map(HashMap::len) != other.rates.as_ref().map(HashMap::len)
        {
            return false;
        }
        match (&self.cost_intervals, &other.cost_intervals) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|(x, y)| x.equals(y, self.rates.as_ref(), other.rates.as_ref()))
            }
            _ => false,
        }
    }
}
