//! Rate profile model
//!
//! A [`RateProfile`] bundles the [`Rate`]s of a tenant. Each rate is gated by
//! a cron activation schedule and priced by an ordered list of
//! [`IntervalRate`]s keyed by the usage threshold at which they start.
//!
//! Profiles are compiled once after construction and are read-only afterwards.

use super::schedule::CronSchedule;
use super::weights::{DynamicWeights, FILTERS_SEP, WEIGHTS_SEP};
use crate::decimal::Decimal;
use crate::error::AppError;
use crate::traits::{Marshaler, RatingLogger};
use crate::AppResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Separator used for concatenated keys such as `Tenant:ID`
pub const CONCATENATED_KEY_SEP: &str = ":";

/// Activation expression used when a rate leaves it empty
pub const ALWAYS_ACTIVE: &str = "* * * * *";

/// Storage map field names
pub mod fields {
    pub const FILTER_IDS: &str = "FilterIDs";
    pub const WEIGHTS: &str = "Weights";
    pub const MIN_COST: &str = "MinCost";
    pub const MAX_COST: &str = "MaxCost";
    pub const MAX_COST_STRATEGY: &str = "MaxCostStrategy";
    pub const RATES: &str = "Rates";
}

pub fn concatenated_key(parts: &[&str]) -> String {
    parts.join(CONCATENATED_KEY_SEP)
}

/// Priced sub-range of a rate, active once usage reaches `interval_start`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IntervalRate {
    #[serde(rename = "IntervalStart", default, skip_serializing_if = "Option::is_none")]
    pub interval_start: Option<Decimal>,

    #[serde(rename = "FixedFee", default, skip_serializing_if = "Option::is_none")]
    pub fixed_fee: Option<Decimal>,

    #[serde(rename = "RecurrentFee", default, skip_serializing_if = "Option::is_none")]
    pub recurrent_fee: Option<Decimal>,

    #[serde(rename = "Unit", default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<Decimal>,

    #[serde(rename = "Increment", default, skip_serializing_if = "Option::is_none")]
    pub increment: Option<Decimal>,
}

impl IntervalRate {
    /// Field by field comparison, a present and an absent value differ
    pub fn equals(&self, other: &IntervalRate) -> bool {
        self == other
    }

    /// Override with the non-zero fields of `other`
    pub fn merge(&mut self, other: &IntervalRate) {
        fn take(dst: &mut Option<Decimal>, src: &Option<Decimal>) {
            if let Some(v) = src {
                if !v.is_zero() {
                    *dst = Some(*v);
                }
            }
        }
        take(&mut self.interval_start, &other.interval_start);
        take(&mut self.fixed_fee, &other.fixed_fee);
        take(&mut self.recurrent_fee, &other.recurrent_fee);
        take(&mut self.unit, &other.unit);
        take(&mut self.increment, &other.increment);
    }

    fn start_or_zero(&self) -> Decimal {
        self.interval_start.unwrap_or(Decimal::ZERO)
    }
}

/// One activation window of a rate, `until` is None when it never ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTime {
    pub from: DateTime<Utc>,
    pub until: Option<DateTime<Utc>>,
}

/// Schedule-gated pricing rule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rate {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "FilterIDs", default, skip_serializing_if = "Option::is_none")]
    pub filter_ids: Option<Vec<String>>,

    /// Cron formatted activation; empty means always active
    #[serde(rename = "ActivationTimes", default)]
    pub activation_times: String,

    /// Decides the winner between overlapping rates
    #[serde(rename = "Weights", default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<DynamicWeights>,

    /// Once active over a whole rating window, lower ranked rates are not evaluated
    #[serde(rename = "Blocker", default)]
    pub blocker: bool,

    #[serde(rename = "IntervalRates", default, skip_serializing_if = "Option::is_none")]
    pub interval_rates: Option<Vec<IntervalRate>>,

    #[serde(skip)]
    sched: Option<Arc<CronSchedule>>,

    #[serde(skip)]
    uid: String,
}

impl PartialEq for Rate {
    // compiled state is derived and not part of the identity
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.filter_ids == other.filter_ids
            && self.activation_times == other.activation_times
            && self.weights == other.weights
            && self.blocker == other.blocker
            && self.interval_rates == other.interval_rates
    }
}

impl Rate {
    /// Uncompiled rate without filters, weights or IntervalRates
    pub fn new(id: &str, activation_times: &str) -> Self {
        Self {
            id: id.to_string(),
            activation_times: activation_times.to_string(),
            ..Default::default()
        }
    }

    /// System wide unique identifier, set by [`RateProfile::compile`]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn is_compiled(&self) -> bool {
        self.sched.is_some()
    }

    pub fn interval_rates(&self) -> &[IntervalRate] {
        self.interval_rates.as_deref().unwrap_or(&[])
    }

    /// Parse the activation expression
    pub fn compile(&mut self) -> AppResult<()> {
        let expr = if self.activation_times.is_empty() {
            ALWAYS_ACTIVE
        } else {
            self.activation_times.as_str()
        };
        self.sched = Some(Arc::new(CronSchedule::parse(expr)?));
        Ok(())
    }

    /// Activation windows overlapping `[start, end)`
    ///
    /// Collects at most `verbosity` windows. Hitting the cap is reported to
    /// `logger` and the windows found so far are returned.
    pub fn run_times(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        verbosity: usize,
        logger: &dyn RatingLogger,
    ) -> AppResult<Vec<RunTime>> {
        let sched = self
            .sched
            .as_ref()
            .ok_or_else(|| AppError::RateNotCompiled(self.id.clone()))?;

        // step back so a window opening exactly at start is found
        let mut cursor = start - chrono::Duration::minutes(1);
        let mut run_times = Vec::new();
        for _ in 0..verbosity {
            let from = match sched.next(cursor) {
                Some(from) if from < end => from,
                _ => return Ok(run_times),
            };
            let until = sched.next_inactive(from);
            run_times.push(RunTime { from, until });
            match until {
                Some(until) if until < end => cursor = until,
                _ => return Ok(run_times),
            }
        }

        logger.warning(&format!(
            "maximum runTime iterations reached for Rate: <{}>, sTime: <{}>, eTime: <{}>",
            self.uid, cursor, end
        ));
        Ok(run_times)
    }

    /// Override and append from `other`
    pub fn merge(&mut self, other: Rate) {
        if !other.id.is_empty() {
            self.id = other.id;
        }
        if !other.activation_times.is_empty() {
            self.activation_times = other.activation_times;
            self.sched = None;
        }
        if other.blocker {
            self.blocker = true;
        }
        if let Some(filters) = other.filter_ids {
            self.filter_ids.get_or_insert_with(Vec::new).extend(filters);
        }
        if let Some(weights) = other.weights {
            self.weights
                .get_or_insert_with(DynamicWeights::default)
                .extend(weights.0);
        }
        for new_ir in other.interval_rates.unwrap_or_default() {
            let existing = self.interval_rates.get_or_insert_with(Vec::new);
            match existing
                .iter_mut()
                .find(|ir| ir.start_or_zero() == new_ir.start_or_zero())
            {
                Some(ir) => ir.merge(&new_ir),
                None => existing.push(new_ir),
            }
        }
    }
}

/// Priced policy bundle of a tenant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateProfile {
    #[serde(rename = "Tenant")]
    pub tenant: String,

    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "FilterIDs", default, skip_serializing_if = "Option::is_none")]
    pub filter_ids: Option<Vec<String>>,

    #[serde(rename = "Weights", default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<DynamicWeights>,

    #[serde(rename = "MinCost", default, skip_serializing_if = "Option::is_none")]
    pub min_cost: Option<Decimal>,

    #[serde(rename = "MaxCost", default, skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<Decimal>,

    #[serde(rename = "MaxCostStrategy", default)]
    pub max_cost_strategy: String,

    #[serde(rename = "Rates", default)]
    pub rates: HashMap<String, Rate>,
}

impl RateProfile {
    pub fn tenant_id(&self) -> String {
        concatenated_key(&[&self.tenant, &self.id])
    }

    /// Assign unique IDs and compile every rate schedule
    pub fn compile(&mut self) -> AppResult<()> {
        for rate in self.rates.values_mut() {
            rate.uid = concatenated_key(&[&self.tenant, &self.id, &rate.id]);
            rate.compile()?;
        }
        Ok(())
    }

    /// Order each rate's IntervalRates ascending by IntervalStart
    pub fn sort(&mut self) {
        for rate in self.rates.values_mut() {
            if let Some(irs) = rate.interval_rates.as_mut() {
                irs.sort_by(|a, b| a.start_or_zero().cmp(&b.start_or_zero()));
            }
        }
    }

    /// Merge `other` into this profile
    pub fn merge(&mut self, other: RateProfile) {
        if !other.tenant.is_empty() {
            self.tenant = other.tenant;
        }
        if !other.id.is_empty() {
            self.id = other.id;
        }
        if !other.max_cost_strategy.is_empty() {
            self.max_cost_strategy = other.max_cost_strategy;
        }
        if let Some(filters) = other.filter_ids {
            self.filter_ids.get_or_insert_with(Vec::new).extend(filters);
        }
        if let Some(weights) = other.weights {
            self.weights
                .get_or_insert_with(DynamicWeights::default)
                .extend(weights.0);
        }
        for (id, rate) in other.rates {
            match self.rates.get_mut(&id) {
                Some(existing) => existing.merge(rate),
                None => {
                    self.rates.insert(id, rate);
                }
            }
        }
        if let Some(min) = other.min_cost.filter(|v| !v.is_zero()) {
            self.min_cost = Some(min);
        }
        if let Some(max) = other.max_cost.filter(|v| !v.is_zero()) {
            self.max_cost = Some(max);
        }
    }

    /// Flatten into the field map used by hash based storage
    pub fn as_data_db_map<M: Marshaler>(&self, ms: &M) -> AppResult<HashMap<String, String>> {
        let mut mp = HashMap::new();
        mp.insert(
            fields::MAX_COST_STRATEGY.to_string(),
            self.max_cost_strategy.clone(),
        );
        if let Some(filters) = self.filter_ids.as_ref().filter(|f| !f.is_empty()) {
            mp.insert(fields::FILTER_IDS.to_string(), filters.join(WEIGHTS_SEP));
        }
        if let Some(weights) = &self.weights {
            mp.insert(
                fields::WEIGHTS.to_string(),
                weights.to_string_with(WEIGHTS_SEP, FILTERS_SEP),
            );
        }
        if let Some(min) = &self.min_cost {
            mp.insert(fields::MIN_COST.to_string(), min.to_string());
        }
        if let Some(max) = &self.max_cost {
            mp.insert(fields::MAX_COST.to_string(), max.to_string());
        }
        for (rate_id, rate) in &self.rates {
            mp.insert(
                concatenated_key(&[fields::RATES, rate_id]),
                ms.marshal(rate)?,
            );
        }
        Ok(mp)
    }

    /// Rebuild a profile from its storage field map
    pub fn from_data_db_map<M: Marshaler>(
        tenant: &str,
        id: &str,
        mp: &HashMap<String, String>,
        ms: &M,
    ) -> AppResult<Self> {
        let mut rp = RateProfile {
            tenant: tenant.to_string(),
            id: id.to_string(),
            max_cost_strategy: mp
                .get(fields::MAX_COST_STRATEGY)
                .cloned()
                .unwrap_or_default(),
            ..Default::default()
        };
        if let Some(filters) = mp.get(fields::FILTER_IDS) {
            rp.filter_ids = Some(filters.split(WEIGHTS_SEP).map(str::to_string).collect());
        }
        if let Some(weights) = mp.get(fields::WEIGHTS) {
            rp.weights = Some(DynamicWeights::from_string(
                weights,
                WEIGHTS_SEP,
                FILTERS_SEP,
            )?);
        }
        if let Some(min) = mp.get(fields::MIN_COST) {
            rp.min_cost = Some(min.parse()?);
        }
        if let Some(max) = mp.get(fields::MAX_COST) {
            rp.max_cost = Some(max.parse()?);
        }
        let rates_prefix = format!("{}{}", fields::RATES, CONCATENATED_KEY_SEP);
        for (key, value) in mp {
            if let Some(rate_id) = key.strip_prefix(&rates_prefix) {
                rp.rates.insert(rate_id.to_string(), ms.unmarshal(value)?);
            }
        }
        Ok(rp)
    }
}
