//! Rating service implementation
//!
//! Decides which rate of a profile applies at which point of a session,
//! breaks the usage into priced increments and produces the corrected
//! [`RateProfileCost`].

use apolo_core::{
    config::RatingConfig,
    models::{
        api::Amount,
        interval::{cost_for_intervals, IntervalRates, RateProfileCost, RateSIncrement, RateSInterval},
        rate::{IntervalRate, Rate, RateProfile},
        weights::resolve_weight,
    },
    traits::{EventContext, FilterMatcher, RatingLogger},
    AppError, AppResult, Decimal, RoundingMethod,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::constants::{DEFAULT_USAGE_NANOS, OPT_INTERVAL_START, OPT_START_TIME, OPT_USAGE};

/// Rate taking over at `interval_start` nanoseconds into the session
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedRate<'a> {
    pub interval_start: Decimal,
    pub rate: &'a Rate,
}

/// Order rates over the session window
///
/// Every activation and deactivation time of every rate is a candidate
/// switch point. At each one the active rate with the highest weight wins,
/// equal weights going to the lower unique ID. Evaluation starts at the last
/// switch point at or before `start`.
///
/// Rates are evaluated in rank order. A blocker rate active over the whole
/// window stops the evaluation of every rate ranked below it.
pub fn order_rates_on_intervals<'a>(
    rates: &[(&'a Rate, f64)],
    start: DateTime<Utc>,
    usage: Decimal,
    is_duration: bool,
    verbosity: usize,
    logger: &dyn RatingLogger,
) -> AppResult<Vec<OrderedRate<'a>>> {
    let end = if is_duration {
        start + usage.to_duration()?
    } else {
        start + Duration::minutes(1)
    };

    let mut ranked: Vec<usize> = (0..rates.len()).collect();
    ranked.sort_by(|&a, &b| {
        rates[b]
            .1
            .partial_cmp(&rates[a].1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| rates[a].0.uid().cmp(rates[b].0.uid()))
    });

    let mut windows: Vec<Vec<_>> = (0..rates.len()).map(|_| Vec::new()).collect();
    let mut switch_times = BTreeSet::new();
    for idx in ranked {
        let rate = rates[idx].0;
        let run_times = rate.run_times(start, end, verbosity, logger)?;
        for rt in &run_times {
            switch_times.insert(rt.from);
            if let Some(until) = rt.until {
                switch_times.insert(until);
            }
        }
        let blocks = rate.blocker
            && run_times
                .iter()
                .any(|rt| rt.from <= start && rt.until.map_or(true, |until| until >= end));
        windows[idx] = run_times;
        if blocks {
            debug!("Blocker rate {} covers the window, skipping lower rates", rate.uid());
            break;
        }
    }

    let first = switch_times.range(..=start).next_back().copied();
    let mut ordered: Vec<OrderedRate<'a>> = Vec::new();
    let mut last_winner: Option<usize> = None;
    for t in switch_times
        .iter()
        .filter(|t| first.map_or(true, |f| **t >= f) && **t < end)
    {
        let mut winner: Option<usize> = None;
        for (idx, run_times) in windows.iter().enumerate() {
            let active = run_times
                .iter()
                .any(|rt| rt.from <= *t && rt.until.map_or(true, |until| until > *t));
            if !active {
                continue;
            }
            winner = match winner {
                Some(best) if !outranks(rates[idx], rates[best]) => Some(best),
                _ => Some(idx),
            };
        }
        let Some(idx) = winner else {
            continue;
        };
        if last_winner == Some(idx) {
            continue;
        }
        let offset = if *t > start {
            Decimal::from_duration(*t - start)?
        } else {
            Decimal::ZERO
        };
        ordered.push(OrderedRate {
            interval_start: offset,
            rate: rates[idx].0,
        });
        last_winner = Some(idx);
    }
    Ok(ordered)
}

fn outranks(candidate: (&Rate, f64), best: (&Rate, f64)) -> bool {
    candidate.1 > best.1 || (candidate.1 == best.1 && candidate.0.uid() < best.0.uid())
}

/// Break `[interval_start, interval_start + usage)` into priced increments
///
/// Each ordered rate yields one interval, and a rate reaching the window
/// without IntervalRates fails the computation. Inside a rate the
/// IntervalRate in force at the current position prices the usage up to the
/// next IntervalRate or the end of the rate. The IntervalRates used are
/// registered into `concrete_rates` under generated keys, reusing the key of
/// an equal entry.
pub fn compute_rate_s_intervals(
    ordered: &[OrderedRate<'_>],
    interval_start: Decimal,
    usage: Decimal,
    concrete_rates: &mut IntervalRates,
) -> AppResult<Vec<RateSInterval>> {
    let total = interval_start.checked_add(usage)?;
    let mut intervals = Vec::with_capacity(ordered.len());
    for (i, ord) in ordered.iter().enumerate() {
        let rate_end = ordered
            .get(i + 1)
            .map_or(total, |next| next.interval_start)
            .min(total);
        let mut pos = ord.interval_start.max(interval_start);
        if pos >= rate_end {
            continue;
        }
        let rate_start = pos;
        let irs = ord.rate.interval_rates();
        if irs.is_empty() {
            return Err(AppError::NoIntervalRates(ord.rate.uid().to_string()));
        }
        let mut increments = Vec::new();
        for (j, ir) in irs.iter().enumerate() {
            if pos >= rate_end {
                break;
            }
            let ir_start = ir.interval_start.unwrap_or(Decimal::ZERO);
            if j == 0 && ir_start > pos {
                return Err(AppError::IntervalStartAboveUsage {
                    rate: ord.rate.uid().to_string(),
                    usage: pos.to_string(),
                });
            }
            let next_start = irs
                .get(j + 1)
                .map(|next| next.interval_start.unwrap_or(Decimal::ZERO));
            if matches!(next_start, Some(ns) if ns <= pos) {
                continue;
            }
            let segment_end = match next_start {
                Some(ns) if ns < rate_end => ns,
                _ => rate_end,
            };
            let increment = match ir.increment {
                Some(inc) if !inc.is_zero() => inc,
                _ => return Err(AppError::ZeroIncrement(ord.rate.uid().to_string())),
            };
            let rate_id = register_interval_rate(concrete_rates, ir);
            if ir.fixed_fee.is_some_and(|ff| !ff.is_zero()) {
                increments.push(RateSIncrement::fixed_fee(pos, j, &rate_id));
            }
            let segment = segment_end.checked_sub(pos)?;
            let compress_factor = segment.checked_div(increment)?.ceil().to_i64()?;
            increments.push(RateSIncrement::new(
                Some(pos),
                j,
                &rate_id,
                compress_factor,
                Some(segment),
            ));
            pos = segment_end;
        }
        intervals.push(RateSInterval::new(rate_start, increments));
    }
    Ok(intervals)
}

fn register_interval_rate(concrete_rates: &mut IntervalRates, ir: &IntervalRate) -> String {
    if let Some((key, _)) = concrete_rates.iter().find(|(_, known)| known.equals(ir)) {
        return key.clone();
    }
    let key = Uuid::new_v4().to_string();
    concrete_rates.insert(key.clone(), ir.clone());
    key
}

/// Fold consecutive compress-equal intervals into one
fn compress_intervals(intervals: Vec<RateSInterval>) -> Vec<RateSInterval> {
    let mut compressed: Vec<RateSInterval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match compressed.last_mut() {
            Some(last) if last.compress_equals(&interval) => {
                last.compress_factor += interval.compress_factor;
            }
            _ => compressed.push(interval),
        }
    }
    compressed
}

/// Inputs of one cost query
#[derive(Debug, Clone, PartialEq)]
pub struct RatingQuery {
    /// Session start
    pub start: DateTime<Utc>,
    /// Usage already rated before this query
    pub interval_start: Decimal,
    pub usage: Decimal,
    /// Usage is a duration in nanoseconds rather than a unit count
    pub is_duration: bool,
    pub event: EventContext,
}

impl RatingQuery {
    pub fn new(start: DateTime<Utc>, usage: Decimal, event: EventContext) -> Self {
        Self {
            start,
            interval_start: Decimal::ZERO,
            usage,
            is_duration: true,
            event,
        }
    }

    /// Read `*startTime`, `*usage` and `*intervalStart` from the event
    ///
    /// A missing start time means now. A missing usage rates one minute
    /// worth of a non-duration unit window.
    pub fn from_event(event: EventContext) -> AppResult<Self> {
        let start = match event.get(OPT_START_TIME) {
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| AppError::InvalidTime {
                    input: s.clone(),
                    reason: e.to_string(),
                })?,
            Some(other) => {
                return Err(AppError::InvalidTime {
                    input: other.to_string(),
                    reason: "expected an RFC3339 string".to_string(),
                })
            }
            None => Utc::now(),
        };
        let (usage, is_duration) = match event.get(OPT_USAGE) {
            Some(value) => (amount_of(value)?, true),
            None => (Decimal::from(DEFAULT_USAGE_NANOS), false),
        };
        let interval_start = match event.get(OPT_INTERVAL_START) {
            Some(value) => amount_of(value)?,
            None => Decimal::ZERO,
        };
        Ok(Self {
            start,
            interval_start,
            usage,
            is_duration,
            event,
        })
    }
}

fn amount_of(value: &Value) -> AppResult<Decimal> {
    let amount: Amount = serde_json::from_value(value.clone())
        .map_err(|_| AppError::DecimalConversion(value.to_string()))?;
    amount.to_decimal()
}

/// Rating service
///
/// Holds the filter matcher deciding which rates apply to an event and the
/// logger receiving non-fatal warnings.
pub struct RatingService<F: FilterMatcher> {
    matcher: Arc<F>,
    logger: Arc<dyn RatingLogger>,
    config: RatingConfig,
    rounding: RoundingMethod,
}

impl<F: FilterMatcher> RatingService<F> {
    /// Create a new rating service
    pub fn new(
        matcher: Arc<F>,
        logger: Arc<dyn RatingLogger>,
        config: RatingConfig,
    ) -> AppResult<Self> {
        let rounding = config.rounding()?;
        Ok(Self {
            matcher,
            logger,
            config,
            rounding,
        })
    }

    /// Rates of `profile` passing their filters, with resolved weights
    fn applicable_rates<'a>(
        &self,
        profile: &'a RateProfile,
        event: &EventContext,
    ) -> AppResult<Vec<(&'a Rate, f64)>> {
        let mut applicable = Vec::with_capacity(profile.rates.len());
        for rate in profile.rates.values() {
            let filters = rate.filter_ids.as_deref().unwrap_or(&[]);
            if !filters.is_empty() && !self.matcher.matches(&profile.tenant, filters, event)? {
                continue;
            }
            let weight =
                resolve_weight(rate.weights.as_ref(), self.matcher.as_ref(), &profile.tenant, event)?;
            applicable.push((rate, weight));
        }
        applicable.sort_by(|a, b| a.0.uid().cmp(b.0.uid()));
        Ok(applicable)
    }

    /// Order the profile's rates over the query window
    #[instrument(skip(self, profile, query), fields(profile = %profile.tenant_id()))]
    pub fn order_rates<'a>(
        &self,
        profile: &'a RateProfile,
        query: &RatingQuery,
    ) -> AppResult<Vec<OrderedRate<'a>>> {
        let rates = self.applicable_rates(profile, &query.event)?;
        let window = query.interval_start.checked_add(query.usage)?;
        order_rates_on_intervals(
            &rates,
            query.start,
            window,
            query.is_duration,
            self.config.verbosity,
            self.logger.as_ref(),
        )
    }

    /// Cost of the query against `profile`
    ///
    /// Orders the applicable rates, computes the charged intervals, sums
    /// their cost and applies the profile's cost correction.
    #[instrument(skip(self, profile, query), fields(profile = %profile.tenant_id()))]
    pub fn rate_profile_cost_for_event(
        &self,
        profile: &RateProfile,
        query: &RatingQuery,
    ) -> AppResult<RateProfileCost> {
        let ordered = self.order_rates(profile, query)?;
        if ordered.is_empty() {
            warn!(
                "No active rate for profile {} at {}",
                profile.tenant_id(),
                query.start
            );
            return Err(AppError::RateNotFound(profile.tenant_id()));
        }
        debug!("Ordered {} rates for profile {}", ordered.len(), profile.id);

        let mut concrete_rates = IntervalRates::new();
        let intervals =
            compute_rate_s_intervals(&ordered, query.interval_start, query.usage, &mut concrete_rates)
                .map_err(|e| {
                    error!("Failed computing intervals for {}: {}", profile.tenant_id(), e);
                    e
                })?;
        let cost = cost_for_intervals(&intervals, &concrete_rates)?;
        let cost_intervals = compress_intervals(intervals)
            .iter()
            .map(RateSInterval::as_rate_s_interval_cost)
            .collect();

        let mut rpc = RateProfileCost {
            id: profile.id.clone(),
            cost,
            min_cost: profile.min_cost,
            max_cost: profile.max_cost,
            max_cost_strategy: profile.max_cost_strategy.clone(),
            cost_intervals: Some(cost_intervals),
            rates: Some(concrete_rates),
            altered: None,
        };
        rpc.correct_cost(self.config.rounding_decimals, self.rounding);

        debug!(
            "Calculated cost: {} for usage {} on profile {}",
            rpc.cost, query.usage, profile.id
        );
        Ok(rpc)
    }
}
