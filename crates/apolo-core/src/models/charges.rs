//! Event charges
//!
//! Result envelope of charging one event: abstract and concrete totals, the
//! ordered charge entries and the maps those entries reference.

use super::account::{Account, ExtAccount, ExtUnitFactor, UnitFactor};
use super::interval::{RateSIncrement, RateSInterval};
use super::rate::IntervalRate;
use crate::decimal::Decimal;
use crate::error::AppError;
use crate::AppResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One entry of the charge sequence, repeated CompressFactor times
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChargeEntry {
    /// Key into the Accounting map
    #[serde(rename = "ChargingID")]
    pub charging_id: String,

    #[serde(rename = "CompressFactor")]
    pub compress_factor: i64,
}

/// Units taken from one balance
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AccountCharge {
    #[serde(rename = "AccountID")]
    pub account_id: String,

    #[serde(rename = "BalanceID")]
    pub balance_id: String,

    #[serde(rename = "Units", default, skip_serializing_if = "Option::is_none")]
    pub units: Option<Decimal>,

    /// Limit the balance was debited against, None when unlimited
    #[serde(rename = "BalanceLimit", default, skip_serializing_if = "Option::is_none")]
    pub balance_limit: Option<Decimal>,

    /// Key into the UnitFactors map, empty when no factor applied
    #[serde(rename = "UnitFactorID", default)]
    pub unit_factor_id: String,

    #[serde(rename = "AttributeIDs", default, skip_serializing_if = "Option::is_none")]
    pub attribute_ids: Option<Vec<String>>,

    /// Key into the Rating map, empty when the balance priced the usage itself
    #[serde(rename = "RatingID", default)]
    pub rating_id: String,

    /// Accounting keys of sibling charges produced for the same event
    #[serde(rename = "JoinedChargeIDs", default, skip_serializing_if = "Option::is_none")]
    pub joined_charge_ids: Option<Vec<String>>,
}

impl AccountCharge {
    pub fn as_ext_account_charge(&self) -> AppResult<ExtAccountCharge> {
        Ok(ExtAccountCharge {
            account_id: self.account_id.clone(),
            balance_id: self.balance_id.clone(),
            units: to_float(self.units, "Units")?,
            balance_limit: to_float(self.balance_limit, "BalanceLimit")?,
            unit_factor_id: self.unit_factor_id.clone(),
            attribute_ids: self.attribute_ids.clone(),
            rating_id: self.rating_id.clone(),
            joined_charge_ids: self.joined_charge_ids.clone(),
        })
    }
}

/// Charges of one event
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventCharges {
    #[serde(rename = "Abstracts", default, skip_serializing_if = "Option::is_none")]
    pub abstracts: Option<Decimal>,

    #[serde(rename = "Concretes", default, skip_serializing_if = "Option::is_none")]
    pub concretes: Option<Decimal>,

    #[serde(rename = "Charges", default, skip_serializing_if = "Option::is_none")]
    pub charges: Option<Vec<ChargeEntry>>,

    #[serde(rename = "Accounting", default)]
    pub accounting: HashMap<String, AccountCharge>,

    #[serde(rename = "UnitFactors", default)]
    pub unit_factors: HashMap<String, UnitFactor>,

    #[serde(rename = "Rating", default)]
    pub rating: HashMap<String, RateSInterval>,

    #[serde(rename = "Rates", default)]
    pub rates: HashMap<String, IntervalRate>,

    /// Accounts touched, keyed on account ID
    #[serde(rename = "Accounts", default)]
    pub accounts: HashMap<String, Account>,
}

impl EventCharges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn charges(&self) -> &[ChargeEntry] {
        self.charges.as_deref().unwrap_or(&[])
    }

    /// Append a charge, compressing into the last entry on equal ChargingID
    pub fn append_charge_entry(&mut self, entry: ChargeEntry) {
        let charges = self.charges.get_or_insert_with(Vec::new);
        match charges.last_mut() {
            Some(last) if last.charging_id == entry.charging_id => {
                last.compress_factor += entry.compress_factor;
            }
            _ => charges.push(entry),
        }
    }

    /// Fold `others` into the receiver
    ///
    /// Totals are summed where an absent total counts as nothing to add.
    /// Maps are merged by key with later values overriding.
    pub fn merge(&mut self, others: &[&EventCharges]) -> AppResult<()> {
        for other in others {
            self.abstracts = Decimal::sum_optional(self.abstracts, other.abstracts)?;
            self.concretes = Decimal::sum_optional(self.concretes, other.concretes)?;
            for entry in other.charges() {
                self.append_charge_entry(entry.clone());
            }
            self.accounting
                .extend(other.accounting.iter().map(|(k, v)| (k.clone(), v.clone())));
            self.unit_factors
                .extend(other.unit_factors.iter().map(|(k, v)| (k.clone(), v.clone())));
            self.rating
                .extend(other.rating.iter().map(|(k, v)| (k.clone(), v.clone())));
            self.rates
                .extend(other.rates.iter().map(|(k, v)| (k.clone(), v.clone())));
            self.accounts
                .extend(other.accounts.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(())
    }

    /// Semantic equality where charge keys may differ between both sides
    ///
    /// Each charge is resolved through its own side's Accounting, UnitFactors
    /// and Rating maps before comparing.
    pub fn equals(&self, other: &EventCharges) -> bool {
        if self.abstracts != other.abstracts
            || self.concretes != other.concretes
            || self.charges.is_some() != other.charges.is_some()
            || self.accounts != other.accounts
        {
            return false;
        }
        let (a, b) = (self.charges(), other.charges());
        a.len() == b.len()
            && a.iter().zip(b).all(|(x, y)| {
                x.compress_factor == y.compress_factor
                    && match (
                        self.accounting.get(&x.charging_id),
                        other.accounting.get(&y.charging_id),
                    ) {
                        (Some(ac_x), Some(ac_y)) => self.account_charges_equal(ac_x, other, ac_y),
                        (None, None) => true,
                        _ => false,
                    }
            })
    }

    fn account_charges_equal(
        &self,
        ac: &AccountCharge,
        other: &EventCharges,
        other_ac: &AccountCharge,
    ) -> bool {
        if ac.account_id != other_ac.account_id
            || ac.balance_id != other_ac.balance_id
            || ac.units != other_ac.units
            || ac.balance_limit != other_ac.balance_limit
            || ac.attribute_ids != other_ac.attribute_ids
            || ac.joined_charge_ids.as_ref().map(Vec::len)
                != other_ac.joined_charge_ids.as_ref().map(Vec::len)
        {
            return false;
        }
        if self.unit_factors.get(&ac.unit_factor_id)
            != other.unit_factors.get(&other_ac.unit_factor_id)
        {
            return false;
        }
        match (
            self.rating.get(&ac.rating_id),
            other.rating.get(&other_ac.rating_id),
        ) {
            (Some(x), Some(y)) => x.equals(y, Some(&self.rates), Some(&other.rates)),
            (None, None) => true,
            _ => false,
        }
    }

    /// Float form for API callers
    ///
    /// Fails with a conversion error instead of truncating a value.
    pub fn as_ext_event_charges(&self) -> AppResult<ExtEventCharges> {
        let mut ext = ExtEventCharges {
            abstracts: to_float(self.abstracts, "Abstracts")?,
            concretes: to_float(self.concretes, "Concretes")?,
            charges: self.charges.clone(),
            ..Default::default()
        };
        for (id, ac) in &self.accounting {
            ext.accounting.insert(id.clone(), ac.as_ext_account_charge()?);
        }
        for (id, uf) in &self.unit_factors {
            ext.unit_factors.insert(id.clone(), uf.as_ext_unit_factor()?);
        }
        for (id, interval) in &self.rating {
            ext.rating.insert(id.clone(), ext_rate_s_interval(interval)?);
        }
        for (id, ir) in &self.rates {
            ext.rates.insert(id.clone(), ext_interval_rate(ir)?);
        }
        for (id, acnt) in &self.accounts {
            ext.accounts.insert(id.clone(), acnt.as_ext_account()?);
        }
        Ok(ext)
    }
}

fn to_float(value: Option<Decimal>, field: &str) -> AppResult<Option<f64>> {
    value
        .map(|v| v.to_f64().map_err(|_| AppError::FloatConversion(field.to_string())))
        .transpose()
}

fn ext_rate_s_interval(interval: &RateSInterval) -> AppResult<ExtRateSInterval> {
    let increments = match &interval.increments {
        Some(incrs) => Some(
            incrs
                .iter()
                .map(ext_rate_s_increment)
                .collect::<AppResult<Vec<_>>>()?,
        ),
        None => None,
    };
    Ok(ExtRateSInterval {
        interval_start: to_float(interval.interval_start, "IntervalStart")?,
        increments,
        compress_factor: interval.compress_factor,
    })
}

fn ext_rate_s_increment(incr: &RateSIncrement) -> AppResult<ExtRateSIncrement> {
    Ok(ExtRateSIncrement {
        increment_start: to_float(incr.increment_start, "IncrementStart")?,
        rate_interval_index: incr.rate_interval_index,
        rate_id: incr.rate_id.clone(),
        compress_factor: incr.compress_factor,
        usage: to_float(incr.usage, "Usage")?,
    })
}

fn ext_interval_rate(ir: &IntervalRate) -> AppResult<ExtIntervalRate> {
    Ok(ExtIntervalRate {
        interval_start: to_float(ir.interval_start, "IntervalStart")?,
        fixed_fee: to_float(ir.fixed_fee, "FixedFee")?,
        recurrent_fee: to_float(ir.recurrent_fee, "RecurrentFee")?,
        unit: to_float(ir.unit, "Unit")?,
        increment: to_float(ir.increment, "Increment")?,
    })
}

// ==================== External (float) forms ====================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtEventCharges {
    #[serde(rename = "Abstracts", default, skip_serializing_if = "Option::is_none")]
    pub abstracts: Option<f64>,
    #[serde(rename = "Concretes", default, skip_serializing_if = "Option::is_none")]
    pub concretes: Option<f64>,
    #[serde(rename = "Charges", default, skip_serializing_if = "Option::is_none")]
    pub charges: Option<Vec<ChargeEntry>>,
    #[serde(rename = "Accounting", default)]
    pub accounting: HashMap<String, ExtAccountCharge>,
    #[serde(rename = "UnitFactors", default)]
    pub unit_factors: HashMap<String, ExtUnitFactor>,
    #[serde(rename = "Rating", default)]
    pub rating: HashMap<String, ExtRateSInterval>,
    #[serde(rename = "Rates", default)]
    pub rates: HashMap<String, ExtIntervalRate>,
    #[serde(rename = "Accounts", default)]
    pub accounts: HashMap<String, ExtAccount>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtAccountCharge {
    #[serde(rename = "AccountID")]
    pub account_id: String,
    #[serde(rename = "BalanceID")]
    pub balance_id: String,
    #[serde(rename = "Units", default, skip_serializing_if = "Option::is_none")]
    pub units: Option<f64>,
    #[serde(rename = "BalanceLimit", default, skip_serializing_if = "Option::is_none")]
    pub balance_limit: Option<f64>,
    #[serde(rename = "UnitFactorID", default)]
    pub unit_factor_id: String,
    #[serde(rename = "AttributeIDs", default, skip_serializing_if = "Option::is_none")]
    pub attribute_ids: Option<Vec<String>>,
    #[serde(rename = "RatingID", default)]
    pub rating_id: String,
    #[serde(rename = "JoinedChargeIDs", default, skip_serializing_if = "Option::is_none")]
    pub joined_charge_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtRateSInterval {
    #[serde(rename = "IntervalStart", default, skip_serializing_if = "Option::is_none")]
    pub interval_start: Option<f64>,
    #[serde(rename = "Increments", default, skip_serializing_if = "Option::is_none")]
    pub increments: Option<Vec<ExtRateSIncrement>>,
    #[serde(rename = "CompressFactor")]
    pub compress_factor: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtRateSIncrement {
    #[serde(rename = "IncrementStart", default, skip_serializing_if = "Option::is_none")]
    pub increment_start: Option<f64>,
    #[serde(rename = "RateIntervalIndex")]
    pub rate_interval_index: usize,
    #[serde(rename = "RateID")]
    pub rate_id: String,
    #[serde(rename = "CompressFactor")]
    pub compress_factor: i64,
    #[serde(rename = "Usage", default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtIntervalRate {
    #[serde(rename = "IntervalStart", default, skip_serializing_if = "Option::is_none")]
    pub interval_start: Option<f64>,
    #[serde(rename = "FixedFee", default, skip_serializing_if = "Option::is_none")]
    pub fixed_fee: Option<f64>,
    #[serde(rename = "RecurrentFee", default, skip_serializing_if = "Option::is_none")]
    pub recurrent_fee: Option<f64>,
    #[serde(rename = "Unit", default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<f64>,
    #[serde(rename = "Increment", default, skip_serializing_if = "Option::is_none")]
    pub increment: Option<f64>,
}
