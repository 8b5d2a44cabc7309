//! API-facing forms
//!
//! Callers send weights as strings and amounts as floats or duration
//! strings. These forms convert into the exact internal models.

use super::account::{Account, Balance, CostIncrement, Opts, UnitFactor};
use super::rate::{IntervalRate, Rate, RateProfile};
use super::weights::{DynamicWeights, FILTERS_SEP, WEIGHTS_SEP};
use crate::decimal::Decimal;
use crate::AppResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Amount given either as a number or as a string
///
/// Strings may carry a duration suffix (`1m30s`), which converts to
/// nanoseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Number(f64),
    Text(String),
}

impl Amount {
    pub fn to_decimal(&self) -> AppResult<Decimal> {
        match self {
            Amount::Number(v) => Decimal::from_f64(*v),
            Amount::Text(s) => Decimal::from_usage(s),
        }
    }
}

fn optional_amount(value: &Option<Amount>) -> AppResult<Option<Decimal>> {
    value.as_ref().map(Amount::to_decimal).transpose()
}

fn optional_float(value: Option<f64>) -> AppResult<Option<Decimal>> {
    value.map(Decimal::from_f64).transpose()
}

/// Empty weight strings stay absent
fn parse_weights(weights: &str) -> AppResult<Option<DynamicWeights>> {
    if weights.is_empty() {
        return Ok(None);
    }
    DynamicWeights::from_string(weights, WEIGHTS_SEP, FILTERS_SEP).map(Some)
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct APIRateProfile {
    #[serde(rename = "Tenant")]
    pub tenant: String,
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "FilterIDs", default, skip_serializing_if = "Option::is_none")]
    pub filter_ids: Option<Vec<String>>,
    #[serde(rename = "Weights", default)]
    pub weights: String,
    #[serde(rename = "MinCost", default, skip_serializing_if = "Option::is_none")]
    pub min_cost: Option<f64>,
    #[serde(rename = "MaxCost", default, skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
    #[serde(rename = "MaxCostStrategy", default)]
    pub max_cost_strategy: String,
    #[serde(rename = "Rates", default)]
    pub rates: HashMap<String, APIRate>,
}

impl APIRateProfile {
    /// Convert and compile, ready for rating
    pub fn as_rate_profile(&self) -> AppResult<RateProfile> {
        let mut rates = HashMap::with_capacity(self.rates.len());
        for (key, rate) in &self.rates {
            rates.insert(key.clone(), rate.as_rate()?);
        }
        let mut rp = RateProfile {
            tenant: self.tenant.clone(),
            id: self.id.clone(),
            filter_ids: self.filter_ids.clone(),
            weights: parse_weights(&self.weights)?,
            min_cost: optional_float(self.min_cost)?,
            max_cost: optional_float(self.max_cost)?,
            max_cost_strategy: self.max_cost_strategy.clone(),
            rates,
        };
        rp.sort();
        rp.compile()?;
        Ok(rp)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct APIRate {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "FilterIDs", default, skip_serializing_if = "Option::is_none")]
    pub filter_ids: Option<Vec<String>>,
    #[serde(rename = "ActivationTimes", default)]
    pub activation_times: String,
    #[serde(rename = "Weights", default)]
    pub weights: String,
    #[serde(rename = "Blocker", default)]
    pub blocker: bool,
    #[serde(rename = "IntervalRates", default, skip_serializing_if = "Option::is_none")]
    pub interval_rates: Option<Vec<APIIntervalRate>>,
}

impl APIRate {
    pub fn as_rate(&self) -> AppResult<Rate> {
        let interval_rates = match &self.interval_rates {
            Some(irs) => Some(
                irs.iter()
                    .map(APIIntervalRate::as_interval_rate)
                    .collect::<AppResult<Vec<_>>>()?,
            ),
            None => None,
        };
        let mut rate = Rate::new(&self.id, &self.activation_times);
        rate.filter_ids = self.filter_ids.clone();
        rate.weights = parse_weights(&self.weights)?;
        rate.blocker = self.blocker;
        rate.interval_rates = interval_rates;
        Ok(rate)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct APIIntervalRate {
    #[serde(rename = "IntervalStart", default, skip_serializing_if = "Option::is_none")]
    pub interval_start: Option<Amount>,
    #[serde(rename = "FixedFee", default, skip_serializing_if = "Option::is_none")]
    pub fixed_fee: Option<f64>,
    #[serde(rename = "RecurrentFee", default, skip_serializing_if = "Option::is_none")]
    pub recurrent_fee: Option<f64>,
    #[serde(rename = "Unit", default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<Amount>,
    #[serde(rename = "Increment", default, skip_serializing_if = "Option::is_none")]
    pub increment: Option<Amount>,
}

impl APIIntervalRate {
    pub fn as_interval_rate(&self) -> AppResult<IntervalRate> {
        Ok(IntervalRate {
            interval_start: optional_amount(&self.interval_start)?,
            fixed_fee: optional_float(self.fixed_fee)?,
            recurrent_fee: optional_float(self.recurrent_fee)?,
            unit: optional_amount(&self.unit)?,
            increment: optional_amount(&self.increment)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct APIAccount {
    #[serde(rename = "Tenant")]
    pub tenant: String,
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "FilterIDs", default, skip_serializing_if = "Option::is_none")]
    pub filter_ids: Option<Vec<String>>,
    #[serde(rename = "Weights", default)]
    pub weights: String,
    #[serde(rename = "Opts", default, skip_serializing_if = "Option::is_none")]
    pub opts: Option<Opts>,
    #[serde(rename = "Balances", default, skip_serializing_if = "Option::is_none")]
    pub balances: Option<HashMap<String, APIBalance>>,
    #[serde(rename = "ThresholdIDs", default, skip_serializing_if = "Option::is_none")]
    pub threshold_ids: Option<Vec<String>>,
}

impl APIAccount {
    pub fn as_account(&self) -> AppResult<Account> {
        let balances = match &self.balances {
            Some(balances) => {
                let mut converted = HashMap::with_capacity(balances.len());
                for (id, blnc) in balances {
                    converted.insert(id.clone(), blnc.as_balance()?);
                }
                Some(converted)
            }
            None => None,
        };
        Ok(Account {
            tenant: self.tenant.clone(),
            id: self.id.clone(),
            filter_ids: self.filter_ids.clone(),
            weights: parse_weights(&self.weights)?,
            opts: self.opts.clone(),
            balances,
            threshold_ids: self.threshold_ids.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct APIBalance {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "FilterIDs", default, skip_serializing_if = "Option::is_none")]
    pub filter_ids: Option<Vec<String>>,
    #[serde(rename = "Weights", default)]
    pub weights: String,
    #[serde(rename = "Type")]
    pub balance_type: String,
    #[serde(rename = "Units")]
    pub units: Amount,
    #[serde(rename = "UnitFactors", default, skip_serializing_if = "Option::is_none")]
    pub unit_factors: Option<Vec<APIUnitFactor>>,
    #[serde(rename = "Opts", default, skip_serializing_if = "Option::is_none")]
    pub opts: Option<Opts>,
    #[serde(rename = "CostIncrements", default, skip_serializing_if = "Option::is_none")]
    pub cost_increments: Option<Vec<APICostIncrement>>,
    #[serde(rename = "AttributeIDs", default, skip_serializing_if = "Option::is_none")]
    pub attribute_ids: Option<Vec<String>>,
    #[serde(rename = "RateProfileIDs", default, skip_serializing_if = "Option::is_none")]
    pub rate_profile_ids: Option<Vec<String>>,
}

impl Default for Amount {
    fn default() -> Self {
        Amount::Number(0.0)
    }
}

impl APIBalance {
    pub fn as_balance(&self) -> AppResult<Balance> {
        let unit_factors = match &self.unit_factors {
            Some(ufs) => Some(
                ufs.iter()
                    .map(APIUnitFactor::as_unit_factor)
                    .collect::<AppResult<Vec<_>>>()?,
            ),
            None => None,
        };
        let cost_increments = match &self.cost_increments {
            Some(cis) => Some(
                cis.iter()
                    .map(APICostIncrement::as_cost_increment)
                    .collect::<AppResult<Vec<_>>>()?,
            ),
            None => None,
        };
        Ok(Balance {
            id: self.id.clone(),
            filter_ids: self.filter_ids.clone(),
            weights: parse_weights(&self.weights)?,
            balance_type: self.balance_type.clone(),
            units: self.units.to_decimal()?,
            unit_factors,
            opts: self.opts.clone(),
            cost_increments,
            attribute_ids: self.attribute_ids.clone(),
            rate_profile_ids: self.rate_profile_ids.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct APICostIncrement {
    #[serde(rename = "FilterIDs", default, skip_serializing_if = "Option::is_none")]
    pub filter_ids: Option<Vec<String>>,
    #[serde(rename = "Increment", default, skip_serializing_if = "Option::is_none")]
    pub increment: Option<Amount>,
    #[serde(rename = "FixedFee", default, skip_serializing_if = "Option::is_none")]
    pub fixed_fee: Option<f64>,
    #[serde(rename = "RecurrentFee", default, skip_serializing_if = "Option::is_none")]
    pub recurrent_fee: Option<f64>,
}

impl APICostIncrement {
    pub fn as_cost_increment(&self) -> AppResult<CostIncrement> {
        Ok(CostIncrement {
            filter_ids: self.filter_ids.clone(),
            increment: optional_amount(&self.increment)?,
            fixed_fee: optional_float(self.fixed_fee)?,
            recurrent_fee: optional_float(self.recurrent_fee)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct APIUnitFactor {
    #[serde(rename = "FilterIDs", default, skip_serializing_if = "Option::is_none")]
    pub filter_ids: Option<Vec<String>>,
    #[serde(rename = "Factor")]
    pub factor: f64,
}

impl APIUnitFactor {
    pub fn as_unit_factor(&self) -> AppResult<UnitFactor> {
        Ok(UnitFactor {
            filter_ids: self.filter_ids.clone(),
            factor: Some(Decimal::from_f64(self.factor)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use rust_decimal_macros::dec;

    #[test]
    fn test_api_rate_profile_conversion() {
        let json = r#"{
            "Tenant": "cgrates.org",
            "ID": "RP1",
            "Weights": ";10",
            "MinCost": 0.1,
            "Rates": {
                "RT_ALWAYS": {
                    "ID": "RT_ALWAYS",
                    "Weights": ";0",
                    "IntervalRates": [
                        {"IntervalStart": "1m", "RecurrentFee": 0.06, "Unit": "1m", "Increment": "1s"},
                        {"IntervalStart": "0s", "FixedFee": 0.4, "RecurrentFee": 0.12, "Unit": "1m", "Increment": "1m"}
                    ]
                }
            }
        }"#;
        let api: APIRateProfile = serde_json::from_str(json).unwrap();
        let rp = api.as_rate_profile().unwrap();
        assert_eq!(rp.tenant_id(), "cgrates.org:RP1");
        assert_eq!(rp.min_cost, Some(Decimal::from(dec!(0.1))));
        assert_eq!(rp.max_cost, None);

        let rate = &rp.rates["RT_ALWAYS"];
        assert!(rate.is_compiled());
        assert_eq!(rate.uid(), "cgrates.org:RP1:RT_ALWAYS");
        let irs = rate.interval_rates();
        assert_eq!(irs[0].interval_start, Some(Decimal::ZERO));
        assert_eq!(irs[0].fixed_fee, Some(Decimal::from(dec!(0.4))));
        assert_eq!(irs[1].interval_start, Some(Decimal::from(60_000_000_000)));
        assert_eq!(irs[1].increment, Some(Decimal::from(1_000_000_000)));
    }

    #[test]
    fn test_api_rate_bad_weights() {
        let api = APIRate {
            id: "RT1".to_string(),
            weights: "fltr;ten".to_string(),
            ..Default::default()
        };
        assert!(matches!(api.as_rate(), Err(AppError::InvalidWeight { .. })));
    }

    #[test]
    fn test_api_rate_profile_bad_activation_times() {
        let mut api = APIRateProfile {
            tenant: "cgrates.org".to_string(),
            id: "RP1".to_string(),
            ..Default::default()
        };
        api.rates.insert(
            "RT1".to_string(),
            APIRate {
                id: "RT1".to_string(),
                activation_times: "* * * *".to_string(),
                ..Default::default()
            },
        );
        assert!(matches!(
            api.as_rate_profile(),
            Err(AppError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_api_account_conversion() {
        let json = r#"{
            "Tenant": "cgrates.org",
            "ID": "1001",
            "Weights": ";20",
            "Balances": {
                "VOICE": {
                    "ID": "VOICE",
                    "Type": "*abstract",
                    "Units": "1h",
                    "CostIncrements": [{"Increment": "1s", "RecurrentFee": 0}]
                },
                "MONETARY": {
                    "ID": "MONETARY",
                    "Type": "*concrete",
                    "Units": 10.5,
                    "UnitFactors": [{"FilterIDs": ["*string:~*req.ToR:*data"], "Factor": 0.5}]
                }
            }
        }"#;
        let api: APIAccount = serde_json::from_str(json).unwrap();
        let acc = api.as_account().unwrap();
        assert_eq!(acc.weights.as_ref().unwrap()[0].weight, 20.0);
        let voice = acc.balance("VOICE").unwrap();
        assert_eq!(voice.units, Decimal::from(3_600_000_000_000));
        assert_eq!(voice.cost_increments()[0].recurrent_fee, Some(Decimal::ZERO));
        let monetary = acc.balance("MONETARY").unwrap();
        assert_eq!(monetary.units, Decimal::from(dec!(10.5)));
        assert_eq!(monetary.unit_factors()[0].factor, Some(Decimal::from(dec!(0.5))));
        assert_eq!(monetary.weights, None);
    }

    #[test]
    fn test_amount_bad_text() {
        assert_eq!(
            Amount::Text("ten".to_string()).to_decimal().unwrap_err(),
            AppError::DecimalConversion("ten".to_string())
        );
    }
}
