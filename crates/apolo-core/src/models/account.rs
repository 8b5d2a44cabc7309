//! Account model
//!
//! A tenant-scoped account owns named balances. Debiting mutates only the
//! balance Units, which is what the backup/restore pair snapshots.

use super::rate::concatenated_key;
use super::weights::DynamicWeights;
use crate::decimal::Decimal;
use crate::error::AppError;
use crate::AppResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Balance Type of units carrying money
pub const META_CONCRETE: &str = "*concrete";

/// Balance Type of units carrying usage
pub const META_ABSTRACT: &str = "*abstract";

/// Balance Opts key holding the lowest Units value the balance may reach
pub const BALANCE_LIMIT: &str = "*balanceLimit";

/// Balance Opts key lifting the lower limit entirely
pub const BALANCE_UNLIMITED: &str = "*balanceUnlimited";

/// Free-form options map
pub type Opts = HashMap<String, Value>;

/// Snapshot of balance Units keyed on balance ID
pub type AccountBalancesBackup = HashMap<String, Decimal>;

/// Account profile
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "Tenant")]
    pub tenant: String,

    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "FilterIDs", default, skip_serializing_if = "Option::is_none")]
    pub filter_ids: Option<Vec<String>>,

    #[serde(rename = "Weights", default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<DynamicWeights>,

    #[serde(rename = "Opts", default, skip_serializing_if = "Option::is_none")]
    pub opts: Option<Opts>,

    /// Balances keyed on their ID
    #[serde(rename = "Balances", default, skip_serializing_if = "Option::is_none")]
    pub balances: Option<HashMap<String, Balance>>,

    #[serde(rename = "ThresholdIDs", default, skip_serializing_if = "Option::is_none")]
    pub threshold_ids: Option<Vec<String>>,
}

impl Account {
    pub fn tenant_id(&self) -> String {
        concatenated_key(&[&self.tenant, &self.id])
    }

    /// Structural equality; an absent collection never equals an empty one
    pub fn equals(&self, other: &Account) -> bool {
        self == other
    }

    pub fn balance(&self, id: &str) -> Option<&Balance> {
        self.balances.as_ref().and_then(|b| b.get(id))
    }

    pub fn balance_mut(&mut self, id: &str) -> Option<&mut Balance> {
        self.balances.as_mut().and_then(|b| b.get_mut(id))
    }

    /// Snapshot of every balance's Units, None when the account has no balances
    pub fn account_balances_backup(&self) -> Option<AccountBalancesBackup> {
        self.balances.as_ref().map(|balances| {
            balances
                .iter()
                .map(|(id, blnc)| (id.clone(), blnc.units))
                .collect()
        })
    }

    /// Overwrite Units from a snapshot
    ///
    /// Backup entries without a matching balance are ignored.
    pub fn restore_from_backup(&mut self, backup: &AccountBalancesBackup) {
        let Some(balances) = self.balances.as_mut() else {
            return;
        };
        for (id, units) in backup {
            if let Some(blnc) = balances.get_mut(id) {
                blnc.units = *units;
            }
        }
    }

    /// True when the balance key set or any Units value differs from the snapshot
    pub fn balances_altered(&self, backup: &AccountBalancesBackup) -> bool {
        let empty = HashMap::new();
        let balances = self.balances.as_ref().unwrap_or(&empty);
        if balances.len() != backup.len() {
            return true;
        }
        balances.iter().any(|(id, blnc)| match backup.get(id) {
            Some(units) => blnc.units.compare(units) != Ordering::Equal,
            None => true,
        })
    }

    pub fn as_ext_account(&self) -> AppResult<ExtAccount> {
        let balances = match &self.balances {
            Some(balances) => {
                let mut ext = HashMap::with_capacity(balances.len());
                for (id, blnc) in balances {
                    ext.insert(id.clone(), blnc.as_ext_balance()?);
                }
                Some(ext)
            }
            None => None,
        };
        Ok(ExtAccount {
            tenant: self.tenant.clone(),
            id: self.id.clone(),
            filter_ids: self.filter_ids.clone(),
            weights: self.weights.clone(),
            opts: self.opts.clone(),
            balances,
            threshold_ids: self.threshold_ids.clone(),
        })
    }
}

/// Named unit pool of an account
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Balance {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "FilterIDs", default, skip_serializing_if = "Option::is_none")]
    pub filter_ids: Option<Vec<String>>,

    #[serde(rename = "Weights", default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<DynamicWeights>,

    /// `*concrete` or `*abstract`
    #[serde(rename = "Type")]
    pub balance_type: String,

    #[serde(rename = "Units")]
    pub units: Decimal,

    #[serde(rename = "UnitFactors", default, skip_serializing_if = "Option::is_none")]
    pub unit_factors: Option<Vec<UnitFactor>>,

    #[serde(rename = "Opts", default, skip_serializing_if = "Option::is_none")]
    pub opts: Option<Opts>,

    #[serde(rename = "CostIncrements", default, skip_serializing_if = "Option::is_none")]
    pub cost_increments: Option<Vec<CostIncrement>>,

    #[serde(rename = "AttributeIDs", default, skip_serializing_if = "Option::is_none")]
    pub attribute_ids: Option<Vec<String>>,

    #[serde(rename = "RateProfileIDs", default, skip_serializing_if = "Option::is_none")]
    pub rate_profile_ids: Option<Vec<String>>,
}

impl Balance {
    /// Concrete balance pricing voice, data and SMS at zero recurrent fee
    pub fn new_default(id: &str) -> Self {
        let per_tor = |tor: &str, increment: i64| CostIncrement {
            filter_ids: Some(vec![format!("*string:~*req.ToR:{}", tor)]),
            increment: Some(Decimal::from(increment)),
            fixed_fee: None,
            recurrent_fee: Some(Decimal::ZERO),
        };
        Self {
            id: id.to_string(),
            balance_type: META_CONCRETE.to_string(),
            units: Decimal::ZERO,
            cost_increments: Some(vec![
                per_tor("*voice", 1_000_000_000),
                per_tor("*data", 1_048_576),
                per_tor("*sms", 1),
            ]),
            ..Default::default()
        }
    }

    pub fn equals(&self, other: &Balance) -> bool {
        self == other
    }

    pub fn is_concrete(&self) -> bool {
        self.balance_type == META_CONCRETE
    }

    pub fn cost_increments(&self) -> &[CostIncrement] {
        self.cost_increments.as_deref().unwrap_or(&[])
    }

    pub fn unit_factors(&self) -> &[UnitFactor] {
        self.unit_factors.as_deref().unwrap_or(&[])
    }

    /// Lowest Units value allowed, None for unlimited balances
    ///
    /// Reads `*balanceUnlimited` and `*balanceLimit` from Opts. A missing
    /// limit means the balance may go down to zero.
    pub fn balance_limit(&self) -> AppResult<Option<Decimal>> {
        let Some(opts) = &self.opts else {
            return Ok(Some(Decimal::ZERO));
        };
        let unlimited = match opts.get(BALANCE_UNLIMITED) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        };
        if unlimited {
            return Ok(None);
        }
        match opts.get(BALANCE_LIMIT) {
            None | Some(Value::Null) => Ok(Some(Decimal::ZERO)),
            Some(Value::String(s)) => s.parse().map(Some),
            Some(Value::Number(n)) => n.to_string().parse().map(Some),
            Some(other) => Err(AppError::DecimalConversion(other.to_string())),
        }
    }

    pub fn as_ext_balance(&self) -> AppResult<ExtBalance> {
        let units = float_field(self.units, "Units")?;
        let unit_factors = match &self.unit_factors {
            Some(ufs) => Some(
                ufs.iter()
                    .map(UnitFactor::as_ext_unit_factor)
                    .collect::<AppResult<Vec<_>>>()?,
            ),
            None => None,
        };
        let cost_increments = match &self.cost_increments {
            Some(cis) => Some(
                cis.iter()
                    .map(CostIncrement::as_ext_cost_increment)
                    .collect::<AppResult<Vec<_>>>()?,
            ),
            None => None,
        };
        Ok(ExtBalance {
            id: self.id.clone(),
            filter_ids: self.filter_ids.clone(),
            weights: self.weights.clone(),
            balance_type: self.balance_type.clone(),
            units,
            unit_factors,
            opts: self.opts.clone(),
            cost_increments,
            attribute_ids: self.attribute_ids.clone(),
            rate_profile_ids: self.rate_profile_ids.clone(),
        })
    }
}

/// Filter-gated pricing rule of a balance
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CostIncrement {
    #[serde(rename = "FilterIDs", default, skip_serializing_if = "Option::is_none")]
    pub filter_ids: Option<Vec<String>>,

    #[serde(rename = "Increment", default, skip_serializing_if = "Option::is_none")]
    pub increment: Option<Decimal>,

    #[serde(rename = "FixedFee", default, skip_serializing_if = "Option::is_none")]
    pub fixed_fee: Option<Decimal>,

    #[serde(rename = "RecurrentFee", default, skip_serializing_if = "Option::is_none")]
    pub recurrent_fee: Option<Decimal>,
}

impl CostIncrement {
    pub fn as_ext_cost_increment(&self) -> AppResult<ExtCostIncrement> {
        Ok(ExtCostIncrement {
            filter_ids: self.filter_ids.clone(),
            increment: optional_float_field(self.increment, "Increment")?,
            fixed_fee: optional_float_field(self.fixed_fee, "FixedFee")?,
            recurrent_fee: optional_float_field(self.recurrent_fee, "RecurrentFee")?,
        })
    }
}

/// Filter-gated multiplier converting usage into balance units
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UnitFactor {
    #[serde(rename = "FilterIDs", default, skip_serializing_if = "Option::is_none")]
    pub filter_ids: Option<Vec<String>>,

    #[serde(rename = "Factor", default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<Decimal>,
}

impl UnitFactor {
    pub fn as_ext_unit_factor(&self) -> AppResult<ExtUnitFactor> {
        Ok(ExtUnitFactor {
            filter_ids: self.filter_ids.clone(),
            factor: optional_float_field(self.factor, "Factor")?,
        })
    }
}

fn float_field(value: Decimal, field: &str) -> AppResult<f64> {
    value
        .to_f64()
        .map_err(|_| AppError::FloatConversion(field.to_string()))
}

fn optional_float_field(value: Option<Decimal>, field: &str) -> AppResult<Option<f64>> {
    value.map(|v| float_field(v, field)).transpose()
}

// ==================== Weighted lists ====================

/// Account paired with its resolved weight and the lock guarding it
#[derive(Debug, Clone, PartialEq)]
pub struct AccountWithWeight {
    pub account: Account,
    pub weight: f64,
    pub lock_id: String,
}

/// Accounts ordered for processing
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AccountsWithWeight(pub Vec<AccountWithWeight>);

impl AccountsWithWeight {
    /// Highest weight first, equal weights keep their order
    pub fn sort(&mut self) {
        self.0
            .sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(Ordering::Equal));
    }

    pub fn accounts(&self) -> Vec<&Account> {
        self.0.iter().map(|aw| &aw.account).collect()
    }

    pub fn lock_ids(&self) -> Vec<String> {
        self.0.iter().map(|aw| aw.lock_id.clone()).collect()
    }

    /// Account addressed by its `tenant:id` key
    pub fn account_mut(&mut self, tenant_id: &str) -> AppResult<&mut Account> {
        self.0
            .iter_mut()
            .map(|aw| &mut aw.account)
            .find(|acc| acc.tenant_id() == tenant_id)
            .ok_or_else(|| AppError::AccountNotFound(tenant_id.to_string()))
    }
}

/// Balance paired with its resolved weight
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceWithWeight {
    pub balance: Balance,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BalancesWithWeight(pub Vec<BalanceWithWeight>);

impl BalancesWithWeight {
    /// Highest weight first, equal weights ordered on balance ID
    pub fn sort(&mut self) {
        self.0.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.balance.id.cmp(&b.balance.id))
        });
    }

    pub fn balances(&self) -> Vec<&Balance> {
        self.0.iter().map(|bw| &bw.balance).collect()
    }

    pub fn balance_ids(&self) -> Vec<String> {
        self.0.iter().map(|bw| bw.balance.id.clone()).collect()
    }
}

// ==================== External (float) forms ====================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtAccount {
    #[serde(rename = "Tenant")]
    pub tenant: String,
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "FilterIDs", default, skip_serializing_if = "Option::is_none")]
    pub filter_ids: Option<Vec<String>>,
    #[serde(rename = "Weights", default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<DynamicWeights>,
    #[serde(rename = "Opts", default, skip_serializing_if = "Option::is_none")]
    pub opts: Option<Opts>,
    #[serde(rename = "Balances", default, skip_serializing_if = "Option::is_none")]
    pub balances: Option<HashMap<String, ExtBalance>>,
    #[serde(rename = "ThresholdIDs", default, skip_serializing_if = "Option::is_none")]
    pub threshold_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtBalance {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "FilterIDs", default, skip_serializing_if = "Option::is_none")]
    pub filter_ids: Option<Vec<String>>,
    #[serde(rename = "Weights", default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<DynamicWeights>,
    #[serde(rename = "Type")]
    pub balance_type: String,
    #[serde(rename = "Units")]
    pub units: f64,
    #[serde(rename = "UnitFactors", default, skip_serializing_if = "Option::is_none")]
    pub unit_factors: Option<Vec<ExtUnitFactor>>,
    #[serde(rename = "Opts", default, skip_serializing_if = "Option::is_none")]
    pub opts: Option<Opts>,
    #[serde(rename = "CostIncrements", default, skip_serializing_if = "Option::is_none")]
    pub cost_increments: Option<Vec<ExtCostIncrement>>,
    #[serde(rename = "AttributeIDs", default, skip_serializing_if = "Option::is_none")]
    pub attribute_ids: Option<Vec<String>>,
    #[serde(rename = "RateProfileIDs", default, skip_serializing_if = "Option::is_none")]
    pub rate_profile_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtCostIncrement {
    #[serde(rename = "FilterIDs", default, skip_serializing_if = "Option::is_none")]
    pub filter_ids: Option<Vec<String>>,
    #[serde(rename = "Increment", default, skip_serializing_if = "Option::is_none")]
    pub increment: Option<f64>,
    #[serde(rename = "FixedFee", default, skip_serializing_if = "Option::is_none")]
    pub fixed_fee: Option<f64>,
    #[serde(rename = "RecurrentFee", default, skip_serializing_if = "Option::is_none")]
    pub recurrent_fee: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtUnitFactor {
    #[serde(rename = "FilterIDs", default, skip_serializing_if = "Option::is_none")]
    pub filter_ids: Option<Vec<String>>,
    #[serde(rename = "Factor", default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<f64>,
}
