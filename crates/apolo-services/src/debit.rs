//! Debit service
//!
//! Applies charges against account balances:
//! - Select the single CostIncrement and the optional UnitFactor of a balance
//! - Debit one balance within its limit
//! - Debit a set of charges all-or-nothing
//! - Spread a usage over the account's balances by weight
//! - Debit one account picked out of a locked batch
//!
//! Callers hold the account lock for the whole call. Every multi-balance
//! operation takes a backup first and restores it on failure.

use apolo_core::{
    config::AccountsConfig,
    models::{
        account::{
            Account, AccountBalancesBackup, AccountsWithWeight, Balance, BalanceWithWeight,
            BalancesWithWeight, CostIncrement, UnitFactor,
        },
        charges::{AccountCharge, ChargeEntry, EventCharges},
        weights::resolve_weight,
    },
    traits::{EventContext, FilterMatcher},
    AppError, AppResult, Decimal,
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::constants::DEFAULT_UNIT_FACTOR;

/// Usage to take from one named balance
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    pub balance_id: String,
    pub usage: Decimal,
}

impl ChargeRequest {
    pub fn new(balance_id: &str, usage: Decimal) -> Self {
        Self {
            balance_id: balance_id.to_string(),
            usage,
        }
    }
}

/// Outcome of debiting one balance
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceDebit {
    pub charge: AccountCharge,
    pub unit_factor: Option<UnitFactor>,
    /// Usage covered, rounded up to whole increments
    pub usage: Decimal,
    /// Units were taken from a `*concrete` balance
    pub concrete: bool,
}

/// Pricing of one balance for one event
struct BalancePricing {
    increment: Option<Decimal>,
    fixed_fee: Decimal,
    recurrent_fee: Decimal,
    factor: Decimal,
    unit_factor: Option<UnitFactor>,
    concrete: bool,
}

impl BalancePricing {
    fn increments_for(&self, usage: Decimal) -> AppResult<Decimal> {
        match self.increment {
            Some(inc) => Ok(usage.checked_div(inc)?.ceil()),
            None => Ok(Decimal::ONE),
        }
    }

    /// Usage rounded up to whole increments
    fn rounded_usage(&self, usage: Decimal) -> AppResult<Decimal> {
        match self.increment {
            Some(inc) => self.increments_for(usage)?.checked_mul(inc),
            None => Ok(usage),
        }
    }

    /// Balance units consumed by `usage`
    fn units_for(&self, usage: Decimal) -> AppResult<Decimal> {
        let raw = if self.concrete {
            let count = self.increments_for(usage)?;
            self.fixed_fee
                .checked_add(self.recurrent_fee.checked_mul(count)?)?
        } else {
            self.rounded_usage(usage)?
        };
        raw.checked_mul(self.factor)
    }

    /// Largest whole number of increments whose units fit `available`
    fn affordable_increments(&self, available: Decimal, wanted: Decimal) -> AppResult<Decimal> {
        if available.is_negative() || available.is_zero() {
            return Ok(Decimal::ZERO);
        }
        let per_increment = if self.concrete {
            self.recurrent_fee.checked_mul(self.factor)?
        } else {
            self.increment
                .unwrap_or(Decimal::ZERO)
                .checked_mul(self.factor)?
        };
        let budget = if self.concrete {
            available.checked_sub(self.fixed_fee.checked_mul(self.factor)?)?
        } else {
            available
        };
        if budget.is_negative() {
            return Ok(Decimal::ZERO);
        }
        if per_increment.is_zero() {
            return Ok(wanted);
        }
        let affordable = Decimal::from(budget.checked_div(per_increment)?.to_i64()?);
        Ok(affordable.min(wanted))
    }

    /// Part of `remaining` the balance can pay for out of `available` units
    ///
    /// Without an Increment a concrete balance charges the whole usage or
    /// nothing, while an abstract one covers as much usage as its units hold.
    fn coverable_usage(&self, available: Decimal, remaining: Decimal) -> AppResult<Decimal> {
        if available.is_negative() || available.is_zero() {
            return Ok(Decimal::ZERO);
        }
        match self.increment {
            Some(inc) => {
                let wanted = self.increments_for(remaining)?;
                let affordable = self.affordable_increments(available, wanted)?;
                if affordable < wanted {
                    affordable.checked_mul(inc)
                } else {
                    Ok(remaining)
                }
            }
            None if self.concrete => {
                if self.units_for(remaining)? <= available {
                    Ok(remaining)
                } else {
                    Ok(Decimal::ZERO)
                }
            }
            None => {
                if self.factor.is_zero() {
                    return Ok(remaining);
                }
                Ok(remaining.min(available.checked_div(self.factor)?))
            }
        }
    }
}

/// Debit service
pub struct DebitService<F: FilterMatcher> {
    matcher: Arc<F>,
    config: AccountsConfig,
}

impl<F: FilterMatcher> DebitService<F> {
    /// Create a new debit service
    pub fn new(matcher: Arc<F>, config: AccountsConfig) -> Self {
        Self { matcher, config }
    }

    fn passes(&self, tenant: &str, filter_ids: Option<&[String]>, event: &EventContext) -> AppResult<bool> {
        match filter_ids {
            None | Some([]) => Ok(true),
            Some(ids) => self.matcher.matches(tenant, ids, event),
        }
    }

    /// The one CostIncrement of `balance` matching the event
    ///
    /// Zero or several matches are errors, never a silent pick.
    pub fn select_cost_increment<'b>(
        &self,
        balance: &'b Balance,
        tenant: &str,
        event: &EventContext,
    ) -> AppResult<&'b CostIncrement> {
        let mut matched = Vec::new();
        for ci in balance.cost_increments() {
            if self.passes(tenant, ci.filter_ids.as_deref(), event)? {
                matched.push(ci);
            }
        }
        match matched.as_slice() {
            [ci] => Ok(ci),
            [] => Err(AppError::NoCostIncrement(balance.id.clone())),
            _ => Err(AppError::AmbiguousCostIncrement {
                balance: balance.id.clone(),
                matched: matched.len(),
            }),
        }
    }

    /// The UnitFactor of `balance` matching the event, if any
    pub fn select_unit_factor<'b>(
        &self,
        balance: &'b Balance,
        tenant: &str,
        event: &EventContext,
    ) -> AppResult<Option<&'b UnitFactor>> {
        let mut matched = Vec::new();
        for uf in balance.unit_factors() {
            if self.passes(tenant, uf.filter_ids.as_deref(), event)? {
                matched.push(uf);
            }
        }
        match matched.as_slice() {
            [] => Ok(None),
            [uf] => Ok(Some(uf)),
            _ => Err(AppError::AmbiguousUnitFactor {
                balance: balance.id.clone(),
                matched: matched.len(),
            }),
        }
    }

    fn pricing(&self, balance: &Balance, tenant: &str, event: &EventContext) -> AppResult<BalancePricing> {
        let ci = self.select_cost_increment(balance, tenant, event)?;
        let unit_factor = self.select_unit_factor(balance, tenant, event)?.cloned();
        let factor = unit_factor
            .as_ref()
            .and_then(|uf| uf.factor)
            .unwrap_or(Decimal::from(DEFAULT_UNIT_FACTOR));
        Ok(BalancePricing {
            increment: ci.increment.filter(|inc| !inc.is_zero()),
            fixed_fee: ci.fixed_fee.unwrap_or(Decimal::ZERO),
            recurrent_fee: ci.recurrent_fee.unwrap_or(Decimal::ZERO),
            factor,
            unit_factor,
            concrete: balance.is_concrete(),
        })
    }

    /// Debit one balance of `account`
    ///
    /// Abstract balances lose the usage rounded up to whole increments.
    /// Concrete balances lose the FixedFee plus one RecurrentFee per
    /// increment. Both are scaled by the matching UnitFactor. The balance is
    /// left untouched when the result would cross its limit.
    #[instrument(skip(self, account, event), fields(account = %account.tenant_id()))]
    pub fn debit_balance(
        &self,
        account: &mut Account,
        request: &ChargeRequest,
        event: &EventContext,
    ) -> AppResult<BalanceDebit> {
        let tenant = account.tenant.clone();
        let account_id = account.id.clone();
        let balance = account
            .balance_mut(&request.balance_id)
            .ok_or_else(|| AppError::BalanceNotFound {
                account: account_id.clone(),
                balance: request.balance_id.clone(),
            })?;

        let pricing = self.pricing(balance, &tenant, event)?;
        let usage = pricing.rounded_usage(request.usage)?;
        let units = pricing.units_for(request.usage)?;
        let limit = balance.balance_limit()?;

        if let Some(limit) = limit {
            let available = balance.units.checked_sub(limit)?;
            if units > available {
                warn!(
                    "Insufficient balance for account {}: required {}, available {}",
                    account_id, units, available
                );
                return Err(AppError::InsufficientBalance {
                    required: units.to_string(),
                    available: available.to_string(),
                });
            }
        }

        balance.units = balance.units.checked_sub(units)?;
        debug!(
            "Debited {} units from balance {} of account {}, left {}",
            units, balance.id, account_id, balance.units
        );

        let unit_factor_id = if pricing.unit_factor.is_some() {
            Uuid::new_v4().to_string()
        } else {
            String::new()
        };
        Ok(BalanceDebit {
            charge: AccountCharge {
                account_id,
                balance_id: balance.id.clone(),
                units: Some(units),
                balance_limit: limit,
                unit_factor_id,
                attribute_ids: balance.attribute_ids.clone(),
                rating_id: String::new(),
                joined_charge_ids: None,
            },
            unit_factor: pricing.unit_factor,
            usage,
            concrete: pricing.concrete,
        })
    }

    /// Apply every request or none
    #[instrument(skip(self, account, requests, event), fields(account = %account.tenant_id()))]
    pub fn debit_charges(
        &self,
        account: &mut Account,
        requests: &[ChargeRequest],
        event: &EventContext,
    ) -> AppResult<EventCharges> {
        let backup = account.account_balances_backup().unwrap_or_default();
        let mut debits = Vec::with_capacity(requests.len());
        for request in requests {
            match self.debit_balance(account, request, event) {
                Ok(debit) => debits.push(debit),
                Err(e) => {
                    error!(
                        "Charge on balance {} of account {} failed, restoring: {}",
                        request.balance_id,
                        account.tenant_id(),
                        e
                    );
                    self.restore(account, &backup);
                    return Err(e);
                }
            }
        }
        info!(
            "Applied {} charges on account {}",
            debits.len(),
            account.tenant_id()
        );
        self.event_charges(account, debits)
    }

    /// Cover `usage` from the account's balances, highest weight first
    ///
    /// Each balance gives as many whole increments as its limit allows.
    /// Balances without a matching CostIncrement are passed over. Fails and
    /// restores the account when the balances cannot cover the usage.
    #[instrument(skip(self, account, event), fields(account = %account.tenant_id()))]
    pub fn debit_usage(
        &self,
        account: &mut Account,
        usage: Decimal,
        event: &EventContext,
    ) -> AppResult<EventCharges> {
        let ordered = self.ordered_balances(account, event)?;
        let backup = account.account_balances_backup().unwrap_or_default();
        let tenant = account.tenant.clone();

        let mut remaining = usage;
        let mut debits = Vec::new();
        for balance_id in ordered.balance_ids().into_iter().take(self.config.max_iterations) {
            if remaining.is_zero() || remaining.is_negative() {
                break;
            }
            match self.cover_from_balance(account, &tenant, &balance_id, remaining, event) {
                Ok(Some(debit)) => {
                    remaining = remaining.checked_sub(debit.usage)?.max(Decimal::ZERO);
                    debits.push(debit);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        "Debit of balance {} on account {} failed, restoring: {}",
                        balance_id,
                        account.tenant_id(),
                        e
                    );
                    self.restore(account, &backup);
                    return Err(e);
                }
            }
        }

        if remaining > Decimal::ZERO {
            let covered = usage.checked_sub(remaining)?;
            warn!(
                "Insufficient balance for account {}: required {}, available {}",
                account.tenant_id(),
                usage,
                covered
            );
            self.restore(account, &backup);
            return Err(AppError::InsufficientBalance {
                required: usage.to_string(),
                available: covered.to_string(),
            });
        }
        self.event_charges(account, debits)
    }

    /// Cover `usage` from one account of a locked batch
    pub fn debit_batch_account(
        &self,
        accounts: &mut AccountsWithWeight,
        tenant_id: &str,
        usage: Decimal,
        event: &EventContext,
    ) -> AppResult<EventCharges> {
        let account = accounts.account_mut(tenant_id).map_err(|e| {
            warn!("Account {} is not part of the locked batch", tenant_id);
            e
        })?;
        self.debit_usage(account, usage, event)
    }

    /// Balances passing their filters, ordered by weight then ID
    fn ordered_balances(&self, account: &Account, event: &EventContext) -> AppResult<BalancesWithWeight> {
        let mut weighted = BalancesWithWeight::default();
        for balance in account.balances.iter().flat_map(|b| b.values()) {
            if !self.passes(&account.tenant, balance.filter_ids.as_deref(), event)? {
                continue;
            }
            let weight = resolve_weight(
                balance.weights.as_ref(),
                self.matcher.as_ref(),
                &account.tenant,
                event,
            )?;
            weighted.0.push(BalanceWithWeight {
                balance: balance.clone(),
                weight,
            });
        }
        weighted.sort();
        Ok(weighted)
    }

    fn cover_from_balance(
        &self,
        account: &mut Account,
        tenant: &str,
        balance_id: &str,
        remaining: Decimal,
        event: &EventContext,
    ) -> AppResult<Option<BalanceDebit>> {
        let Some(balance) = account.balance(balance_id) else {
            return Ok(None);
        };
        let pricing = match self.pricing(balance, tenant, event) {
            Ok(pricing) => pricing,
            Err(AppError::NoCostIncrement(_)) => {
                debug!("Balance {} does not price this usage", balance_id);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let usage = match balance.balance_limit()? {
            None => remaining,
            Some(limit) => {
                let available = balance.units.checked_sub(limit)?;
                pricing.coverable_usage(available, remaining)?
            }
        };
        if usage.is_zero() {
            return Ok(None);
        }
        let request = ChargeRequest::new(balance_id, usage);
        self.debit_balance(account, &request, event).map(Some)
    }

    fn restore(&self, account: &mut Account, backup: &AccountBalancesBackup) {
        account.restore_from_backup(backup);
        if account.balances_altered(backup) {
            error!(
                "Balances of account {} differ from their backup after restore",
                account.tenant_id()
            );
        }
    }

    /// Envelope for a set of debits of one event
    ///
    /// The first charge references the others through JoinedChargeIDs.
    fn event_charges(&self, account: &Account, debits: Vec<BalanceDebit>) -> AppResult<EventCharges> {
        let mut ec = EventCharges::new();
        let ids: Vec<String> = debits.iter().map(|_| Uuid::new_v4().to_string()).collect();
        for (i, debit) in debits.into_iter().enumerate() {
            ec.abstracts = Decimal::sum_optional(ec.abstracts, Some(debit.usage))?;
            if debit.concrete {
                ec.concretes = Decimal::sum_optional(ec.concretes, debit.charge.units)?;
            }
            let mut charge = debit.charge;
            if i == 0 && ids.len() > 1 {
                charge.joined_charge_ids = Some(ids[1..].to_vec());
            }
            if let Some(uf) = debit.unit_factor {
                ec.unit_factors.insert(charge.unit_factor_id.clone(), uf);
            }
            ec.accounting.insert(ids[i].clone(), charge);
        }
        if let Some(first) = ids.first() {
            ec.append_charge_entry(ChargeEntry {
                charging_id: first.clone(),
                compress_factor: 1,
            });
        }
        ec.accounts.insert(account.id.clone(), account.clone());
        Ok(ec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apolo_core::models::account::{AccountWithWeight, Opts, BALANCE_LIMIT, BALANCE_UNLIMITED, META_ABSTRACT, META_CONCRETE};
    use apolo_core::models::weights::{DynamicWeight, DynamicWeights};
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use std::collections::HashMap;

    const SECOND: i64 = 1_000_000_000;

    /// Understands `*string:~*req.<Field>:<value>` filters
    struct StringFieldMatcher;

    impl FilterMatcher for StringFieldMatcher {
        fn matches(&self, _tenant: &str, ids: &[String], event: &EventContext) -> AppResult<bool> {
            for id in ids {
                let rule = id
                    .strip_prefix("*string:~*req.")
                    .ok_or_else(|| AppError::Filter(id.clone()))?;
                let (field, value) = rule
                    .split_once(':')
                    .ok_or_else(|| AppError::Filter(id.clone()))?;
                if event.get(field).and_then(Value::as_str) != Some(value) {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }

    fn d(v: rust_decimal::Decimal) -> Decimal {
        Decimal::from(v)
    }

    fn voice_event() -> EventContext {
        let mut ev = EventContext::new();
        ev.insert("ToR".to_string(), Value::String("*voice".to_string()));
        ev
    }

    fn voice_ci(fixed: Option<Decimal>, recurrent: Decimal) -> CostIncrement {
        CostIncrement {
            filter_ids: Some(vec!["*string:~*req.ToR:*voice".to_string()]),
            increment: Some(Decimal::from(SECOND)),
            fixed_fee: fixed,
            recurrent_fee: Some(recurrent),
        }
    }

    fn abstract_balance(id: &str, seconds: i64, weight: f64) -> Balance {
        Balance {
            id: id.to_string(),
            balance_type: META_ABSTRACT.to_string(),
            units: Decimal::from(seconds * SECOND),
            weights: Some(DynamicWeights(vec![DynamicWeight::new(None, weight)])),
            cost_increments: Some(vec![voice_ci(None, Decimal::ZERO)]),
            ..Default::default()
        }
    }

    fn concrete_balance(id: &str, units: Decimal, weight: f64) -> Balance {
        Balance {
            id: id.to_string(),
            balance_type: META_CONCRETE.to_string(),
            units,
            weights: Some(DynamicWeights(vec![DynamicWeight::new(None, weight)])),
            cost_increments: Some(vec![voice_ci(Some(d(dec!(0.1))), d(dec!(0.01)))]),
            ..Default::default()
        }
    }

    fn account(balances: Vec<Balance>) -> Account {
        Account {
            tenant: "cgrates.org".to_string(),
            id: "1001".to_string(),
            balances: Some(
                balances
                    .into_iter()
                    .map(|b| (b.id.clone(), b))
                    .collect::<HashMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    fn service() -> DebitService<StringFieldMatcher> {
        DebitService::new(Arc::new(StringFieldMatcher), AccountsConfig::default())
    }

    #[test]
    fn test_select_cost_increment_exactly_one() {
        let svc = service();
        let mut blnc = Balance::new_default("B1");
        let ci = svc
            .select_cost_increment(&blnc, "cgrates.org", &voice_event())
            .unwrap();
        assert_eq!(ci.increment, Some(Decimal::from(SECOND)));

        assert_eq!(
            svc.select_cost_increment(&blnc, "cgrates.org", &EventContext::new())
                .unwrap_err(),
            AppError::NoCostIncrement("B1".to_string())
        );

        blnc.cost_increments
            .as_mut()
            .unwrap()
            .push(voice_ci(None, Decimal::ONE));
        assert_eq!(
            svc.select_cost_increment(&blnc, "cgrates.org", &voice_event())
                .unwrap_err(),
            AppError::AmbiguousCostIncrement {
                balance: "B1".to_string(),
                matched: 2
            }
        );
    }

    #[test]
    fn test_select_unit_factor() {
        let svc = service();
        let mut blnc = Balance::new_default("B1");
        assert_eq!(
            svc.select_unit_factor(&blnc, "cgrates.org", &voice_event())
                .unwrap(),
            None
        );
        blnc.unit_factors = Some(vec![
            UnitFactor {
                filter_ids: Some(vec!["*string:~*req.ToR:*voice".to_string()]),
                factor: Some(d(dec!(2))),
            },
            UnitFactor {
                filter_ids: Some(vec!["*string:~*req.ToR:*data".to_string()]),
                factor: Some(d(dec!(3))),
            },
        ]);
        let uf = svc
            .select_unit_factor(&blnc, "cgrates.org", &voice_event())
            .unwrap()
            .unwrap();
        assert_eq!(uf.factor, Some(d(dec!(2))));

        blnc.unit_factors.as_mut().unwrap().push(UnitFactor {
            filter_ids: None,
            factor: Some(d(dec!(5))),
        });
        assert!(matches!(
            svc.select_unit_factor(&blnc, "cgrates.org", &voice_event()),
            Err(AppError::AmbiguousUnitFactor { matched: 2, .. })
        ));
    }

    #[test]
    fn test_debit_abstract_balance_rounds_up() {
        let svc = service();
        let mut acc = account(vec![abstract_balance("AB1", 60, 10.0)]);
        let debit = svc
            .debit_balance(
                &mut acc,
                &ChargeRequest::new("AB1", Decimal::from(10 * SECOND + SECOND / 2)),
                &voice_event(),
            )
            .unwrap();
        assert_eq!(debit.usage, Decimal::from(11 * SECOND));
        assert_eq!(debit.charge.units, Some(Decimal::from(11 * SECOND)));
        assert_eq!(debit.charge.balance_limit, Some(Decimal::ZERO));
        assert!(!debit.concrete);
        assert_eq!(acc.balance("AB1").unwrap().units, Decimal::from(49 * SECOND));
    }

    #[test]
    fn test_debit_applies_unit_factor() {
        let svc = service();
        let mut blnc = abstract_balance("AB1", 60, 10.0);
        blnc.unit_factors = Some(vec![UnitFactor {
            filter_ids: None,
            factor: Some(d(dec!(2))),
        }]);
        let mut acc = account(vec![blnc]);
        let debit = svc
            .debit_balance(
                &mut acc,
                &ChargeRequest::new("AB1", Decimal::from(10 * SECOND)),
                &voice_event(),
            )
            .unwrap();
        assert_eq!(debit.charge.units, Some(Decimal::from(20 * SECOND)));
        assert!(!debit.charge.unit_factor_id.is_empty());
        assert_eq!(debit.unit_factor.unwrap().factor, Some(d(dec!(2))));
        assert_eq!(acc.balance("AB1").unwrap().units, Decimal::from(40 * SECOND));
    }

    #[test]
    fn test_debit_concrete_balance_prices_usage() {
        let svc = service();
        let mut acc = account(vec![concrete_balance("CB1", d(dec!(10)), 10.0)]);
        let debit = svc
            .debit_balance(
                &mut acc,
                &ChargeRequest::new("CB1", Decimal::from(30 * SECOND)),
                &voice_event(),
            )
            .unwrap();
        assert_eq!(debit.charge.units, Some(d(dec!(0.4))));
        assert!(debit.concrete);
        assert_eq!(acc.balance("CB1").unwrap().units, d(dec!(9.6)));
    }

    #[test]
    fn test_debit_respects_balance_limit() {
        let svc = service();
        let mut blnc = concrete_balance("CB1", d(dec!(0.3)), 10.0);
        let mut opts = Opts::new();
        opts.insert(BALANCE_LIMIT.to_string(), Value::String("0.1".to_string()));
        blnc.opts = Some(opts);
        let mut acc = account(vec![blnc]);
        let err = svc
            .debit_balance(
                &mut acc,
                &ChargeRequest::new("CB1", Decimal::from(30 * SECOND)),
                &voice_event(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            AppError::InsufficientBalance {
                required: "0.40".to_string(),
                available: "0.2".to_string()
            }
        );
        assert_eq!(acc.balance("CB1").unwrap().units, d(dec!(0.3)));
    }

    #[test]
    fn test_debit_unlimited_balance_goes_negative() {
        let svc = service();
        let mut blnc = concrete_balance("CB1", Decimal::ZERO, 10.0);
        let mut opts = Opts::new();
        opts.insert(BALANCE_UNLIMITED.to_string(), Value::Bool(true));
        blnc.opts = Some(opts);
        let mut acc = account(vec![blnc]);
        let debit = svc
            .debit_balance(
                &mut acc,
                &ChargeRequest::new("CB1", Decimal::from(10 * SECOND)),
                &voice_event(),
            )
            .unwrap();
        assert_eq!(debit.charge.balance_limit, None);
        assert_eq!(acc.balance("CB1").unwrap().units, d(dec!(-0.2)));
    }

    #[test]
    fn test_debit_charges_restores_on_failure() {
        let svc = service();
        let mut acc = account(vec![abstract_balance("AB1", 60, 10.0)]);
        let before = acc.clone();
        let err = svc
            .debit_charges(
                &mut acc,
                &[
                    ChargeRequest::new("AB1", Decimal::from(30 * SECOND)),
                    ChargeRequest::new("MISSING", Decimal::from(SECOND)),
                ],
                &voice_event(),
            )
            .unwrap_err();
        assert!(matches!(err, AppError::BalanceNotFound { .. }));
        assert!(acc.equals(&before));
    }

    #[test]
    fn test_debit_charges_joins_charge_ids() {
        let svc = service();
        let mut acc = account(vec![
            abstract_balance("AB1", 60, 10.0),
            concrete_balance("CB1", d(dec!(10)), 10.0),
        ]);
        let ec = svc
            .debit_charges(
                &mut acc,
                &[
                    ChargeRequest::new("AB1", Decimal::from(30 * SECOND)),
                    ChargeRequest::new("CB1", Decimal::from(10 * SECOND)),
                ],
                &voice_event(),
            )
            .unwrap();
        assert_eq!(ec.charges().len(), 1);
        let first = &ec.accounting[&ec.charges()[0].charging_id];
        assert_eq!(first.balance_id, "AB1");
        let joined = first.joined_charge_ids.as_ref().unwrap();
        assert_eq!(joined.len(), 1);
        assert_eq!(ec.accounting[&joined[0]].balance_id, "CB1");
        assert_eq!(ec.abstracts, Some(Decimal::from(40 * SECOND)));
        assert_eq!(ec.concretes, Some(d(dec!(0.2))));
        assert_eq!(
            ec.accounts["1001"].balance("CB1").unwrap().units,
            d(dec!(9.8))
        );
    }

    #[test]
    fn test_debit_usage_by_weight() {
        let svc = service();
        let mut acc = account(vec![
            abstract_balance("AB_LOW", 60, 10.0),
            abstract_balance("AB_HIGH", 30, 20.0),
        ]);
        let ec = svc
            .debit_usage(&mut acc, Decimal::from(50 * SECOND), &voice_event())
            .unwrap();
        assert_eq!(acc.balance("AB_HIGH").unwrap().units, Decimal::ZERO);
        assert_eq!(acc.balance("AB_LOW").unwrap().units, Decimal::from(40 * SECOND));
        assert_eq!(ec.abstracts, Some(Decimal::from(50 * SECOND)));
        assert_eq!(ec.concretes, None);
        assert_eq!(ec.accounting.len(), 2);
    }

    #[test]
    fn test_debit_usage_falls_back_to_concrete() {
        let svc = service();
        let mut acc = account(vec![
            abstract_balance("AB1", 20, 20.0),
            concrete_balance("CB1", d(dec!(1)), 10.0),
        ]);
        let ec = svc
            .debit_usage(&mut acc, Decimal::from(30 * SECOND), &voice_event())
            .unwrap();
        assert_eq!(acc.balance("AB1").unwrap().units, Decimal::ZERO);
        // fixed fee 0.1 plus ten seconds at 0.01
        assert_eq!(acc.balance("CB1").unwrap().units, d(dec!(0.8)));
        assert_eq!(ec.concretes, Some(d(dec!(0.2))));
        assert_eq!(ec.abstracts, Some(Decimal::from(30 * SECOND)));
    }

    #[test]
    fn test_debit_usage_insufficient_restores() {
        let svc = service();
        let mut acc = account(vec![
            abstract_balance("AB1", 20, 20.0),
            abstract_balance("AB2", 5, 10.0),
        ]);
        let before = acc.clone();
        let err = svc
            .debit_usage(&mut acc, Decimal::from(30 * SECOND), &voice_event())
            .unwrap_err();
        assert_eq!(
            err,
            AppError::InsufficientBalance {
                required: Decimal::from(30 * SECOND).to_string(),
                available: Decimal::from(25 * SECOND).to_string(),
            }
        );
        assert!(acc.equals(&before));
    }

    #[test]
    fn test_debit_usage_stops_at_max_iterations() {
        let svc = DebitService::new(
            Arc::new(StringFieldMatcher),
            AccountsConfig { max_iterations: 1 },
        );
        let mut acc = account(vec![
            abstract_balance("AB1", 20, 20.0),
            abstract_balance("AB2", 60, 10.0),
        ]);
        assert!(matches!(
            svc.debit_usage(&mut acc, Decimal::from(30 * SECOND), &voice_event()),
            Err(AppError::InsufficientBalance { .. })
        ));
        assert_eq!(acc.balance("AB1").unwrap().units, Decimal::from(20 * SECOND));
    }

    #[test]
    fn test_debit_usage_spills_over_balance_without_increment() {
        let svc = service();
        let mut ab1 = abstract_balance("AB1", 10, 20.0);
        ab1.cost_increments = Some(vec![CostIncrement {
            increment: None,
            ..voice_ci(None, Decimal::ZERO)
        }]);
        let mut acc = account(vec![ab1, abstract_balance("AB2", 100, 10.0)]);
        let ec = svc
            .debit_usage(&mut acc, Decimal::from(30 * SECOND), &voice_event())
            .unwrap();
        assert_eq!(acc.balance("AB1").unwrap().units, Decimal::ZERO);
        assert_eq!(acc.balance("AB2").unwrap().units, Decimal::from(80 * SECOND));
        assert_eq!(ec.abstracts, Some(Decimal::from(30 * SECOND)));
    }

    #[test]
    fn test_debit_usage_concrete_without_increment_is_all_or_nothing() {
        let svc = service();
        let mut cb1 = concrete_balance("CB1", d(dec!(0.05)), 20.0);
        cb1.cost_increments = Some(vec![CostIncrement {
            increment: None,
            ..voice_ci(Some(d(dec!(0.1))), Decimal::ZERO)
        }]);
        let mut acc = account(vec![cb1, abstract_balance("AB1", 60, 10.0)]);
        svc.debit_usage(&mut acc, Decimal::from(30 * SECOND), &voice_event())
            .unwrap();
        // the fixed fee does not fit, so the abstract balance pays it all
        assert_eq!(acc.balance("CB1").unwrap().units, d(dec!(0.05)));
        assert_eq!(acc.balance("AB1").unwrap().units, Decimal::from(30 * SECOND));
    }

    #[test]
    fn test_restore_with_partial_backup() {
        let svc = service();
        let mut acc = account(vec![
            abstract_balance("AB1", 60, 20.0),
            abstract_balance("AB2", 60, 10.0),
        ]);
        let mut partial = AccountBalancesBackup::new();
        partial.insert("AB1".to_string(), Decimal::from(5 * SECOND));

        svc.restore(&mut acc, &partial);
        assert_eq!(acc.balance("AB1").unwrap().units, Decimal::from(5 * SECOND));
        assert_eq!(acc.balance("AB2").unwrap().units, Decimal::from(60 * SECOND));
        assert!(acc.balances_altered(&partial));
    }

    #[test]
    fn test_restore_ignores_unknown_backup_keys() {
        let svc = service();
        let mut acc = account(vec![abstract_balance("AB1", 60, 20.0)]);
        let mut backup = acc.account_balances_backup().unwrap();
        backup.insert("GHOST".to_string(), Decimal::from(SECOND));

        svc.restore(&mut acc, &backup);
        assert_eq!(acc.balance("AB1").unwrap().units, Decimal::from(60 * SECOND));
        assert!(acc.balance("GHOST").is_none());
        assert_eq!(acc.balances.as_ref().unwrap().len(), 1);
        assert!(acc.balances_altered(&backup));
    }

    #[test]
    fn test_debit_batch_account() {
        let svc = service();
        let mut batch = AccountsWithWeight(vec![AccountWithWeight {
            account: account(vec![abstract_balance("AB1", 60, 10.0)]),
            weight: 10.0,
            lock_id: "lk_1001".to_string(),
        }]);
        svc.debit_batch_account(
            &mut batch,
            "cgrates.org:1001",
            Decimal::from(20 * SECOND),
            &voice_event(),
        )
        .unwrap();
        assert_eq!(
            batch.accounts()[0].balance("AB1").unwrap().units,
            Decimal::from(40 * SECOND)
        );

        assert_eq!(
            svc.debit_batch_account(
                &mut batch,
                "cgrates.org:1002",
                Decimal::from(SECOND),
                &voice_event(),
            )
            .unwrap_err(),
            AppError::AccountNotFound("cgrates.org:1002".to_string())
        );
    }

    #[test]
    fn test_debit_usage_skips_balances_not_pricing_the_usage() {
        let svc = service();
        let mut data_only = abstract_balance("DATA", 1000, 50.0);
        data_only.cost_increments = Some(vec![CostIncrement {
            filter_ids: Some(vec!["*string:~*req.ToR:*data".to_string()]),
            increment: Some(Decimal::from(1_048_576)),
            fixed_fee: None,
            recurrent_fee: None,
        }]);
        let mut acc = account(vec![data_only, abstract_balance("VOICE", 60, 10.0)]);
        svc.debit_usage(&mut acc, Decimal::from(10 * SECOND), &voice_event())
            .unwrap();
        assert_eq!(acc.balance("DATA").unwrap().units, Decimal::from(1000 * SECOND));
        assert_eq!(acc.balance("VOICE").unwrap().units, Decimal::from(50 * SECOND));
    }
}
