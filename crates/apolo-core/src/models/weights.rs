//! Dynamic weights
//!
//! A weight whose value depends on the event: a list of `{FilterIDs, Weight}`
//! pairs where the first pair whose filters pass decides the weight.

use crate::error::AppError;
use crate::traits::{EventContext, FilterMatcher};
use crate::AppResult;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// Separator between `{FilterIDs, Weight}` pairs in the string form
pub const WEIGHTS_SEP: &str = ";";

/// Separator between FilterIDs of one pair in the string form
pub const FILTERS_SEP: &str = "&";

/// One filter-gated weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DynamicWeight {
    #[serde(rename = "FilterIDs", default, skip_serializing_if = "Option::is_none")]
    pub filter_ids: Option<Vec<String>>,

    #[serde(rename = "Weight")]
    pub weight: f64,
}

impl DynamicWeight {
    pub fn new(filter_ids: Option<Vec<String>>, weight: f64) -> Self {
        Self { filter_ids, weight }
    }
}

/// Ordered list of dynamic weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct DynamicWeights(pub Vec<DynamicWeight>);

impl DynamicWeights {
    /// Parse `fltrA&fltrB;20;fltrC;30` style strings
    ///
    /// `sep` separates the pairs and `fltr_sep` the FilterIDs of one pair.
    /// An empty filter part leaves the pair without filters.
    pub fn from_string(s: &str, sep: &str, fltr_sep: &str) -> AppResult<Self> {
        if s.is_empty() {
            return Ok(Self::default());
        }
        let parts: Vec<&str> = s.split(sep).collect();
        if parts.len() % 2 != 0 {
            return Err(AppError::InvalidDynamicWeight(s.to_string()));
        }
        let mut weights = Vec::with_capacity(parts.len() / 2);
        for pair in parts.chunks(2) {
            let filter_ids = if pair[0].is_empty() {
                None
            } else {
                Some(pair[0].split(fltr_sep).map(str::to_string).collect())
            };
            let weight = pair[1].parse::<f64>().map_err(|_| AppError::InvalidWeight {
                weight: pair[1].to_string(),
                input: s.to_string(),
            })?;
            weights.push(DynamicWeight { filter_ids, weight });
        }
        Ok(Self(weights))
    }

    /// Inverse of [`DynamicWeights::from_string`]
    pub fn to_string_with(&self, sep: &str, fltr_sep: &str) -> String {
        self.0
            .iter()
            .map(|dw| {
                let filters = dw
                    .filter_ids
                    .as_ref()
                    .map(|ids| ids.join(fltr_sep))
                    .unwrap_or_default();
                format!("{}{}{}", filters, sep, dw.weight)
            })
            .collect::<Vec<_>>()
            .join(sep)
    }

    /// Weight of the first entry whose filters pass, 0 when none does
    pub fn resolve(
        &self,
        matcher: &dyn FilterMatcher,
        tenant: &str,
        event: &EventContext,
    ) -> AppResult<f64> {
        for dw in &self.0 {
            let passes = match dw.filter_ids.as_deref() {
                None | Some([]) => true,
                Some(ids) => matcher.matches(tenant, ids, event)?,
            };
            if passes {
                return Ok(dw.weight);
            }
        }
        Ok(0.0)
    }
}

impl Deref for DynamicWeights {
    type Target = Vec<DynamicWeight>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DynamicWeights {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<DynamicWeight>> for DynamicWeights {
    fn from(weights: Vec<DynamicWeight>) -> Self {
        Self(weights)
    }
}

/// Resolve optional weights, absent weights counting as 0
pub fn resolve_weight(
    weights: Option<&DynamicWeights>,
    matcher: &dyn FilterMatcher,
    tenant: &str,
    event: &EventContext,
) -> AppResult<f64> {
    match weights {
        Some(w) => w.resolve(matcher, tenant, event),
        None => Ok(0.0),
    }
}
