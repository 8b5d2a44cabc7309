//! Collaborator contracts consumed by the rating core
//!
//! Filter evaluation, logging and marshaling live outside this crate. The
//! core reaches them only through these traits so tests can plug in stubs.

use crate::error::AppError;
use crate::AppResult;
use serde::{de::DeserializeOwned, Serialize};

/// Event fields available to filter evaluation
pub type EventContext = serde_json::Map<String, serde_json::Value>;

/// Filter evaluation capability
///
/// Decides whether a set of FilterIDs passes for an event. An empty set is
/// expected to pass.
pub trait FilterMatcher: Send + Sync {
    fn matches(&self, tenant: &str, filter_ids: &[String], event: &EventContext)
        -> AppResult<bool>;
}

/// Matcher accepting every filter set, for callers that filter upstream
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl FilterMatcher for AllowAll {
    fn matches(
        &self,
        _tenant: &str,
        _filter_ids: &[String],
        _event: &EventContext,
    ) -> AppResult<bool> {
        Ok(true)
    }
}

/// Sink for non-fatal warnings raised while rating
pub trait RatingLogger: Send + Sync {
    fn warning(&self, msg: &str);
}

/// Logger forwarding to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl RatingLogger for TracingLogger {
    fn warning(&self, msg: &str) {
        tracing::warn!("{}", msg);
    }
}

/// Encoding used to persist or transport compiled structures
pub trait Marshaler {
    fn marshal<T: Serialize>(&self, value: &T) -> AppResult<String>;

    fn unmarshal<T: DeserializeOwned>(&self, data: &str) -> AppResult<T>;
}

/// JSON marshaler
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaler;

impl Marshaler for JsonMarshaler {
    fn marshal<T: Serialize>(&self, value: &T) -> AppResult<String> {
        serde_json::to_string(value).map_err(AppError::from)
    }

    fn unmarshal<T: DeserializeOwned>(&self, data: &str) -> AppResult<T> {
        serde_json::from_str(data).map_err(AppError::from)
    }
}
