//! Integration tests for rating cost queries
//!
//! Rate profiles enter as their API JSON form, get compiled and are rated
//! end to end through `RatingService`.

#[cfg(test)]
mod tests {
    use apolo_core::config::RatingConfig;
    use apolo_core::models::{APIRateProfile, RateProfile};
    use apolo_core::traits::{AllowAll, EventContext, TracingLogger};
    use apolo_core::{AppError, Decimal};
    use apolo_services::{RatingQuery, RatingService};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::Arc;

    const SECOND: i64 = 1_000_000_000;

    fn service() -> RatingService<AllowAll> {
        RatingService::new(
            Arc::new(AllowAll),
            Arc::new(TracingLogger),
            RatingConfig::default(),
        )
        .unwrap()
    }

    fn profile(json: serde_json::Value) -> RateProfile {
        let api: APIRateProfile = serde_json::from_value(json).unwrap();
        api.as_rate_profile().unwrap()
    }

    fn tiered_profile() -> RateProfile {
        profile(json!({
            "Tenant": "cgrates.org",
            "ID": "RP_TIERED",
            "Rates": {
                "RT_ALWAYS": {
                    "ID": "RT_ALWAYS",
                    "ActivationTimes": "* * * * *",
                    "Weights": ";10",
                    "IntervalRates": [
                        {"IntervalStart": "0s", "RecurrentFee": 0.12, "Unit": "1m", "Increment": "1m"},
                        {"IntervalStart": "1m", "RecurrentFee": 0.06, "Unit": "1m", "Increment": "1s"}
                    ]
                }
            }
        }))
    }

    #[test]
    fn test_tiered_rate_cost() {
        let svc = service();
        let rp = tiered_profile();
        let start = Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap();
        let query = RatingQuery::new(start, Decimal::from(150 * SECOND), EventContext::new());

        let cost = svc.rate_profile_cost_for_event(&rp, &query).unwrap();
        assert_eq!(cost.id, "RP_TIERED");
        assert_eq!(cost.cost, Decimal::from(dec!(0.21)));
        assert_eq!(cost.rates.as_ref().unwrap().len(), 2);

        let intervals = cost.cost_intervals.as_ref().unwrap();
        assert_eq!(intervals.len(), 1);
        let increments = intervals[0].increments.as_ref().unwrap();
        assert_eq!(increments.len(), 2);
        assert_eq!(increments[0].compress_factor, 1);
        assert_eq!(increments[1].compress_factor, 90);
    }

    #[test]
    fn test_weekend_rate_takes_over_at_midnight() {
        let svc = service();
        let rp = profile(json!({
            "Tenant": "cgrates.org",
            "ID": "RP_WEEKEND",
            "Rates": {
                "RT_BASE": {
                    "ID": "RT_BASE",
                    "ActivationTimes": "* * * * *",
                    "Weights": ";10",
                    "IntervalRates": [
                        {"IntervalStart": 0, "RecurrentFee": 0.12, "Unit": "1m", "Increment": "1m"}
                    ]
                },
                "RT_WEEKEND": {
                    "ID": "RT_WEEKEND",
                    "ActivationTimes": "* * * * 0,6",
                    "Weights": ";20",
                    "IntervalRates": [
                        {"IntervalStart": 0, "RecurrentFee": 0.03, "Unit": "1m", "Increment": "1m"}
                    ]
                }
            }
        }));
        // Friday one minute before midnight
        let start = Utc.with_ymd_and_hms(2026, 10, 16, 23, 59, 0).unwrap();
        let query = RatingQuery::new(start, Decimal::from(120 * SECOND), EventContext::new());

        let ordered = svc.order_rates(&rp, &query).unwrap();
        let ids: Vec<&str> = ordered.iter().map(|o| o.rate.id.as_str()).collect();
        assert_eq!(ids, vec!["RT_BASE", "RT_WEEKEND"]);
        assert_eq!(ordered[1].interval_start, Decimal::from(60 * SECOND));

        let cost = svc.rate_profile_cost_for_event(&rp, &query).unwrap();
        assert_eq!(cost.cost, Decimal::from(dec!(0.15)));
        assert_eq!(cost.cost_intervals.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_max_cost_free_caps_profile_cost() {
        let svc = service();
        let mut rp = tiered_profile();
        rp.max_cost = Some(Decimal::from(dec!(0.15)));
        rp.max_cost_strategy = "*free".to_string();
        let start = Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap();
        let query = RatingQuery::new(start, Decimal::from(150 * SECOND), EventContext::new());

        let cost = svc.rate_profile_cost_for_event(&rp, &query).unwrap();
        assert_eq!(cost.cost, Decimal::from(dec!(0.15)));
        assert_eq!(
            cost.altered,
            Some(vec!["MaxCost".to_string(), "RoundingDecimals".to_string()])
        );
    }

    #[test]
    fn test_query_from_event_options() {
        let svc = service();
        let rp = tiered_profile();
        let mut event = EventContext::new();
        event.insert("*startTime".to_string(), json!("2026-10-14T12:00:00Z"));
        event.insert("*usage".to_string(), json!("90s"));
        event.insert("*intervalStart".to_string(), json!("1m"));
        let query = RatingQuery::from_event(event).unwrap();
        assert_eq!(query.interval_start, Decimal::from(60 * SECOND));

        // only the second tier is charged: 90 seconds at 0.06 per minute
        let cost = svc.rate_profile_cost_for_event(&rp, &query).unwrap();
        assert_eq!(cost.cost, Decimal::from(dec!(0.09)));
    }

    #[test]
    fn test_profile_without_active_rate() {
        let svc = service();
        let rp = profile(json!({
            "Tenant": "cgrates.org",
            "ID": "RP_XMAS",
            "Rates": {
                "RT_XMAS": {
                    "ID": "RT_XMAS",
                    "ActivationTimes": "* * 25 12 *",
                    "IntervalRates": [
                        {"IntervalStart": 0, "RecurrentFee": 0.01, "Unit": "1m", "Increment": "1s"}
                    ]
                }
            }
        }));
        let start = Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap();
        let query = RatingQuery::new(start, Decimal::from(60 * SECOND), EventContext::new());
        assert_eq!(
            svc.rate_profile_cost_for_event(&rp, &query).unwrap_err(),
            AppError::RateNotFound("cgrates.org:RP_XMAS".to_string())
        );
    }
}
