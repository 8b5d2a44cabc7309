//! Benchmarks for the rating path
//!
//! Run with: cargo bench --package apolo-services
//!
//! These benchmarks measure rate ordering, interval computation and the
//! full cost query on in-memory profiles.

use apolo_core::config::RatingConfig;
use apolo_core::models::{APIRateProfile, IntervalRates, RateProfile};
use apolo_core::traits::{AllowAll, EventContext, TracingLogger};
use apolo_core::Decimal;
use apolo_services::{compute_rate_s_intervals, RatingQuery, RatingService};
use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::sync::Arc;

const SECOND: i64 = 1_000_000_000;

/// Base rate plus a weekend override, each with two tiers
fn create_profile() -> RateProfile {
    let api: APIRateProfile = serde_json::from_value(json!({
        "Tenant": "cgrates.org",
        "ID": "RP_BENCH",
        "Rates": {
            "RT_BASE": {
                "ID": "RT_BASE",
                "ActivationTimes": "* * * * *",
                "Weights": ";10",
                "IntervalRates": [
                    {"IntervalStart": 0, "FixedFee": 0.05, "RecurrentFee": 0.12, "Unit": "1m", "Increment": "1m"},
                    {"IntervalStart": "1m", "RecurrentFee": 0.06, "Unit": "1m", "Increment": "1s"}
                ]
            },
            "RT_WEEKEND": {
                "ID": "RT_WEEKEND",
                "ActivationTimes": "* * * * 0,6",
                "Weights": ";20",
                "IntervalRates": [
                    {"IntervalStart": 0, "RecurrentFee": 0.03, "Unit": "1m", "Increment": "1s"}
                ]
            }
        }
    }))
    .expect("valid profile json");
    api.as_rate_profile().expect("profile compiles")
}

fn create_service() -> RatingService<AllowAll> {
    RatingService::new(
        Arc::new(AllowAll),
        Arc::new(TracingLogger),
        RatingConfig::default(),
    )
    .expect("default rating config")
}

/// Benchmark rate ordering across a weekday/weekend boundary
fn bench_order_rates(c: &mut Criterion) {
    let svc = create_service();
    let profile = create_profile();
    let start = Utc.with_ymd_and_hms(2026, 10, 16, 23, 30, 0).unwrap();
    let query = RatingQuery::new(start, Decimal::from(3600 * SECOND), EventContext::new());

    c.bench_function("order_rates_weekend_boundary", |b| {
        b.iter(|| {
            let _ordered = svc.order_rates(black_box(&profile), black_box(&query));
        });
    });
}

/// Benchmark interval computation over growing usages
fn bench_compute_intervals(c: &mut Criterion) {
    let svc = create_service();
    let profile = create_profile();
    let start = Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap();

    let mut group = c.benchmark_group("compute_rate_s_intervals");
    for minutes in [1i64, 10, 60, 600] {
        let query = RatingQuery::new(
            start,
            Decimal::from(minutes * 60 * SECOND),
            EventContext::new(),
        );
        let ordered = svc
            .order_rates(&profile, &query)
            .expect("rates order on a weekday");
        group.throughput(Throughput::Elements(minutes as u64));
        group.bench_with_input(BenchmarkId::from_parameter(minutes), &query, |b, query| {
            b.iter(|| {
                let mut rates = IntervalRates::new();
                let _intervals = compute_rate_s_intervals(
                    black_box(&ordered),
                    query.interval_start,
                    query.usage,
                    &mut rates,
                );
            });
        });
    }
    group.finish();
}

/// Benchmark the full cost query including correction
fn bench_rate_profile_cost(c: &mut Criterion) {
    let svc = create_service();
    let profile = create_profile();
    let start = Utc.with_ymd_and_hms(2026, 10, 16, 23, 30, 0).unwrap();
    let query = RatingQuery::new(start, Decimal::from(3600 * SECOND), EventContext::new());

    c.bench_function("rate_profile_cost_for_event", |b| {
        b.iter(|| {
            let _cost = svc.rate_profile_cost_for_event(black_box(&profile), black_box(&query));
        });
    });
}

criterion_group!(
    benches,
    bench_order_rates,
    bench_compute_intervals,
    bench_rate_profile_cost
);
criterion_main!(benches);
