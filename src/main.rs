//! ApoloBilling command line rater
//!
//! Rates one usage against a rate profile and prints the resulting
//! RateProfileCost as JSON.
//!
//! Usage: apolo-rater <profile.json> <start RFC3339> <usage>
//!
//! The usage accepts plain nanoseconds or duration suffixes (`90s`, `1m30s`).

use anyhow::{bail, Context};
use apolo_core::models::APIRateProfile;
use apolo_core::traits::{AllowAll, EventContext, TracingLogger};
use apolo_core::{AppConfig, Decimal};
use apolo_services::{RatingQuery, RatingService};
use chrono::{DateTime, Utc};
use std::env;
use std::fs;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
fn init_tracing(config: &AppConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "apolo_rater={},apolo_services={},apolo_core={}",
            config.logging.level, config.logging.level, config.logging.level
        ))
    });

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.logging.json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn run(config: AppConfig, args: &[String]) -> anyhow::Result<()> {
    let [profile_path, start, usage] = args else {
        bail!("usage: apolo-rater <profile.json> <start RFC3339> <usage>");
    };

    let raw = fs::read_to_string(profile_path)
        .with_context(|| format!("reading rate profile {}", profile_path))?;
    let api: APIRateProfile = serde_json::from_str(&raw)
        .with_context(|| format!("decoding rate profile {}", profile_path))?;
    let profile = api.as_rate_profile()?;
    info!(
        "Loaded rate profile {} with {} rates",
        profile.tenant_id(),
        profile.rates.len()
    );

    let start: DateTime<Utc> = DateTime::parse_from_rfc3339(start)
        .with_context(|| format!("parsing start time {}", start))?
        .with_timezone(&Utc);
    let usage = Decimal::from_usage(usage)?;

    let service = RatingService::new(Arc::new(AllowAll), Arc::new(TracingLogger), config.rating)?;
    let query = RatingQuery::new(start, usage, EventContext::new());
    let cost = service.rate_profile_cost_for_event(&profile, &query)?;

    println!("{}", serde_json::to_string_pretty(&cost)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("loading configuration")?;
    config.validate()?;

    init_tracing(&config);

    info!("Starting ApoloBilling rater v{}", env!("CARGO_PKG_VERSION"));

    let args: Vec<String> = env::args().skip(1).collect();
    run(config, &args).map_err(|e| {
        error!("Rating failed: {:#}", e);
        e
    })
}
