//! Cron activation schedules
//!
//! Standard five field expressions (minute, hour, day of month, month, day of
//! week) evaluated in UTC at minute granularity, parsed and matched by
//! `croner`. Besides the next activation, a schedule answers when it next
//! becomes inactive, which is what turns a cron expression into activation
//! windows.
//!
//! Day of week counts from 0 = Sunday. When both day fields are restricted
//! either one matching is enough.

use crate::error::AppError;
use crate::AppResult;
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use croner::Cron;
use std::fmt;

/// Searches give up this many years past their starting point
const SEARCH_HORIZON_YEARS: i32 = 5;

const MINUTE: usize = 0;
const HOUR: usize = 1;
const DAY_OF_MONTH: usize = 2;
const DAY_OF_WEEK: usize = 4;

/// Compiled cron expression
pub struct CronSchedule {
    expr: String,
    cron: Cron,
    /// Fields written as a bare wildcard, in expression order
    wildcards: [bool; 5],
}

impl CronSchedule {
    /// Parse a standard five field expression or one of the `@yearly`,
    /// `@monthly`, `@weekly`, `@daily` and `@hourly` shortcuts
    pub fn parse(expr: &str) -> AppResult<Self> {
        let normalized = match expr.trim() {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other => other,
        };
        let invalid = |reason: String| AppError::InvalidSchedule {
            expr: expr.to_string(),
            reason,
        };

        let fields: Vec<&str> = normalized.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!(
                "expected exactly 5 fields, found {}",
                fields.len()
            )));
        }
        let cron = Cron::new(normalized)
            .parse()
            .map_err(|e| invalid(e.to_string()))?;

        let mut wildcards = [false; 5];
        for (slot, field) in wildcards.iter_mut().zip(&fields) {
            *slot = matches!(*field, "*" | "?" | "*/1");
        }
        Ok(Self {
            expr: expr.to_string(),
            cron,
            wildcards,
        })
    }

    /// Source expression
    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// True when the minute containing `t` is active
    pub fn matches(&self, t: &DateTime<Utc>) -> bool {
        self.cron
            .is_time_matching(&truncate_to_minute(*t))
            .unwrap_or(false)
    }

    /// First activation minute strictly after `after`
    pub fn next(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let from = truncate_to_minute(after) + Duration::minutes(1);
        let found = self.cron.find_next_occurrence(&from, true).ok()?;
        (found.year() <= after.year() + SEARCH_HORIZON_YEARS).then_some(found)
    }

    /// First inactive minute strictly after `after`
    ///
    /// Returns `None` for schedules that never become inactive within the
    /// search horizon, "* * * * *" being the obvious case.
    pub fn next_inactive(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.wildcards.iter().all(|w| *w) {
            return None;
        }
        let limit_year = after.year() + SEARCH_HORIZON_YEARS;
        let mut t = truncate_to_minute(after) + Duration::minutes(1);
        loop {
            if t.year() > limit_year {
                return None;
            }
            if !self.matches(&t) {
                return Some(t);
            }
            // t is active: skip whole units that are known to stay active
            t = if !self.wildcards[MINUTE] {
                t + Duration::minutes(1)
            } else if !self.wildcards[HOUR] {
                start_of_next_hour(t)
            } else if self.wildcards[DAY_OF_MONTH] && self.wildcards[DAY_OF_WEEK] {
                start_of_next_month(t)?
            } else {
                start_of_next_day(t)?
            };
        }
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronSchedule")
            .field("expr", &self.expr)
            .finish()
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t - Duration::seconds(t.second() as i64) - Duration::nanoseconds(t.nanosecond() as i64)
}

fn start_of_next_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    truncate_to_minute(t) - Duration::minutes(t.minute() as i64) + Duration::hours(1)
}

fn start_of_next_day(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let next = t.date_naive().succ_opt()?.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&next))
}

fn start_of_next_month(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_every_minute() {
        let sched = CronSchedule::parse("* * * * *").unwrap();
        assert_eq!(
            sched.next(at(2020, 12, 23, 23, 58, 5)),
            Some(at(2020, 12, 23, 23, 59, 0))
        );
        assert_eq!(
            sched.next(at(2020, 12, 23, 23, 59, 0)),
            Some(at(2020, 12, 24, 0, 0, 0))
        );
        assert_eq!(sched.next_inactive(at(2020, 12, 23, 23, 59, 0)), None);
    }

    #[test]
    fn test_christmas_day_window() {
        let sched = CronSchedule::parse("* * 24 12 *").unwrap();
        let start = sched.next(at(2020, 12, 23, 23, 58, 5)).unwrap();
        assert_eq!(start, at(2020, 12, 24, 0, 0, 0));
        assert_eq!(sched.next_inactive(start), Some(at(2020, 12, 25, 0, 0, 0)));
        assert_eq!(
            sched.next(at(2020, 12, 25, 0, 0, 0)),
            Some(at(2021, 12, 24, 0, 0, 0))
        );
    }

    #[test]
    fn test_steps_and_ranges() {
        let sched = CronSchedule::parse("*/15 8-17 * * MON-FRI").unwrap();
        // 2021-03-05 is a Friday
        assert_eq!(
            sched.next(at(2021, 3, 5, 10, 7, 0)),
            Some(at(2021, 3, 5, 10, 15, 0))
        );
        assert_eq!(
            sched.next_inactive(at(2021, 3, 5, 10, 15, 0)),
            Some(at(2021, 3, 5, 10, 16, 0))
        );
        // after Friday 17:45 the next slot is Monday 08:00
        assert_eq!(
            sched.next(at(2021, 3, 5, 17, 45, 0)),
            Some(at(2021, 3, 8, 8, 0, 0))
        );
    }

    #[test]
    fn test_working_hours_become_inactive_at_end_of_day() {
        let sched = CronSchedule::parse("* 8-17 * * 1-5").unwrap();
        assert_eq!(
            sched.next_inactive(at(2021, 3, 8, 8, 0, 0)),
            Some(at(2021, 3, 8, 18, 0, 0))
        );
    }

    #[test]
    fn test_day_fields_or_when_both_restricted() {
        // 1st of the month or any Monday
        let sched = CronSchedule::parse("0 0 1 * 1").unwrap();
        // 2021-03-01 is a Monday, the following Monday is 2021-03-08
        assert_eq!(
            sched.next(at(2021, 3, 1, 0, 0, 0)),
            Some(at(2021, 3, 8, 0, 0, 0))
        );
        assert_eq!(
            sched.next(at(2021, 3, 29, 0, 0, 0)),
            Some(at(2021, 4, 1, 0, 0, 0))
        );
    }

    #[test]
    fn test_month_skip_in_next_inactive() {
        let sched = CronSchedule::parse("* * * 1-11 *").unwrap();
        assert_eq!(
            sched.next_inactive(at(2021, 1, 1, 0, 0, 0)),
            Some(at(2021, 12, 1, 0, 0, 0))
        );
    }

    #[test]
    fn test_shortcuts() {
        let sched = CronSchedule::parse("@daily").unwrap();
        assert_eq!(
            sched.next(at(2021, 3, 5, 10, 7, 0)),
            Some(at(2021, 3, 6, 0, 0, 0))
        );
        assert_eq!(
            sched.next_inactive(at(2021, 3, 6, 0, 0, 0)),
            Some(at(2021, 3, 6, 0, 1, 0))
        );
    }

    #[test]
    fn test_sunday_is_day_zero() {
        let sched = CronSchedule::parse("* * * * 0").unwrap();
        // 2021-03-07 is a Sunday
        assert!(sched.matches(&at(2021, 3, 7, 12, 0, 30)));
        assert!(!sched.matches(&at(2021, 3, 8, 12, 0, 0)));
        assert_eq!(
            sched.next(at(2021, 3, 6, 10, 0, 0)),
            Some(at(2021, 3, 7, 0, 0, 0))
        );
        assert_eq!(
            sched.next_inactive(at(2021, 3, 7, 0, 0, 0)),
            Some(at(2021, 3, 8, 0, 0, 0))
        );
    }

    #[test]
    fn test_impossible_date_never_fires() {
        let sched = CronSchedule::parse("0 0 30 2 *").unwrap();
        assert_eq!(sched.next(at(2021, 1, 1, 0, 0, 0)), None);
    }

    #[test]
    fn test_parse_errors() {
        for expr in ["* * * *", "61 * * * *", "* * * 13 *", "*/0 * * * *", "a b c d e"] {
            assert!(
                matches!(
                    CronSchedule::parse(expr),
                    Err(AppError::InvalidSchedule { .. })
                ),
                "expected parse error for {}",
                expr
            );
        }
    }
}
