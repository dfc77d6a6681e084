//! Cron-driven clock scheduling
//!
//! Parses standard five-field cron expressions (minute, hour, day-of-month,
//! month, day-of-week) and resolves the next trigger instant in UTC:
//! - wildcards, single values, ranges, steps and comma lists
//! - month and weekday names (`jan`..`dec`, `sun`..`sat`)
//! - day-of-month / day-of-week OR rule when both are restricted

use crate::error::ScheduleError;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Timelike, Utc};
use std::fmt;
use std::time::Duration;

/// Schedules that cannot fire within this many years are rejected.
const LOOKAHEAD_YEARS: i64 = 4;

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Source of "now" for the scheduler loop.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall time anchored once, then advanced by tokio's monotonic clock.
///
/// Unaffected by wall clock jumps; follows virtual time when the runtime
/// clock is paused.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    pub fn anchored_at(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = ChronoDuration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| ChronoDuration::zero());
        self.anchor + elapsed
    }
}

impl<T: Clock + ?Sized> Clock for std::sync::Arc<T> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    /// Names mapped to `min + index`
    names: &'static [&'static str],
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[] };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[] };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[] };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12, names: MONTH_NAMES };
// 7 is accepted as Sunday and folded onto 0 after parsing
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7, names: WEEKDAY_NAMES };

/// Parsed five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    source: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    /// Parse a cron expression
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::FieldCount(fields.len()));
        }

        let mut days_of_week = parse_field(&DAY_OF_WEEK, fields[4])?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(CronSchedule {
            source: expr.trim().to_string(),
            minutes: parse_field(&MINUTE, fields[0])?,
            hours: parse_field(&HOUR, fields[1])?,
            days_of_month: parse_field(&DAY_OF_MONTH, fields[2])?,
            months: parse_field(&MONTH, fields[3])?,
            days_of_week,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
        })
    }

    /// Original expression text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Earliest whole-minute instant strictly after `now` matching every field.
    pub fn next_after(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let no_occurrence = || ScheduleError::NoOccurrence(self.source.clone());

        let secs = now.timestamp();
        let start = DateTime::from_timestamp(secs - secs.rem_euclid(60) + 60, 0)
            .ok_or_else(no_occurrence)?;
        let limit = start.naive_utc() + ChronoDuration::days(366 * LOOKAHEAD_YEARS);
        let mut t = start.naive_utc();

        while t <= limit {
            if !bit(self.months, t.month()) {
                t = first_of_next_month(t.date()).ok_or_else(no_occurrence)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = start_of_day(t.date() + ChronoDuration::days(1));
                continue;
            }
            if !bit(self.hours, t.hour()) {
                t = t.with_minute(0).ok_or_else(no_occurrence)? + ChronoDuration::hours(1);
                continue;
            }
            if !bit(self.minutes, t.minute()) {
                t += ChronoDuration::minutes(1);
                continue;
            }
            return Ok(t.and_utc());
        }

        Err(no_occurrence())
    }

    /// Time to sleep from `now` until the next trigger, never less than one second.
    pub fn wait_duration(&self, now: DateTime<Utc>) -> Result<Duration, ScheduleError> {
        let next = self.next_after(now)?;
        let millis = (next - now).num_milliseconds().max(0) as u64;
        Ok(Duration::from_secs(millis.div_ceil(1000).max(1)))
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = bit(self.days_of_month, date.day());
        let dow = bit(self.days_of_week, date.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for CronSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Next trigger instant for `cron_expr` strictly after `now`.
pub fn next_run(cron_expr: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
    CronSchedule::parse(cron_expr)?.next_after(now)
}

/// Whole seconds to wait until the next trigger, at least 1.
pub fn wait_seconds(cron_expr: &str, now: DateTime<Utc>) -> Result<u64, ScheduleError> {
    Ok(CronSchedule::parse(cron_expr)?.wait_duration(now)?.as_secs())
}

fn bit(set: u64, value: u32) -> bool {
    set & (1u64 << value) != 0
}

fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(chrono::NaiveTime::MIN)
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).map(start_of_day)
}

fn parse_field(spec: &FieldSpec, text: &str) -> Result<u64, ScheduleError> {
    let mut set = 0u64;
    for item in text.split(',') {
        if item.is_empty() {
            return Err(ScheduleError::EmptyItem { field: spec.name });
        }

        let (base, step) = match item.split_once('/') {
            Some((base, step)) => {
                let step: u32 = step.parse().map_err(|_| ScheduleError::InvalidValue {
                    field: spec.name,
                    value: item.to_string(),
                })?;
                if step == 0 {
                    return Err(ScheduleError::ZeroStep { field: spec.name });
                }
                (base, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if base == "*" {
            (spec.min, spec.max)
        } else if let Some((lo, hi)) = base.split_once('-') {
            let lo = parse_value(spec, lo)?;
            let hi = parse_value(spec, hi)?;
            if lo > hi {
                return Err(ScheduleError::ReversedRange { field: spec.name, start: lo, end: hi });
            }
            (lo, hi)
        } else {
            let value = parse_value(spec, base)?;
            // `a/n` runs from a to the end of the field
            if step.is_some() {
                (value, spec.max)
            } else {
                (value, value)
            }
        };

        let step = step.unwrap_or(1) as usize;
        for value in (start..=end).step_by(step) {
            set |= 1u64 << value;
        }
    }
    Ok(set)
}

fn parse_value(spec: &FieldSpec, text: &str) -> Result<u32, ScheduleError> {
    let invalid = || ScheduleError::InvalidValue {
        field: spec.name,
        value: text.to_string(),
    };

    if text.is_empty() {
        return Err(invalid());
    }

    let value = match text.parse::<u32>() {
        Ok(value) => value,
        Err(_) => {
            let lower = text.to_ascii_lowercase();
            let index = spec.names.iter().position(|n| *n == lower).ok_or_else(invalid)?;
            spec.min + index as u32
        }
    };

    if value < spec.min || value > spec.max {
        return Err(ScheduleError::OutOfRange {
            field: spec.name,
            value,
            min: spec.min,
            max: spec.max,
        });
    }
    Ok(value)
}
