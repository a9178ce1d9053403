//! Kubernetes CronJob schedules
//!
//! CronJobs use the classic five-field syntax (minute hour day-of-month month
//! day-of-week, Sunday = 0 or 7). The `cron` crate expects seconds and year
//! fields and numbers weekdays from Sunday = 1, so expressions are translated
//! before computing fire times. Weekdays are rewritten as explicit names.
//!
//! When both day-of-month and day-of-week are restricted, a CronJob fires on
//! days matching either field while the `cron` crate requires both. Such
//! schedules are split into one alternative per day field.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{Error, Result};

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

fn schedule_error(schedule: &str, reason: impl Into<String>) -> Error {
    Error::Schedule {
        schedule: schedule.to_string(),
        reason: reason.into(),
    }
}

/// Translate a five-field CronJob schedule into a seven-field `cron` expression
pub fn to_cron_expression(schedule: &str) -> Result<String> {
    let fields: Vec<&str> = schedule.split_whitespace().collect();

    match fields.as_slice() {
        [macro_] if macro_.starts_with('@') => match macro_.to_ascii_lowercase().as_str() {
            "@yearly" | "@annually" => Ok("0 0 0 1 1 * *".to_string()),
            "@monthly" => Ok("0 0 0 1 * * *".to_string()),
            "@weekly" => Ok("0 0 0 * * Sun *".to_string()),
            "@daily" | "@midnight" => Ok("0 0 0 * * * *".to_string()),
            "@hourly" => Ok("0 0 * * * * *".to_string()),
            other => Err(schedule_error(schedule, format!("unsupported macro {}", other))),
        },
        [minute, hour, day_of_month, month, day_of_week] => {
            five_field_expression(schedule, [*minute, *hour, *day_of_month, *month, *day_of_week])
        }
        _ => Err(schedule_error(
            schedule,
            format!("expected 5 fields, found {}", fields.len()),
        )),
    }
}

/// Expressions whose union fires exactly when the CronJob does
pub fn to_cron_expressions(schedule: &str) -> Result<Vec<String>> {
    let fields: Vec<&str> = schedule.split_whitespace().collect();

    match fields.as_slice() {
        [minute, hour, day_of_month, month, day_of_week]
            if is_restricted(day_of_month) && is_restricted(day_of_week) =>
        {
            Ok(vec![
                five_field_expression(schedule, [*minute, *hour, *day_of_month, *month, "*"])?,
                five_field_expression(schedule, [*minute, *hour, "*", *month, *day_of_week])?,
            ])
        }
        _ => Ok(vec![to_cron_expression(schedule)?]),
    }
}

/// A parsed CronJob schedule
#[derive(Clone, Debug)]
pub struct CronSchedule {
    alternatives: Vec<Schedule>,
}

impl CronSchedule {
    /// First fire time strictly after `after`
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.alternatives
            .iter()
            .filter_map(|s| s.after(after).next())
            .min()
    }
}

/// Parse a five-field CronJob schedule
pub fn parse(schedule: &str) -> Result<CronSchedule> {
    let alternatives = to_cron_expressions(schedule)?
        .iter()
        .map(|expression| {
            Schedule::from_str(expression).map_err(|e| schedule_error(schedule, e.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(CronSchedule { alternatives })
}

/// First fire time strictly after `after`, evaluated in UTC
pub fn next_fire_time(schedule: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    parse(schedule)?
        .next_after(&after)
        .ok_or_else(|| schedule_error(schedule, "schedule never fires"))
}

fn five_field_expression(schedule: &str, fields: [&str; 5]) -> Result<String> {
    let [minute, hour, day_of_month, month, day_of_week] = fields;
    let day_of_week =
        translate_day_of_week(day_of_week).map_err(|reason| schedule_error(schedule, reason))?;
    Ok(format!(
        "0 {} {} {} {} {} *",
        minute, hour, day_of_month, month, day_of_week
    ))
}

// Only a bare wildcard leaves a day field unrestricted; "*/2" is a restriction.
fn is_restricted(field: &str) -> bool {
    !matches!(field, "*" | "?" | "*/1")
}

fn translate_day_of_week(field: &str) -> std::result::Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        expand_day_item(item, &mut days)?;
    }

    if days.len() == DAY_NAMES.len() {
        return Ok("*".to_string());
    }
    Ok(days
        .into_iter()
        .map(|d| DAY_NAMES[d])
        .collect::<Vec<_>>()
        .join(","))
}

fn expand_day_item(item: &str, days: &mut BTreeSet<usize>) -> std::result::Result<(), String> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => {
            let step = step
                .parse::<usize>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| format!("invalid day-of-week step '{}'", step))?;
            (range, step)
        }
        None => (item, 1),
    };

    let (start, end) = match range {
        "*" | "?" => (0, 6),
        _ => match range.split_once('-') {
            Some((start, end)) => (parse_day(start)?, parse_day(end)?),
            None => {
                let day = parse_day(range)?;
                // "N/step" runs from N to the end of the week
                if item.contains('/') {
                    (day, 6)
                } else {
                    (day, day)
                }
            }
        },
    };

    // 7 is Sunday again, so "5-7" wraps to Sunday through the modulo below.
    if start > end {
        return Err(format!("invalid day-of-week range '{}'", range));
    }
    for day in (start..=end).step_by(step) {
        days.insert(day % 7);
    }
    Ok(())
}

fn parse_day(value: &str) -> std::result::Result<usize, String> {
    if let Ok(n) = value.parse::<usize>() {
        return if n <= 7 {
            Ok(n)
        } else {
            Err(format!("day-of-week {} out of range", n))
        };
    }
    DAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(value))
        .ok_or_else(|| format!("unknown day-of-week '{}'", value))
}
