//! Calendar triggers: 5-field crontab expressions evaluated in an IANA
//! timezone.
//!
//! The `cron` crate wants a leading seconds field and numbers weekdays
//! 1-7 starting at Sunday, while crontab numbers them 0-7 with both 0 and 7
//! meaning Sunday. Numeric weekday fields are rewritten to day names so the
//! two never disagree.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::domain::ConfigError;

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

pub fn parse_timezone(name: &str) -> Result<Tz, ConfigError> {
    Tz::from_str(name).map_err(|_| ConfigError::InvalidTimezone {
        tz: name.to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct CronTrigger {
    expr: String,
    tz: Tz,
    schedule: Schedule,
}

impl CronTrigger {
    pub fn parse(expr: &str, timezone: &str) -> Result<Self, ConfigError> {
        let tz = parse_timezone(timezone)?;
        let translated = crontab_to_cron(expr)?;
        let schedule = Schedule::from_str(&translated).map_err(|e| ConfigError::InvalidCron {
            expr: expr.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            expr: expr.to_string(),
            tz,
            schedule,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// First firing strictly after `at`.
    pub fn next_after(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&at.with_timezone(&self.tz))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// `m h dom mon dow` to the `cron` crate's `s m h dom mon dow`.
pub fn crontab_to_cron(expr: &str) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidCron {
        expr: expr.to_string(),
        reason,
    };
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(invalid(format!(
            "expected 5 fields (minute hour day month weekday), got {}",
            fields.len()
        )));
    }
    let weekdays = translate_weekdays(fields[4]).map_err(invalid)?;
    Ok(format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], weekdays
    ))
}

fn translate_weekdays(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" || field.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(field.to_string());
    }

    let mut days = [false; 7];
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| format!("invalid weekday step in '{part}'"))?;
                if step == 0 {
                    return Err(format!("weekday step must be positive in '{part}'"));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" {
            (0, 6)
        } else if let Some((a, b)) = range.split_once('-') {
            (weekday_number(a)?, weekday_number(b)?)
        } else {
            let day = weekday_number(range)?;
            // `n/step` runs to the end of the week
            (day, if step.is_some() { 6 } else { day })
        };
        if lo > hi {
            return Err(format!("weekday range '{range}' runs backwards"));
        }
        for day in (lo..=hi).step_by(step.unwrap_or(1)) {
            days[day % 7] = true;
        }
    }

    let names: Vec<&str> = DAY_NAMES
        .iter()
        .zip(days)
        .filter_map(|(name, on)| on.then_some(*name))
        .collect();
    Ok(names.join(","))
}

fn weekday_number(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(n) if n <= 7 => Ok(n),
        _ => Err(format!("invalid weekday '{raw}'")),
    }
}
