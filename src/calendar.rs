use std::sync::Arc;

use jiff::civil::{Date, DateTime, Time, Weekday};
use jiff::ToSpan;
use thiserror::Error;

use crate::logging::EventLog;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("invalid date {input:?}, expected YYYY-MM-DD")]
    InvalidDate { input: String },
    #[error("invalid range, start {start} is after end {end}")]
    InvalidRange { start: Date, end: Date },
}

/// How the dates of a run are chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateMode {
    Single(String),
    Range(String, String),
    /// The most recent published day, see [`DateResolver::last_weekday`].
    LastWeekday,
    /// Everything from the base date up to the last weekday.
    Auto,
}

pub fn is_weekday(date: Date) -> bool {
    !matches!(date.weekday(), Weekday::Saturday | Weekday::Sunday)
}

/// The closest weekday strictly before `date`.
pub fn last_weekday_before(date: Date) -> Date {
    let mut current = date - 1.day();
    while !is_weekday(current) {
        current = current - 1.day();
    }
    current
}

/// All weekdays in the closed interval [start, end], ascending.
pub fn weekdays(start: Date, end: Date) -> Vec<Date> {
    start
        .series(1.day())
        .take_while(|d| *d <= end)
        .filter(|d| is_weekday(*d))
        .collect()
}

fn parse_date(input: &str) -> Result<Date, ResolveError> {
    input
        .trim()
        .parse::<Date>()
        .map_err(|_| ResolveError::InvalidDate {
            input: input.to_string(),
        })
}

pub struct DateResolver {
    now: DateTime,
    base_date: Date,
    today_cutoff: Option<Time>,
    log: Arc<dyn EventLog>,
}

impl DateResolver {
    /// `now` is the local wall clock of the run.  With a `today_cutoff`, a run
    /// on a weekday at or after the cutoff treats today's archive as published.
    pub fn new(
        now: DateTime,
        base_date: Date,
        today_cutoff: Option<Time>,
        log: Arc<dyn EventLog>,
    ) -> Self {
        DateResolver {
            now,
            base_date,
            today_cutoff,
            log,
        }
    }

    pub fn last_weekday(&self) -> Date {
        let today = self.now.date();
        if let Some(cutoff) = self.today_cutoff {
            if is_weekday(today) && self.now.time() >= cutoff {
                return today;
            }
        }
        last_weekday_before(today)
    }

    pub fn resolve(&self, mode: &DateMode) -> Result<Vec<Date>, ResolveError> {
        match mode {
            DateMode::Single(input) => {
                let date = parse_date(input)?;
                if is_weekday(date) {
                    Ok(vec![date])
                } else {
                    self.log.warn(&format!(
                        "{} is a {:?}, no archive is published on weekends",
                        date,
                        date.weekday()
                    ));
                    Ok(vec![])
                }
            }
            DateMode::Range(start, end) => {
                let start = parse_date(start)?;
                let end = parse_date(end)?;
                if start > end {
                    return Err(ResolveError::InvalidRange { start, end });
                }
                Ok(weekdays(start, end))
            }
            DateMode::LastWeekday => Ok(vec![self.last_weekday()]),
            DateMode::Auto => {
                let last = self.last_weekday();
                if last < self.base_date {
                    self.log.info(&format!(
                        "nothing to download, last weekday {} is before base date {}",
                        last, self.base_date
                    ));
                    return Ok(vec![]);
                }
                self.log
                    .info(&format!("auto mode from {} to {}", self.base_date, last));
                Ok(weekdays(self.base_date, last))
            }
        }
    }

    /// Drop the dates whose archive can't be published yet.
    pub fn clamp_available(&self, dates: Vec<Date>) -> Vec<Date> {
        let last = self.last_weekday();
        dates
            .into_iter()
            .filter(|date| {
                if *date > last {
                    self.log.info(&format!(
                        "skipping {}, the last published day is {}",
                        date, last
                    ));
                    false
                } else {
                    true
                }
            })
            .collect()
    }
}
