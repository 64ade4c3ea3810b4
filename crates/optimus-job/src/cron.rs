//! Cron schedule evaluation.
//!
//! Job intervals are standard 5-field cron expressions
//! (`minute hour day-of-month month day-of-week`) or one of the descriptor
//! aliases (`@hourly`, `@daily`, `@weekly`, `@monthly`, `@yearly`). Time zone
//! is fixed to UTC.
//!
//! [`CronSchedule::next_after`] is guaranteed strict (`> t`, never `>= t`);
//! the replay planner's interval arithmetic depends on it when a parent and
//! a child share the same cron.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{Error, Result};

/// A parsed cron schedule evaluated in UTC.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    schedule: Schedule,
    expression: String,
}

impl CronSchedule {
    /// Parses a 5-field cron expression or a descriptor alias.
    ///
    /// Descriptors expand to their conventional 5-field forms before
    /// parsing; 5-field expressions are normalized to the 6-field syntax the
    /// underlying parser expects by prepending a seconds column.
    ///
    /// # Errors
    /// Returns [`Error::CronParse`] for unknown descriptors, wrong field
    /// counts, or unparseable fields.
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        let five_field = match trimmed {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            "@yearly" | "@annually" => "0 0 1 1 *",
            other if other.starts_with('@') => {
                return Err(Error::CronParse {
                    expression: expression.to_string(),
                    message: "unknown descriptor".to_string(),
                });
            }
            other => other,
        };

        let normalized = match five_field.split_whitespace().count() {
            5 => format!("0 {five_field}"),
            _ => {
                return Err(Error::CronParse {
                    expression: expression.to_string(),
                    message: "expected 5 fields".to_string(),
                });
            }
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| Error::CronParse {
            expression: expression.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            schedule,
            expression: expression.to_string(),
        })
    }

    /// Returns the original expression this schedule was parsed from.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Returns the least firing instant strictly after `t`.
    ///
    /// The underlying iterator is wrapped so the contract holds even if a
    /// library version yields the boundary instant itself.
    ///
    /// # Errors
    /// Returns [`Error::CronExhausted`] if the schedule has no firing after
    /// `t` (only reachable near the end of the representable time range).
    pub fn next_after(&self, t: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.schedule
            .after(&t)
            .find(|fire| *fire > t)
            .ok_or(Error::CronExhausted {
                expression: self.expression.clone(),
                after: t,
            })
    }
}
