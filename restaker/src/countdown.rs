//! Countdown text parsing
//!
//! The dashboard renders the time left until the next reward cycle as
//! free-form text such as `"2 days, 3 hrs, 12 mins"`. This module turns that
//! text into a whole number of seconds.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::RestakeError;

const CLAUSE_SEPARATOR: &str = ", ";

/// Remaining time until the next reward cycle, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Countdown(u64);

impl Countdown {
    pub const ZERO: Countdown = Countdown(0);

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// Seconds contributed by one unit token, or `None` for units the dashboard
/// is not known to render.
fn seconds_per_unit(unit: &str) -> Option<u64> {
    match unit {
        "day" | "days" => Some(24 * 60 * 60),
        "hr" | "hrs" => Some(60 * 60),
        "min" | "mins" => Some(60),
        _ => None,
    }
}

/// Parse countdown text into a [`Countdown`].
///
/// An empty string means the cycle is due now and parses to zero. Every
/// clause must be exactly `<value> <unit>`; clauses whose unit is not
/// recognised contribute nothing, so `"5 weeks"` parses to zero.
pub fn parse_countdown(text: &str) -> Result<Countdown, RestakeError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Countdown::ZERO);
    }

    let mut total: u64 = 0;
    for clause in text.split(CLAUSE_SEPARATOR) {
        let tokens: Vec<&str> = clause.split(' ').collect();
        let [value, unit] = tokens.as_slice() else {
            return Err(RestakeError::MalformedInput(format!(
                "expected '<value> <unit>' but got {clause:?} in {text:?}"
            )));
        };

        let Some(factor) = seconds_per_unit(unit) else {
            tracing::debug!(clause, "Ignoring countdown clause with unknown unit");
            continue;
        };

        let value: u64 = value.parse().map_err(|_| {
            RestakeError::MalformedInput(format!("{value:?} is not a whole number in {text:?}"))
        })?;

        total = value
            .checked_mul(factor)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| RestakeError::MalformedInput(format!("{text:?} overflows")))?;
    }

    Ok(Countdown(total))
}
