//! Backup window evaluation
//!
//! A window is a size plus a unit, measured back from "now" (the timestamp
//! of the snapshot taken by the current run). The boundary is inclusive: a
//! snapshot exactly one window old is still inside.
//!
//! Months are calendar months: the window starts on the same day and time
//! of day N months earlier, clamped to the last day of that month when the
//! day does not exist (March 31 minus one month is February 28/29).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::BackupError;

/// Unit of a backup window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WindowUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

impl WindowUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
            Self::Weeks => "weeks",
            Self::Months => "months",
        }
    }
}

impl fmt::Display for WindowUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WindowUnit {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "minutes" => Ok(Self::Minutes),
            "hours" => Ok(Self::Hours),
            "days" => Ok(Self::Days),
            "weeks" => Ok(Self::Weeks),
            "months" => Ok(Self::Months),
            other => Err(BackupError::UnknownWindowUnit(other.to_string())),
        }
    }
}

/// Retention horizon relative to "now"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupWindow {
    pub size: u32,
    pub unit: WindowUnit,
}

impl Default for BackupWindow {
    fn default() -> Self {
        Self {
            size: 7,
            unit: WindowUnit::Days,
        }
    }
}

impl BackupWindow {
    pub fn new(size: u32, unit: WindowUnit) -> Self {
        Self { size, unit }
    }

    /// Earliest instant still inside the window
    ///
    /// Returns `None` when the window reaches back past the representable
    /// range, in which case nothing is outside of it.
    pub fn window_start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let size = i64::from(self.size);
        let span = match self.unit {
            WindowUnit::Months => return now.checked_sub_months(Months::new(self.size)),
            WindowUnit::Minutes => Duration::minutes(size),
            WindowUnit::Hours => Duration::hours(size),
            WindowUnit::Days => Duration::days(size),
            WindowUnit::Weeks => Duration::weeks(size),
        };
        now.checked_sub_signed(span)
    }

    /// Whether `candidate` falls outside the window ending at `now`
    pub fn is_outside(&self, now: DateTime<Utc>, candidate: DateTime<Utc>) -> bool {
        match self.window_start(now) {
            Some(start) => candidate < start,
            None => false,
        }
    }
}

impl fmt::Display for BackupWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.size, self.unit)
    }
}

/// Whether `candidate` falls outside `window` relative to `now`
pub fn is_outside_window(now: DateTime<Utc>, candidate: DateTime<Utc>, window: &BackupWindow) -> bool {
    window.is_outside(now, candidate)
}
