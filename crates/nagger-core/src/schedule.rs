//! Reminder-time parsing and the "is it this chat's minute?" check.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use regex::Regex;

use crate::error::NaggerError;

pub const DEFAULT_REMINDER_TIME: &str = "09:00";
pub const DEFAULT_TIMEZONE: &str = "UTC";

fn reminder_time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2}):(\d{2})$").expect("static regex"))
}

/// A validated 24-hour `HH:MM` wall-clock time, always zero-padded.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReminderTime(String);

impl ReminderTime {
    /// Accepts `H:MM` or `HH:MM` and canonicalises to `HH:MM`.
    pub fn parse(raw: &str) -> Result<Self, NaggerError> {
        let trimmed = raw.trim();
        let invalid = || NaggerError::InvalidReminderTime(trimmed.to_string());
        let caps = reminder_time_re().captures(trimmed).ok_or_else(invalid)?;
        let hour: u32 = caps[1].parse().map_err(|_| invalid())?;
        let minute: u32 = caps[2].parse().map_err(|_| invalid())?;
        if hour > 23 || minute > 59 {
            return Err(invalid());
        }
        Ok(ReminderTime(format!("{hour:02}:{minute:02}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ReminderTime {
    type Err = NaggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReminderTime::parse(s)
    }
}

impl fmt::Display for ReminderTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, NaggerError> {
    let trimmed = name.trim();
    trimmed
        .parse::<Tz>()
        .map_err(|_| NaggerError::InvalidTimezone(trimmed.to_string()))
}

/// Wall-clock `HH:MM` of `now` in `tz`.
pub fn local_hhmm(now: DateTime<Utc>, tz: Tz) -> String {
    now.with_timezone(&tz).format("%H:%M").to_string()
}

/// Exact-minute match. A minute the process was not running for is never
/// fired later.
pub fn is_due(reminder_time: &str, tz: Tz, now: DateTime<Utc>) -> bool {
    local_hhmm(now, tz) == reminder_time
}

/// Process-wide fallback used for chats that never ran `/setreminder`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReminderDefaults {
    pub reminder_time: ReminderTime,
    pub timezone: Tz,
}

impl ReminderDefaults {
    pub fn new(reminder_time: &str, timezone: &str) -> Result<Self, NaggerError> {
        Ok(ReminderDefaults {
            reminder_time: ReminderTime::parse(reminder_time)?,
            timezone: parse_timezone(timezone)?,
        })
    }
}

impl Default for ReminderDefaults {
    fn default() -> Self {
        ReminderDefaults {
            reminder_time: ReminderTime(DEFAULT_REMINDER_TIME.to_string()),
            timezone: Tz::UTC,
        }
    }
}
