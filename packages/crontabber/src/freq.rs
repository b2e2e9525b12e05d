//! Run-frequency and time-of-day parsing.
//!
//! Frequencies are written `N<unit>` where the unit is one of `s`, `m`,
//! `h`, `d` or `w`. Time-of-day is 24-hour `HH:MM` and only makes sense
//! for jobs that run at most once a day.

use std::fmt;
use std::str::FromStr;

use crate::error::CronError;

pub const SECONDS_PER_DAY: u64 = 60 * 60 * 24;

/// Parse a frequency such as `12h` into seconds.
pub fn parse_frequency(input: &str) -> Result<u64, CronError> {
    let input = input.trim();
    let bad = || CronError::FrequencyDefinition(input.to_string());

    let (number, unit) = match input.char_indices().last() {
        Some((idx, unit)) if unit.is_ascii_alphabetic() => (&input[..idx], unit),
        _ => return Err(bad()),
    };
    let n: u64 = number.parse().map_err(|_| bad())?;
    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => SECONDS_PER_DAY,
        'w' => SECONDS_PER_DAY * 7,
        _ => return Err(bad()),
    };
    Ok(n * multiplier)
}

/// A fixed daily slot, e.g. `03:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl FromStr for TimeOfDay {
    type Err = CronError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let bad = || CronError::TimeDefinition(value.to_string());
        let (h, m) = value.split_once(':').ok_or_else(bad)?;
        let hour: u32 = h.trim().parse().map_err(|_| bad())?;
        let minute: u32 = m.trim().parse().map_err(|_| bad())?;
        if hour > 23 || minute > 59 {
            return Err(bad());
        }
        Ok(Self { hour, minute })
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// A fixed time-of-day requires a daily-or-slower frequency.
pub fn validate_schedule(
    frequency_seconds: u64,
    time_of_day: Option<TimeOfDay>,
) -> Result<(), CronError> {
    match time_of_day {
        Some(slot) if frequency_seconds < SECONDS_PER_DAY => {
            Err(CronError::FrequencyDefinition(slot.to_string()))
        }
        _ => Ok(()),
    }
}
