use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Timelike, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("Hour {0} is outside 0..=23")]
    InvalidHour(u32),

    #[error("Window start {start}:00 is after window end {end}:00")]
    Inverted { start: u32, end: u32 },

    #[error("UTC offset {0}h is outside -12..=14")]
    InvalidOffset(i32),
}

/// How an invocation was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Fired by the hourly scheduler
    Scheduled,
    /// Started by an operator; ignores the window
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Scheduled => write!(f, "scheduled"),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

/// Outcome of gating one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum TriggerDecision {
    /// Inside the active window
    Run { local_time: NaiveTime },
    /// Outside the window, but started manually
    Override { local_time: NaiveTime },
    /// Outside the window; nothing may be fetched, mutated or published
    Skip { local_time: NaiveTime },
}

impl TriggerDecision {
    pub fn should_run(&self) -> bool {
        !matches!(self, TriggerDecision::Skip { .. })
    }

    pub fn local_time(&self) -> NaiveTime {
        match *self {
            TriggerDecision::Run { local_time }
            | TriggerDecision::Override { local_time }
            | TriggerDecision::Skip { local_time } => local_time,
        }
    }
}

/// Daily active window expressed in a fixed-offset local time
///
/// Both boundary hours are inside the window: with `06..=21` a cycle fires at
/// exactly 06:00 and at exactly 21:00, but not at 21:01.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    start_hour: u32,
    end_hour: u32,
    offset: FixedOffset,
}

impl ActiveWindow {
    pub fn new(start_hour: u32, end_hour: u32, utc_offset_hours: i32) -> Result<Self, WindowError> {
        for hour in [start_hour, end_hour] {
            if hour > 23 {
                return Err(WindowError::InvalidHour(hour));
            }
        }
        if start_hour > end_hour {
            return Err(WindowError::Inverted { start: start_hour, end: end_hour });
        }
        if !(-12..=14).contains(&utc_offset_hours) {
            return Err(WindowError::InvalidOffset(utc_offset_hours));
        }
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
            .ok_or(WindowError::InvalidOffset(utc_offset_hours))?;

        Ok(Self { start_hour, end_hour, offset })
    }

    pub fn start_hour(&self) -> u32 {
        self.start_hour
    }

    pub fn end_hour(&self) -> u32 {
        self.end_hour
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Local wall-clock time of `instant`
    pub fn local_time(&self, instant: DateTime<Utc>) -> NaiveTime {
        instant.with_timezone(&self.offset).time()
    }

    /// Local calendar date of `instant`
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// Whether `instant` falls in `[start_hour:00, end_hour:00]` local time, at minute resolution
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        let local = self.local_time(instant);
        let minute_of_day = local.hour() * 60 + local.minute();
        (self.start_hour * 60..=self.end_hour * 60).contains(&minute_of_day)
    }

    pub fn decide(&self, instant: DateTime<Utc>, trigger: Trigger) -> TriggerDecision {
        let local_time = self.local_time(instant);
        match (self.contains(instant), trigger) {
            (true, _) => TriggerDecision::Run { local_time },
            (false, Trigger::Manual) => TriggerDecision::Override { local_time },
            (false, Trigger::Scheduled) => TriggerDecision::Skip { local_time },
        }
    }

    /// UTC hours at which an on-the-hour firing lands inside the window
    pub fn utc_hours(&self) -> Vec<u32> {
        let offset_hours = self.offset.local_minus_utc() / 3600;
        (0..24u32)
            .filter(|utc_hour| {
                let local = (*utc_hour as i32 + offset_hours).rem_euclid(24) as u32;
                (self.start_hour..=self.end_hour).contains(&local)
            })
            .collect()
    }

    /// Cron expression for an external scheduler whose clock runs in UTC
    pub fn cron_expression(&self) -> String {
        let hours = self.utc_hours();
        let mut ranges: Vec<String> = Vec::new();
        let mut iter = hours.iter().copied().peekable();

        while let Some(first) = iter.next() {
            let mut last = first;
            while iter.peek() == Some(&(last + 1)) {
                last += 1;
                iter.next();
            }
            ranges.push(if first == last { first.to_string() } else { format!("{first}-{last}") });
        }

        // Emit the range that wraps past midnight first, matching local order
        if ranges.len() > 1 && hours.first() == Some(&0) && hours.last() == Some(&23) {
            ranges.rotate_right(1);
        }

        format!("0 {} * * *", ranges.join(","))
    }
}

impl fmt::Display for ActiveWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:00-{:02}:00 (UTC{})", self.start_hour, self.end_hour, self.offset)
    }
}
