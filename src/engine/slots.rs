use crate::model::*;

use super::{Engine, EngineError, ValidationError};

// ── Slot arithmetic ───────────────────────────────────────────────

/// The daily window bookings must start in: `open <= start < close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingHours {
    pub open: ClockTime,
    pub close: ClockTime,
}

impl WorkingHours {
    pub fn new(open: ClockTime, close: ClockTime) -> Result<Self, ValidationError> {
        if open >= close {
            return Err(ValidationError::InvalidTimeFormat(format!(
                "working hours {open}-{close}: open must precede close"
            )));
        }
        Ok(Self { open, close })
    }

    pub fn contains(&self, start: ClockTime) -> bool {
        self.open <= start && start < self.close
    }
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self {
            open: ClockTime::hm(8, 0),
            close: ClockTime::hm(17, 0),
        }
    }
}

pub fn parse_time(s: &str) -> Result<ClockTime, ValidationError> {
    s.parse()
        .map_err(|_| ValidationError::InvalidTimeFormat(s.to_string()))
}

/// `start + duration`. The result may lie past the working-hour close; only
/// [`enumerate_slots`] trims to the window.
pub fn end_time(start: ClockTime, duration: Minutes) -> Result<ClockTime, ValidationError> {
    if duration == 0 {
        return Err(ValidationError::InvalidDuration("0".into()));
    }
    start
        .checked_add(duration)
        .ok_or(ValidationError::EndPastMidnight { start, duration })
}

/// Parse an `HH:MM` start and add `duration` minutes.
pub fn compute_end_time(start: &str, duration: Minutes) -> Result<ClockTime, ValidationError> {
    end_time(parse_time(start)?, duration)
}

pub fn is_within_working_hours(hours: &WorkingHours, start: ClockTime) -> bool {
    hours.contains(start)
}

/// Every whole slot of `duration` minutes from `open`, back to back. A slot
/// that would end after `close` is dropped, not truncated.
pub fn enumerate_slots(hours: &WorkingHours, duration: Minutes) -> Vec<Slot> {
    let mut slots = Vec::new();
    if duration == 0 {
        return slots;
    }
    let mut start = hours.open;
    while let Some(end) = start.checked_add(duration) {
        if end > hours.close {
            break;
        }
        slots.push(Slot {
            span: Span::new(start, end),
            label: format!("{start} - {end}"),
        });
        start = end;
    }
    slots
}

impl Engine {
    /// The grid for the duration currently configured.
    pub fn current_slots(&self) -> Vec<Slot> {
        enumerate_slots(&self.hours, self.settings.session_duration())
    }

    /// End time for `start` using the duration currently configured.
    pub fn current_end_time(&self, start: ClockTime) -> Result<ClockTime, EngineError> {
        Ok(end_time(start, self.settings.session_duration())?)
    }

    pub fn working_hours(&self) -> WorkingHours {
        self.hours
    }
}
