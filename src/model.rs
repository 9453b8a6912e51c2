use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type RoomId = Ulid;
pub type BookingId = Ulid;
pub type RequesterId = Ulid;

/// Minutes since midnight.
pub type Minutes = u32;

pub const MINUTES_PER_DAY: Minutes = 24 * 60;

/// A wall-clock time of day with minute resolution, `00:00..=23:59`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Minutes", into = "Minutes")]
pub struct ClockTime(Minutes);

impl ClockTime {
    pub const fn from_minutes(minutes: Minutes) -> Option<Self> {
        if minutes < MINUTES_PER_DAY {
            Some(Self(minutes))
        } else {
            None
        }
    }

    /// Panics on out-of-range input. Only for constants.
    pub const fn hm(hour: u32, minute: u32) -> Self {
        assert!(hour < 24 && minute < 60);
        Self(hour * 60 + minute)
    }

    pub fn minutes(self) -> Minutes {
        self.0
    }

    pub fn hour(self) -> u32 {
        self.0 / 60
    }

    pub fn minute(self) -> u32 {
        self.0 % 60
    }

    /// `None` when the result would not fit in the same day.
    pub fn checked_add(self, minutes: Minutes) -> Option<Self> {
        self.0.checked_add(minutes).and_then(Self::from_minutes)
    }
}

impl TryFrom<Minutes> for ClockTime {
    type Error = String;

    fn try_from(minutes: Minutes) -> Result<Self, Self::Error> {
        Self::from_minutes(minutes).ok_or_else(|| format!("time of day out of range: {minutes}"))
    }
}

impl From<ClockTime> for Minutes {
    fn from(t: ClockTime) -> Self {
        t.0
    }
}

impl FromStr for ClockTime {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = NaiveTime::parse_from_str(s.trim(), "%H:%M")?;
        Ok(Self(t.hour() * 60 + t.minute()))
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSpan")]
pub struct Span {
    pub start: ClockTime,
    pub end: ClockTime,
}

#[derive(Deserialize)]
struct RawSpan {
    start: ClockTime,
    end: ClockTime,
}

impl TryFrom<RawSpan> for Span {
    type Error = String;

    fn try_from(raw: RawSpan) -> Result<Self, Self::Error> {
        if raw.start < raw.end {
            Ok(Self {
                start: raw.start,
                end: raw.end,
            })
        } else {
            Err(format!("empty span {}-{}", raw.start, raw.end))
        }
    }
}

impl Span {
    pub fn new(start: ClockTime, end: ClockTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> Minutes {
        self.end.minutes() - self.start.minutes()
    }

    /// Touching spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Booking status. `Pending` and `Approved` bookings hold their slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Approved,
    Denied,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 4] = [
        BookingStatus::Pending,
        BookingStatus::Approved,
        BookingStatus::Denied,
        BookingStatus::Cancelled,
    ];

    /// Counts toward conflict detection.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Approved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "Pending",
            BookingStatus::Approved => "Approved",
            BookingStatus::Denied => "Denied",
            BookingStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub equipment: String,
}

/// A stored booking. `span.end` is the end computed at creation time and is
/// never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub room_id: RoomId,
    pub requester_id: RequesterId,
    pub date: NaiveDate,
    pub span: Span,
    pub equipment: String,
    pub status: BookingStatus,
}

/// Input for a booking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub room_id: RoomId,
    pub requester_id: RequesterId,
    pub date: NaiveDate,
    pub start: ClockTime,
    pub equipment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SettingKey {
    SessionDuration,
    LabStatus,
    BookingCutoffMinutes,
}

impl SettingKey {
    pub const ALL: [SettingKey; 3] = [
        SettingKey::SessionDuration,
        SettingKey::LabStatus,
        SettingKey::BookingCutoffMinutes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::SessionDuration => "session_duration",
            SettingKey::LabStatus => "lab_status",
            SettingKey::BookingCutoffMinutes => "booking_cutoff_minutes",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SettingKey::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| s.to_string())
    }
}

/// One WAL record. Replaying them in order rebuilds a school.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: RoomId,
        name: String,
        equipment: String,
    },
    SettingChanged {
        key: SettingKey,
        value: String,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: BookingId,
        room_id: RoomId,
        status: BookingStatus,
    },
}

// ── Query types ──────────────────────────────────────────────────

/// One entry of the slot grid offered to requesters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub span: Span,
    pub label: String,
}

/// All fields optional; `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub id: Option<BookingId>,
    pub room_id: Option<RoomId>,
    pub date: Option<NaiveDate>,
    pub requester_id: Option<RequesterId>,
    pub status: Option<BookingStatus>,
}

impl BookingFilter {
    pub fn matches(&self, b: &Booking) -> bool {
        self.id.is_none_or(|id| b.id == id)
            && self.room_id.is_none_or(|r| b.room_id == r)
            && self.date.is_none_or(|d| b.date == d)
            && self.requester_id.is_none_or(|r| b.requester_id == r)
            && self.status.is_none_or(|s| b.status == s)
    }
}
