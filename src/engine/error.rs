use ulid::Ulid;

use crate::model::{BookingStatus, ClockTime, SettingKey};

/// Broad category of an [`EngineError`], used by callers to decide how to
/// report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Limit,
    Internal,
}

#[derive(Debug)]
pub enum EngineError {
    Validation(ValidationError),
    /// Overlaps the given active booking.
    Conflict(Ulid),
    NotFound(Ulid),
    UnknownSetting(String),
    AlreadyExists(Ulid),
    DuplicateRoomName(String),
    LimitExceeded(&'static str),
    WalError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidTimeFormat(String),
    InvalidDate(String),
    InvalidDuration(String),
    EndPastMidnight { start: ClockTime, duration: u32 },
    OutsideWorkingHours(ClockTime),
    InvalidSetting { key: SettingKey, value: String },
    InvalidStatus(String),
    InvalidTransition { from: BookingStatus, to: BookingStatus },
    EmptyRoomName,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::NotFound(_) | EngineError::UnknownSetting(_) => ErrorKind::NotFound,
            EngineError::AlreadyExists(_) | EngineError::DuplicateRoomName(_) => {
                ErrorKind::Conflict
            }
            EngineError::LimitExceeded(_) => ErrorKind::Limit,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(e) => write!(f, "invalid request: {e}"),
            EngineError::Conflict(id) => write!(f, "conflict with booking: {id}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::UnknownSetting(key) => write!(f, "unknown setting: {key}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::DuplicateRoomName(name) => {
                write!(f, "room name already in use: {name}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidTimeFormat(s) => {
                write!(f, "invalid time {s:?}, expected HH:MM")
            }
            ValidationError::InvalidDate(s) => write!(f, "invalid date {s:?}, expected YYYY-MM-DD"),
            ValidationError::InvalidDuration(s) => write!(f, "invalid session duration: {s}"),
            ValidationError::EndPastMidnight { start, duration } => {
                write!(f, "session of {duration} minutes starting at {start} ends after midnight")
            }
            ValidationError::OutsideWorkingHours(t) => {
                write!(f, "start time {t} is outside working hours")
            }
            ValidationError::InvalidSetting { key, value } => {
                write!(f, "invalid value {value:?} for setting {key}")
            }
            ValidationError::InvalidStatus(s) => write!(f, "invalid booking status: {s}"),
            ValidationError::InvalidTransition { from, to } => {
                write!(f, "cannot change booking status from {from} to {to}")
            }
            ValidationError::EmptyRoomName => f.write_str("room name must not be empty"),
        }
    }
}

impl std::error::Error for EngineError {}
impl std::error::Error for ValidationError {}
