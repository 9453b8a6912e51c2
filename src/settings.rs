use dashmap::DashMap;

use crate::engine::{EngineError, ValidationError};
use crate::limits::*;
use crate::model::{Minutes, SettingKey};

pub const DEFAULT_SESSION_DURATION: Minutes = 40;
pub const DEFAULT_BOOKING_CUTOFF: Minutes = 40;
pub const DEFAULT_LAB_STATUS: &str = "Available";

/// Process-wide key/value settings. Reads are never cached by callers: a
/// change is visible to the very next read.
#[derive(Debug, Default)]
pub struct SettingsStore {
    values: DashMap<SettingKey, String>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: SettingKey) -> Option<String> {
        self.values.get(&key).map(|v| v.value().clone())
    }

    /// Raw write. No validation; see [`validate_setting`].
    pub fn set(&self, key: SettingKey, value: String) {
        self.values.insert(key, value);
    }

    pub fn contains(&self, key: SettingKey) -> bool {
        self.values.contains_key(&key)
    }

    /// Session length in minutes. Absent or malformed values fall back to
    /// [`DEFAULT_SESSION_DURATION`].
    pub fn session_duration(&self) -> Minutes {
        self.get(SettingKey::SessionDuration)
            .and_then(|v| parse_duration(&v).ok())
            .unwrap_or(DEFAULT_SESSION_DURATION)
    }

    pub fn booking_cutoff_minutes(&self) -> Minutes {
        self.get(SettingKey::BookingCutoffMinutes)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_BOOKING_CUTOFF)
    }

    pub fn lab_status(&self) -> String {
        self.get(SettingKey::LabStatus)
            .unwrap_or_else(|| DEFAULT_LAB_STATUS.to_string())
    }

    /// Every key with its effective value, in key order.
    pub fn effective(&self) -> Vec<(SettingKey, String)> {
        SettingKey::ALL
            .into_iter()
            .map(|key| {
                let value = match key {
                    SettingKey::SessionDuration => self.session_duration().to_string(),
                    SettingKey::LabStatus => self.lab_status(),
                    SettingKey::BookingCutoffMinutes => self.booking_cutoff_minutes().to_string(),
                };
                (key, value)
            })
            .collect()
    }

    /// Stored (raw) entries, in key order.
    pub fn stored(&self) -> Vec<(SettingKey, String)> {
        let mut entries: Vec<_> = self
            .values
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_by_key(|(k, _)| *k);
        entries
    }
}

/// Default values written when a school is first set up.
pub fn default_settings() -> [(SettingKey, String); 3] {
    [
        (SettingKey::SessionDuration, DEFAULT_SESSION_DURATION.to_string()),
        (SettingKey::LabStatus, DEFAULT_LAB_STATUS.to_string()),
        (SettingKey::BookingCutoffMinutes, DEFAULT_BOOKING_CUTOFF.to_string()),
    ]
}

/// Positive whole minutes, at most one day.
pub fn parse_duration(value: &str) -> Result<Minutes, ValidationError> {
    match value.trim().parse::<Minutes>() {
        Ok(d) if d > 0 && d <= MAX_SESSION_DURATION => Ok(d),
        _ => Err(ValidationError::InvalidDuration(value.to_string())),
    }
}

/// Reject values that would be unusable once stored.
pub fn validate_setting(key: SettingKey, value: &str) -> Result<(), EngineError> {
    if value.len() > MAX_SETTING_VALUE_LEN {
        return Err(EngineError::LimitExceeded("setting value too long"));
    }
    let invalid = || ValidationError::InvalidSetting {
        key,
        value: value.to_string(),
    };
    match key {
        SettingKey::SessionDuration => {
            parse_duration(value).map_err(|_| invalid())?;
        }
        SettingKey::BookingCutoffMinutes => {
            value.trim().parse::<Minutes>().map_err(|_| invalid())?;
        }
        SettingKey::LabStatus => {
            if value.trim().is_empty() {
                return Err(invalid().into());
            }
        }
    }
    Ok(())
}
