use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// All rooms, by name.
    pub async fn list_rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::with_capacity(self.store.room_count());
        for rs in self.store.room_states() {
            rooms.push(rs.read().await.room.clone());
        }
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }

    pub async fn get_room(&self, id: RoomId) -> Result<Room, EngineError> {
        let rs = self.store.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    pub async fn get_booking(&self, id: BookingId) -> Result<Booking, EngineError> {
        let (room_id, date) = self
            .store
            .locate_booking(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        guard.get(date, id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Bookings matching `filter`, ordered by date then start. An unknown
    /// room or booking id matches nothing.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        let rooms = match (filter.id, filter.room_id) {
            (Some(id), _) => self
                .store
                .locate_booking(&id)
                .and_then(|(room_id, _)| self.store.get_room(&room_id))
                .into_iter()
                .collect(),
            (None, Some(room_id)) => self.store.get_room(&room_id).into_iter().collect(),
            (None, None) => self.store.room_states(),
        };

        let mut out = Vec::new();
        for rs in rooms {
            let guard = rs.read().await;
            match filter.date {
                Some(date) => out.extend(
                    guard
                        .days
                        .get(&date)
                        .into_iter()
                        .flatten()
                        .filter(|b| filter.matches(b))
                        .cloned(),
                ),
                None => out.extend(guard.bookings().filter(|b| filter.matches(b)).cloned()),
            }
        }
        out.sort_by_key(|b| (b.date, b.span.start, b.room_id, b.id));
        out
    }

    /// Every setting with the value currently in effect.
    pub fn list_settings(&self) -> Vec<(SettingKey, String)> {
        self.settings.effective()
    }

    pub fn get_setting(&self, key: SettingKey) -> String {
        match key {
            SettingKey::SessionDuration => self.settings.session_duration().to_string(),
            SettingKey::LabStatus => self.settings.lab_status(),
            SettingKey::BookingCutoffMinutes => self.settings.booking_cutoff_minutes().to_string(),
        }
    }
}
