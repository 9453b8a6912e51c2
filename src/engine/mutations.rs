use tokio::sync::oneshot;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::settings::{default_settings, validate_setting};

use super::{Engine, EngineError, ValidationError, WalCommand};

/// Room catalog every new school starts with.
pub const DEFAULT_ROOMS: [(&str, &str); 3] = [
    ("SMART Lab 1", "Interactive Whiteboard, Projector, 30 PCs"),
    ("SMART Lab 2", "Projector, 25 Laptops"),
    (
        "Meeting Room A",
        "Interactive Display, Video Conferencing Equipment",
    ),
];

impl Engine {
    pub async fn create_room(
        &self,
        id: RoomId,
        name: String,
        equipment: String,
    ) -> Result<Room, EngineError> {
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyRoomName.into());
        }
        if name.len() > MAX_ROOM_NAME_LEN {
            return Err(EngineError::LimitExceeded("room name too long"));
        }
        if equipment.len() > MAX_EQUIPMENT_LEN {
            return Err(EngineError::LimitExceeded("equipment description too long"));
        }

        let _catalog = self.catalog.lock().await;
        if self.store.room_count() >= MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.store.contains_room(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if !self.store.reserve_room_name(&name, id) {
            return Err(EngineError::DuplicateRoomName(name));
        }

        let event = Event::RoomCreated {
            id,
            name: name.clone(),
            equipment: equipment.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            self.store.release_room_name(&name);
            return Err(e);
        }
        let room = Room {
            id,
            name,
            equipment,
        };
        self.store.insert_room(room.clone());
        info!("room {} created: {}", room.id, room.name);
        Ok(room)
    }

    /// Validate, persist and publish a setting. Visible to the next read.
    pub async fn update_setting(&self, key: SettingKey, value: String) -> Result<(), EngineError> {
        validate_setting(key, &value)?;
        let _catalog = self.catalog.lock().await;
        let event = Event::SettingChanged {
            key,
            value: value.clone(),
        };
        self.wal_append(&event).await?;
        self.settings.set(key, value);
        info!("setting {key} updated");
        Ok(())
    }

    /// Insert the default rooms and settings that are not there yet. Safe to
    /// run on every start.
    pub async fn seed_defaults(&self) -> Result<(), EngineError> {
        for (key, value) in default_settings() {
            if !self.settings.contains(key) {
                self.update_setting(key, value).await?;
            }
        }
        for (name, equipment) in DEFAULT_ROOMS {
            match self
                .create_room(Ulid::new(), name.to_string(), equipment.to_string())
                .await
            {
                Ok(_) | Err(EngineError::DuplicateRoomName(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state: rooms, stored settings, then every booking
    /// with its current status.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Catalog lock and room read guards stay held until the swap so no
        // write can land in the old file after the snapshot.
        let _catalog = self.catalog.lock().await;
        let mut guards = Vec::new();
        for rs in self.store.room_states() {
            guards.push(rs.read_owned().await);
        }
        guards.sort_by_key(|g| g.room.id);

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::RoomCreated {
                id: guard.room.id,
                name: guard.room.name.clone(),
                equipment: guard.room.equipment.clone(),
            });
        }
        for (key, value) in self.settings.stored() {
            events.push(Event::SettingChanged { key, value });
        }
        for guard in &guards {
            events.extend(guard.bookings().map(|b| Event::BookingCreated {
                booking: b.clone(),
            }));
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
