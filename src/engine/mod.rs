mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod slots;
mod store;

pub use conflict::find_conflict;
pub use error::{EngineError, ErrorKind, ValidationError};
pub use slots::{
    compute_end_time, end_time, enumerate_slots, is_within_working_hours, parse_time, WorkingHours,
};
pub use mutations::DEFAULT_ROOMS;
pub use store::{BookingStore, RoomState, SharedRoomState};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard};
use tracing::{info, warn};

use crate::model::*;
use crate::settings::SettingsStore;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// wait for one append, drain whatever else is queued, fsync once, then
/// answer every sender with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        // Compaction must see every append that was queued before it.
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so stray bytes don't leak into the
    // next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

/// The booking engine for one school: room catalog, bookings, settings and
/// the WAL that makes them durable.
pub struct Engine {
    pub(super) store: BookingStore,
    pub settings: Arc<SettingsStore>,
    pub(super) hours: WorkingHours,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Serializes room and setting writes against each other and against
    /// compaction. Booking writes use the per-room locks instead.
    pub(super) catalog: Mutex<()>,
}

impl Engine {
    /// Open the WAL at `wal_path`, replay it into fresh state and start the
    /// writer task. Must be called inside a tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        settings: Arc<SettingsStore>,
        hours: WorkingHours,
    ) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.truncated {
            warn!(
                "{}: discarded damaged WAL tail after {} events",
                wal_path.display(),
                replay.events.len()
            );
            Wal::truncate(&wal_path, replay.valid_len)?;
        }
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: BookingStore::new(),
            settings,
            hours,
            wal_tx,
            catalog: Mutex::new(()),
        };

        // Sole owner of every room lock during replay, so try_write never
        // contends. blocking_write would panic inside an async context.
        for event in &replay.events {
            match event {
                Event::RoomCreated { id, name, equipment } => {
                    engine.store.insert_room(Room {
                        id: *id,
                        name: name.clone(),
                        equipment: equipment.clone(),
                    });
                }
                Event::SettingChanged { key, value } => {
                    engine.settings.set(*key, value.clone());
                }
                Event::BookingCreated { booking } => {
                    engine.apply_replayed(booking.room_id, event);
                }
                Event::BookingStatusChanged { room_id, .. } => {
                    engine.apply_replayed(*room_id, event);
                }
            }
        }
        if !replay.events.is_empty() {
            info!(
                "{}: replayed {} events ({} rooms)",
                wal_path.display(),
                replay.events.len(),
                engine.store.room_count()
            );
        }

        Ok(engine)
    }

    fn apply_replayed(&self, room_id: RoomId, event: &Event) {
        let Some(rs) = self.store.get_room(&room_id) else {
            warn!("replay: event for unknown room {room_id} skipped");
            return;
        };
        match rs.try_write() {
            Ok(mut guard) => self.store.apply_event(&mut guard, event),
            Err(_) => warn!("replay: room {room_id} unexpectedly locked"),
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append then apply, with the room's write lock already held.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(rs, event);
        Ok(())
    }

    /// Lookup booking → room and day, acquire the room's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &BookingId,
    ) -> Result<(RoomId, NaiveDate, OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let (room_id, date) = self
            .store
            .locate_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.write_owned().await;
        Ok((room_id, date, guard))
    }

    pub fn get_room_state(&self, id: &RoomId) -> Option<SharedRoomState> {
        self.store.get_room(id)
    }
}
