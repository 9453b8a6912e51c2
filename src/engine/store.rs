use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;

use crate::model::*;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

/// One room and every booking ever made for it.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Bookings per day, each day sorted by `span.start`.
    pub days: BTreeMap<NaiveDate, Vec<Booking>>,
    booking_count: usize,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            days: BTreeMap::new(),
            booking_count: 0,
        }
    }

    pub fn booking_count(&self) -> usize {
        self.booking_count
    }

    /// Insert maintaining sort order by start within the day.
    pub fn insert_booking(&mut self, booking: Booking) {
        let day = self.days.entry(booking.date).or_default();
        let pos = day
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        day.insert(pos, booking);
        self.booking_count += 1;
    }

    pub fn get(&self, date: NaiveDate, id: BookingId) -> Option<&Booking> {
        self.days.get(&date)?.iter().find(|b| b.id == id)
    }

    /// Overwrite a booking's status. Returns the number of bookings touched.
    pub fn update_status(&mut self, date: NaiveDate, id: BookingId, status: BookingStatus) -> usize {
        match self
            .days
            .get_mut(&date)
            .and_then(|day| day.iter_mut().find(|b| b.id == id))
        {
            Some(b) => {
                b.status = status;
                1
            }
            None => 0,
        }
    }

    /// Pending and approved bookings on `date`, by start.
    pub fn active_on(&self, date: NaiveDate) -> impl Iterator<Item = &Booking> {
        self.days
            .get(&date)
            .into_iter()
            .flatten()
            .filter(|b| b.status.is_active())
    }

    /// Bookings on `date` (any status) whose span overlaps `query`.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, date: NaiveDate, query: &Span) -> impl Iterator<Item = &Booking> {
        let day = self.days.get(&date).map(Vec::as_slice).unwrap_or(&[]);
        let right_bound = day.partition_point(|b| b.span.start < query.end);
        day[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    pub fn bookings(&self) -> impl Iterator<Item = &Booking> {
        self.days.values().flatten()
    }
}

/// In-memory booking repository: rooms, a booking → room/day index and the
/// room-name uniqueness index.
pub struct BookingStore {
    rooms: DashMap<RoomId, SharedRoomState>,
    booking_index: DashMap<BookingId, (RoomId, NaiveDate)>,
    room_names: DashMap<String, RoomId>,
}

impl Default for BookingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            booking_index: DashMap::new(),
            room_names: DashMap::new(),
        }
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn contains_room(&self, id: &RoomId) -> bool {
        self.rooms.contains_key(id)
    }

    pub fn get_room(&self, id: &RoomId) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn insert_room(&self, room: Room) {
        self.room_names.insert(room.name.clone(), room.id);
        self.rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room))));
    }

    pub fn room_states(&self) -> Vec<SharedRoomState> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    /// Atomically claim a room name. `false` if it is taken.
    pub fn reserve_room_name(&self, name: &str, id: RoomId) -> bool {
        match self.room_names.entry(name.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(id);
                true
            }
        }
    }

    pub fn release_room_name(&self, name: &str) {
        self.room_names.remove(name);
    }

    // ── Booking index ────────────────────────────────────────

    pub fn locate_booking(&self, id: &BookingId) -> Option<(RoomId, NaiveDate)> {
        self.booking_index.get(id).map(|e| *e.value())
    }

    // ── Event application ────────────────────────────────────

    /// Apply a booking event to its room. Caller holds the room's write lock.
    pub fn apply_event(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::BookingCreated { booking } => {
                self.booking_index
                    .insert(booking.id, (booking.room_id, booking.date));
                rs.insert_booking(booking.clone());
            }
            Event::BookingStatusChanged { id, status, .. } => {
                if let Some((_, date)) = self.locate_booking(id) {
                    rs.update_status(date, *id, *status);
                }
            }
            // Rooms and settings are applied outside any room lock.
            Event::RoomCreated { .. } | Event::SettingChanged { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn t(s: &str) -> ClockTime {
        s.parse().unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    fn room() -> Room {
        Room {
            id: Ulid::new(),
            name: "SMART Lab 1".into(),
            equipment: String::new(),
        }
    }

    fn booking(room_id: RoomId, start: &str, end: &str, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            room_id,
            requester_id: Ulid::new(),
            date: day(),
            span: Span::new(t(start), t(end)),
            equipment: String::new(),
            status,
        }
    }

    #[test]
    fn bookings_sorted_within_day() {
        let r = room();
        let mut rs = RoomState::new(r.clone());
        rs.insert_booking(booking(r.id, "10:00", "10:40", BookingStatus::Pending));
        rs.insert_booking(booking(r.id, "08:00", "08:40", BookingStatus::Pending));
        rs.insert_booking(booking(r.id, "09:00", "09:40", BookingStatus::Pending));
        let starts: Vec<_> = rs.bookings().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![t("08:00"), t("09:00"), t("10:00")]);
        assert_eq!(rs.booking_count(), 3);
    }

    #[test]
    fn active_on_skips_terminal_and_other_days() {
        let r = room();
        let mut rs = RoomState::new(r.clone());
        rs.insert_booking(booking(r.id, "08:00", "08:40", BookingStatus::Approved));
        rs.insert_booking(booking(r.id, "09:00", "09:40", BookingStatus::Denied));
        rs.insert_booking(booking(r.id, "10:00", "10:40", BookingStatus::Cancelled));
        let mut other_day = booking(r.id, "11:00", "11:40", BookingStatus::Pending);
        other_day.date = day().succ_opt().unwrap();
        rs.insert_booking(other_day);

        let active: Vec<_> = rs.active_on(day()).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].status, BookingStatus::Approved);
        assert_eq!(rs.active_on(day().pred_opt().unwrap()).count(), 0);
    }

    #[test]
    fn overlapping_is_half_open() {
        let r = room();
        let mut rs = RoomState::new(r.clone());
        rs.insert_booking(booking(r.id, "08:00", "08:40", BookingStatus::Pending));
        rs.insert_booking(booking(r.id, "10:00", "10:40", BookingStatus::Pending));

        let touching = Span::new(t("08:40"), t("09:20"));
        assert_eq!(rs.overlapping(day(), &touching).count(), 0);

        let inside = Span::new(t("08:20"), t("09:00"));
        assert_eq!(rs.overlapping(day(), &inside).count(), 1);

        let covering = Span::new(t("07:00"), t("12:00"));
        assert_eq!(rs.overlapping(day(), &covering).count(), 2);
    }

    #[test]
    fn update_status_reports_affected() {
        let r = room();
        let mut rs = RoomState::new(r.clone());
        let b = booking(r.id, "08:00", "08:40", BookingStatus::Pending);
        let id = b.id;
        rs.insert_booking(b);
        assert_eq!(rs.update_status(day(), id, BookingStatus::Approved), 1);
        assert_eq!(rs.get(day(), id).unwrap().status, BookingStatus::Approved);
        assert_eq!(rs.update_status(day(), Ulid::new(), BookingStatus::Denied), 0);
    }

    #[test]
    fn room_name_reservation() {
        let store = BookingStore::new();
        let r = room();
        assert!(store.reserve_room_name(&r.name, r.id));
        assert!(!store.reserve_room_name(&r.name, Ulid::new()));
        store.release_room_name(&r.name);
        assert!(store.reserve_room_name(&r.name, r.id));
    }

    #[test]
    fn apply_event_indexes_bookings() {
        let store = BookingStore::new();
        let r = room();
        store.insert_room(r.clone());
        let mut rs = RoomState::new(r.clone());
        let b = booking(r.id, "08:00", "08:40", BookingStatus::Pending);
        let id = b.id;
        store.apply_event(&mut rs, &Event::BookingCreated { booking: b });
        assert_eq!(store.locate_booking(&id), Some((r.id, day())));

        store.apply_event(
            &mut rs,
            &Event::BookingStatusChanged {
                id,
                room_id: r.id,
                status: BookingStatus::Cancelled,
            },
        );
        assert_eq!(rs.get(day(), id).unwrap().status, BookingStatus::Cancelled);
    }
}
