use chrono::NaiveDate;

use crate::model::*;

use super::store::RoomState;
use super::{Engine, EngineError};

/// First active booking on `date` overlapping `span`, if any.
pub fn find_conflict(rs: &RoomState, date: NaiveDate, span: &Span) -> Option<BookingId> {
    rs.overlapping(date, span)
        .find(|b| b.status.is_active() && b.span.overlaps(span))
        .map(|b| b.id)
}

pub(crate) fn check_no_conflict(rs: &RoomState, date: NaiveDate, span: &Span) -> Result<(), EngineError> {
    match find_conflict(rs, date, span) {
        Some(id) => Err(EngineError::Conflict(id)),
        None => Ok(()),
    }
}

impl Engine {
    /// Whether `[start, end)` on `date` is free in the room. A start outside
    /// working hours or an empty interval is never available.
    pub async fn is_available(
        &self,
        room_id: RoomId,
        date: NaiveDate,
        start: ClockTime,
        end: ClockTime,
    ) -> Result<bool, EngineError> {
        let rs = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        if !self.hours.contains(start) || start >= end {
            return Ok(false);
        }
        let guard = rs.read().await;
        Ok(find_conflict(&guard, date, &Span::new(start, end)).is_none())
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

    fn room_with(bookings: &[(&str, &str, BookingStatus)]) -> RoomState {
        let room = Room {
            id: Ulid::new(),
            name: "Meeting Room A".into(),
            equipment: String::new(),
        };
        let mut rs = RoomState::new(room.clone());
        for (start, end, status) in bookings {
            rs.insert_booking(Booking {
                id: Ulid::new(),
                room_id: room.id,
                requester_id: Ulid::new(),
                date: day(),
                span: Span::new(t(start), t(end)),
                equipment: String::new(),
                status: *status,
            });
        }
        rs
    }

    #[test]
    fn empty_day_is_free() {
        let rs = room_with(&[]);
        assert!(find_conflict(&rs, day(), &Span::new(t("08:00"), t("08:40"))).is_none());
    }

    #[test]
    fn touching_is_free() {
        let rs = room_with(&[("08:00", "08:40", BookingStatus::Pending)]);
        assert!(check_no_conflict(&rs, day(), &Span::new(t("08:40"), t("09:20"))).is_ok());
        assert!(check_no_conflict(&rs, day(), &Span::new(t("07:20"), t("08:00"))).is_ok());
    }

    #[test]
    fn partial_overlap_conflicts() {
        let rs = room_with(&[("08:00", "08:40", BookingStatus::Approved)]);
        let err = check_no_conflict(&rs, day(), &Span::new(t("08:20"), t("09:00")));
        assert!(matches!(err, Err(EngineError::Conflict(_))));
    }

    #[test]
    fn containing_interval_conflicts() {
        let rs = room_with(&[("09:00", "09:10", BookingStatus::Pending)]);
        assert!(find_conflict(&rs, day(), &Span::new(t("08:00"), t("12:00"))).is_some());
    }

    #[test]
    fn denied_and_cancelled_never_conflict() {
        let rs = room_with(&[
            ("08:00", "08:40", BookingStatus::Denied),
            ("08:00", "08:40", BookingStatus::Cancelled),
        ]);
        assert!(find_conflict(&rs, day(), &Span::new(t("08:00"), t("08:40"))).is_none());
    }

    #[test]
    fn other_dates_ignored() {
        let rs = room_with(&[("08:00", "08:40", BookingStatus::Approved)]);
        let next = day().succ_opt().unwrap();
        assert!(find_conflict(&rs, next, &Span::new(t("08:00"), t("08:40"))).is_none());
    }
}
