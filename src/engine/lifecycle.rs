use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::check_no_conflict;
use super::slots::end_time;
use super::{Engine, EngineError, ValidationError};

// ── Status table ─────────────────────────────────────────────────

impl BookingStatus {
    /// Validate an administrative status change.
    ///
    /// Approve and deny are administrative corrections and may flip either
    /// way, even when approving re-activates a denied booking over a live one.
    /// Any live status may be cancelled and re-applying the current status is
    /// a no-op. `Cancelled` is final and nothing returns to `Pending`.
    pub fn transition_to(self, to: BookingStatus) -> Result<BookingStatus, ValidationError> {
        use BookingStatus::*;
        match (self, to) {
            (from, to) if from == to => Ok(to),
            (Pending | Denied, Approved)
            | (Pending | Approved, Denied)
            | (Pending | Approved | Denied, Cancelled) => Ok(to),
            (from, to) => Err(ValidationError::InvalidTransition { from, to }),
        }
    }
}

impl Engine {
    /// Create a pending booking. The end time is fixed here from the session
    /// duration in effect now; later setting changes do not touch it.
    pub async fn create_booking(&self, req: NewBooking) -> Result<Booking, EngineError> {
        if req.equipment.len() > MAX_EQUIPMENT_LEN {
            return Err(EngineError::LimitExceeded("equipment note too long"));
        }
        let duration = self.settings.session_duration();
        let end = end_time(req.start, duration)?;
        if !self.hours.contains(req.start) {
            return Err(ValidationError::OutsideWorkingHours(req.start).into());
        }

        let rs = self
            .store
            .get_room(&req.room_id)
            .ok_or(EngineError::NotFound(req.room_id))?;
        // Held across check + WAL append + apply: no other request on this
        // room can see the slot free in between.
        let mut guard = rs.write().await;
        if guard.booking_count() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }

        let span = Span::new(req.start, end);
        if let Err(e) = check_no_conflict(&guard, req.date, &span) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let booking = Booking {
            id: Ulid::new(),
            room_id: req.room_id,
            requester_id: req.requester_id,
            date: req.date,
            span,
            equipment: req.equipment,
            status: BookingStatus::Pending,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        debug!(
            "booking {} created: room {} on {} {}-{}",
            booking.id, booking.room_id, booking.date, booking.span.start, booking.span.end
        );
        Ok(booking)
    }

    /// Administrative status change. Does not re-check conflicts: approving
    /// an overlapping booking is a trusted override.
    pub async fn set_booking_status(
        &self,
        id: BookingId,
        status: BookingStatus,
    ) -> Result<(), EngineError> {
        if status == BookingStatus::Pending {
            return Err(ValidationError::InvalidStatus(status.to_string()).into());
        }
        let (room_id, date, mut guard) = self.resolve_booking_write(&id).await?;
        let current = guard.get(date, id).ok_or(EngineError::NotFound(id))?.status;

        let next = current.transition_to(status)?;
        if next == current {
            return Ok(());
        }

        let event = Event::BookingStatusChanged {
            id,
            room_id,
            status: next,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::STATUS_CHANGES_TOTAL, "status" => next.as_str())
            .increment(1);
        debug!("booking {id}: {current} -> {next}");
        Ok(())
    }

    /// Cancel on behalf of `requester`. Ownership is not checked here.
    pub async fn cancel_booking(
        &self,
        id: BookingId,
        requester: Option<RequesterId>,
    ) -> Result<(), EngineError> {
        self.set_booking_status(id, BookingStatus::Cancelled).await?;
        match requester {
            Some(r) => debug!("booking {id} cancelled by {r}"),
            None => debug!("booking {id} cancelled"),
        }
        Ok(())
    }
}
