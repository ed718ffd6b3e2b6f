use tracing::{debug, info};
use ulid::Ulid;

use crate::calendar::{self, now_ms};
use crate::limits::*;
use crate::model::*;
use crate::store::StoreError;

use super::resolver::evaluate;
use super::{reservable_bounds, Engine, EngineError};

/// Reserve `booking_id` into `slots`: reuse an open slot with identical
/// bounds, otherwise append a fresh single-booking slot.
pub(super) fn reserve_slot(slots: &mut Vec<TimeSlot>, start_time: &str, end_time: &str, duration_minutes: u32, booking_id: Ulid) {
    let wanted = calendar::minute_bounds(start_time, end_time);
    let reusable = slots
        .iter_mut()
        .find(|s| s.is_open() && wanted.is_some() && calendar::minute_bounds(&s.start_time, &s.end_time) == wanted);
    if let Some(slot) = reusable {
        slot.current_bookings += 1;
        slot.booking_ids.push(booking_id);
        if slot.current_bookings >= slot.max_bookings {
            slot.is_available = false;
        }
        return;
    }
    slots.push(TimeSlot {
        id: Ulid::new(),
        start_time: start_time.to_string(),
        end_time: end_time.to_string(),
        duration_minutes,
        is_available: false,
        max_bookings: 1,
        current_bookings: 1,
        price: None,
        notes: Some(format!("booking {booking_id}")),
        booking_ids: vec![booking_id],
    });
}

/// Undo a reservation of `booking_id` on the slot with the given bounds.
/// Returns false if no such slot holds the booking.
pub(super) fn release_slot(slots: &mut [TimeSlot], start_time: &str, end_time: &str, booking_id: Ulid) -> bool {
    let wanted = calendar::minute_bounds(start_time, end_time);
    let Some(slot) = slots.iter_mut().find(|s| {
        s.is_held_by(&booking_id) && wanted.is_some() && calendar::minute_bounds(&s.start_time, &s.end_time) == wanted
    }) else {
        return false;
    };
    slot.booking_ids.retain(|id| *id != booking_id);
    slot.current_bookings = slot.current_bookings.saturating_sub(1);
    if slot.current_bookings == 0 {
        slot.notes = None;
    }
    slot.is_available = true;
    true
}

impl Engine {
    /// Reserve `span` on `resource_id` for `booking_id`.
    ///
    /// Re-checks availability and writes the day record conditionally on the
    /// version it read, retrying when a concurrent writer got there first.
    /// Returns `Ok(false)` when the span is not available.
    pub async fn book_time_slot(&self, resource_id: Ulid, span: Span, booking_id: Ulid) -> Result<bool, EngineError> {
        Ok(self.reserve(resource_id, span, booking_id).await?.is_available)
    }

    /// `book_time_slot` returning the report the decision was made on. A
    /// rejection carries the conflicts seen by the attempt that gave up.
    pub(super) async fn reserve(&self, resource_id: Ulid, span: Span, booking_id: Ulid) -> Result<AvailabilityReport, EngineError> {
        let (start_time, end_time, minutes) = reservable_bounds(&span)?;
        let date = calendar::day_of(span.start);

        for attempt in 0..MAX_RESERVE_RETRIES {
            let occupancy = self.load_occupancy(resource_id, &span).await;
            let report = evaluate(&occupancy, &span, Some(booking_id));
            if !report.is_available {
                debug!(
                    "reservation of {booking_id} on {resource_id} rejected: {} conflicts",
                    report.conflicts.len()
                );
                metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => "rejected").increment(1);
                return Ok(report);
            }

            let written = match occupancy.day {
                None => {
                    let mut record = DailyAvailability::new(resource_id, date, self.default_hours.clone(), now_ms());
                    reserve_slot(&mut record.time_slots, &start_time, &end_time, minutes, booking_id);
                    record.total_bookings = 1;
                    self.store.create_day(record).await.map(|_| ())
                }
                Some(day) => {
                    let mut slots = day.time_slots.clone();
                    reserve_slot(&mut slots, &start_time, &end_time, minutes, booking_id);
                    let patch = DayPatch {
                        time_slots: Some(slots),
                        total_bookings: Some(day.total_bookings + 1),
                        ..Default::default()
                    };
                    self.store.update_day(day.id, patch, Some(day.version)).await.map(|_| ())
                }
            };

            match written {
                Ok(()) => {
                    info!("reserved {start_time}-{end_time} on {date} for booking {booking_id} (resource {resource_id})");
                    metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => "reserved").increment(1);
                    return Ok(report);
                }
                Err(StoreError::VersionMismatch { .. } | StoreError::AlreadyExists { .. }) => {
                    debug!("reservation of {booking_id} raced a concurrent write (attempt {attempt}), retrying");
                    metrics::counter!(crate::observability::RESERVATION_RETRIES_TOTAL).increment(1);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Contention(resource_id))
    }

    /// Release the reservation `booking_id` holds on `span`. Returns false
    /// if no matching reservation exists.
    pub async fn release_time_slot(&self, resource_id: Ulid, span: Span, booking_id: Ulid) -> Result<bool, EngineError> {
        let (start_time, end_time, _) = reservable_bounds(&span)?;
        let date = calendar::day_of(span.start);

        for attempt in 0..MAX_RESERVE_RETRIES {
            let Some(day) = self.store.get_day(resource_id, date).await? else {
                debug!("release of {booking_id}: no availability record for {resource_id} on {date}");
                return Ok(false);
            };
            let mut slots = day.time_slots.clone();
            if !release_slot(&mut slots, &start_time, &end_time, booking_id) {
                debug!("release of {booking_id}: no slot {start_time}-{end_time} holds it");
                return Ok(false);
            }
            let patch = DayPatch {
                time_slots: Some(slots),
                total_bookings: Some(day.total_bookings.saturating_sub(1)),
                ..Default::default()
            };
            match self.store.update_day(day.id, patch, Some(day.version)).await {
                Ok(_) => {
                    info!("released {start_time}-{end_time} on {date} for booking {booking_id} (resource {resource_id})");
                    metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => "released").increment(1);
                    return Ok(true);
                }
                Err(StoreError::VersionMismatch { .. }) => {
                    debug!("release of {booking_id} raced a concurrent write (attempt {attempt}), retrying");
                    metrics::counter!(crate::observability::RESERVATION_RETRIES_TOTAL).increment(1);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Contention(resource_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_slot(start: &str, end: &str, max: u32) -> TimeSlot {
        TimeSlot {
            id: Ulid::new(),
            start_time: start.into(),
            end_time: end.into(),
            duration_minutes: 60,
            is_available: true,
            max_bookings: max,
            current_bookings: 0,
            price: Some(120.0),
            notes: None,
            booking_ids: Vec::new(),
        }
    }

    #[test]
    fn reserve_appends_closed_slot() {
        let mut slots = Vec::new();
        let id = Ulid::new();
        reserve_slot(&mut slots, "09:00", "10:00", 60, id);
        assert_eq!(slots.len(), 1);
        let s = &slots[0];
        assert!(!s.is_available);
        assert_eq!((s.max_bookings, s.current_bookings), (1, 1));
        assert_eq!(s.booking_ids, vec![id]);
    }

    #[test]
    fn reserve_fills_matching_open_slot() {
        let mut slots = vec![open_slot("09:00", "10:00", 2)];
        reserve_slot(&mut slots, "09:00", "10:00", 60, Ulid::new());
        assert_eq!(slots.len(), 1);
        assert!(slots[0].is_available);
        reserve_slot(&mut slots, "09:00", "10:00", 60, Ulid::new());
        assert_eq!(slots[0].current_bookings, 2);
        assert!(!slots[0].is_available);
        assert_eq!(slots[0].price, Some(120.0));
    }

    #[test]
    fn release_requires_holder_and_bounds() {
        let mut slots = Vec::new();
        let id = Ulid::new();
        reserve_slot(&mut slots, "09:00", "10:00", 60, id);
        assert!(!release_slot(&mut slots, "09:00", "10:00", Ulid::new()));
        assert!(!release_slot(&mut slots, "09:00", "11:00", id));
        assert!(release_slot(&mut slots, "09:00", "10:00", id));
        let s = &slots[0];
        assert!(s.is_available);
        assert_eq!(s.current_bookings, 0);
        assert!(s.notes.is_none());
        assert!(s.booking_ids.is_empty());
        // Second release finds nothing
        assert!(!release_slot(&mut slots, "09:00", "10:00", id));
    }
}
