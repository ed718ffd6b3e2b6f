use chrono::NaiveDate;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::calendar::{self, now_ms};
use crate::limits::*;
use crate::model::*;
use crate::store::StoreError;

use super::reservation::reserve_slot;
use super::{Engine, EngineError};

/// The owner's slots with stale reservations stripped. Slots that never
/// held a booking are kept untouched, closures included. Reserved
/// single-use slots are dropped; they get rebuilt.
fn offered_slots(slots: &[TimeSlot]) -> Vec<TimeSlot> {
    slots
        .iter()
        .filter(|s| s.booking_ids.is_empty() || s.max_bookings > 1 || s.price.is_some())
        .cloned()
        .map(|mut s| {
            if !s.booking_ids.is_empty() {
                s.booking_ids.clear();
                s.current_bookings = 0;
                s.notes = None;
                s.is_available = true;
            }
            s
        })
        .collect()
}

impl Engine {
    /// Rebuild the reservations of `date` from the active bookings that
    /// start on it, treating the booking documents as the source of truth.
    /// Returns the written day record, or `None` when there is nothing to
    /// record.
    pub async fn reconcile_day(&self, resource_id: Ulid, date: NaiveDate) -> Result<Option<DailyAvailability>, EngineError> {
        let window = calendar::day_span(date);
        let bookings: Vec<Booking> = self
            .store
            .bookings_for_resource(resource_id, window)
            .await?
            .into_iter()
            .filter(|b| b.status.is_active() && calendar::day_of(b.span.start) == date)
            .collect();

        for attempt in 0..MAX_RESERVE_RETRIES {
            let existing = self.store.get_day(resource_id, date).await?;
            if existing.is_none() && bookings.is_empty() {
                return Ok(None);
            }

            let mut slots = existing.as_ref().map(|d| offered_slots(&d.time_slots)).unwrap_or_default();
            let mut total = 0u32;
            for b in &bookings {
                match calendar::slot_bounds(&b.span) {
                    Some((start, end, minutes)) => {
                        reserve_slot(&mut slots, &start, &end, minutes, b.id);
                        total += 1;
                    }
                    None => warn!("booking {} has a span that cannot be a slot, skipped", b.id),
                }
            }

            let written = match &existing {
                None => {
                    let mut record = DailyAvailability::new(resource_id, date, self.default_hours.clone(), now_ms());
                    record.time_slots = slots;
                    record.total_bookings = total;
                    self.store.create_day(record).await
                }
                Some(day) => {
                    let patch = DayPatch {
                        time_slots: Some(slots),
                        total_bookings: Some(total),
                        ..Default::default()
                    };
                    self.store.update_day(day.id, patch, Some(day.version)).await
                }
            };

            match written {
                Ok(day) => {
                    let before = existing.map_or(0, |d| d.total_bookings);
                    if before != total {
                        warn!("reconciled {resource_id} on {date}: total bookings {before} -> {total}");
                    } else {
                        info!("reconciled {resource_id} on {date}: {total} bookings");
                    }
                    return Ok(Some(day));
                }
                Err(StoreError::VersionMismatch { .. } | StoreError::AlreadyExists { .. }) => {
                    debug!("reconcile of {resource_id} on {date} raced a concurrent write (attempt {attempt})");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Contention(resource_id))
    }
}
