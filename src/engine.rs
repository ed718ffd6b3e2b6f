mod blocked;
mod bookings;
mod conflicts;
mod error;
mod free_slots;
mod reconcile;
mod reservation;
mod resolver;

pub use error::EngineError;
pub use free_slots::{chop, merge_overlapping, subtract_intervals};
pub use resolver::{evaluate, Occupancy};

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::warn;
use ulid::Ulid;

use crate::calendar::{self, now_ms};
use crate::limits::*;
use crate::model::*;
use crate::store::AvailabilityStore;

/// Reservation core: conflict resolution, slot bookkeeping and the booking
/// flow on top of an injected document store.
pub struct Engine {
    store: Arc<dyn AvailabilityStore>,
    /// Used for lazily created day records.
    default_hours: WorkingHours,
}

impl Engine {
    pub fn new(store: Arc<dyn AvailabilityStore>, default_hours: WorkingHours) -> Self {
        Self { store, default_hours }
    }

    pub fn store(&self) -> &Arc<dyn AvailabilityStore> {
        &self.store
    }

    pub fn default_hours(&self) -> &WorkingHours {
        &self.default_hours
    }

    pub async fn create_resource(&self, owner_id: Ulid, name: String, capacity: u32) -> Result<Resource, EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }
        if capacity == 0 || capacity > MAX_GUESTS {
            return Err(EngineError::Invalid(format!("capacity {capacity} out of range")));
        }
        let resource = Resource {
            id: Ulid::new(),
            owner_id,
            name,
            capacity,
            created_at: now_ms(),
        };
        self.store.put_resource(resource.clone()).await?;
        tracing::info!("created resource {} (capacity {capacity})", resource.id);
        Ok(resource)
    }

    pub async fn get_resource(&self, id: Ulid) -> Result<Resource, EngineError> {
        self.store.get_resource(id).await?.ok_or(EngineError::NotFound(id))
    }

    /// Day records in `[from, to]`. A failing read yields an empty list.
    pub async fn get_days(
        &self,
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyAvailability>, EngineError> {
        if (to - from).num_days() > MAX_QUERY_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        Ok(self.load_days_lenient(resource_id, from, to).await)
    }

    /// Owner-side insert of a day record: day off, opening hours, offered
    /// slots, exceptions, day cap. Reservation bookkeeping starts empty.
    pub async fn create_day(&self, resource_id: Ulid, date: NaiveDate, patch: DayPatch) -> Result<DailyAvailability, EngineError> {
        if patch.total_bookings.is_some_and(|n| n > 0) {
            return Err(EngineError::Invalid("a new day record cannot carry bookings".into()));
        }
        if let Some(slots) = &patch.time_slots
            && slots.iter().any(|s| !s.booking_ids.is_empty() || s.current_bookings > 0)
        {
            return Err(EngineError::Invalid("offered slots cannot carry reservations".into()));
        }
        let mut record = DailyAvailability::new(resource_id, date, self.default_hours.clone(), now_ms());
        patch.apply(&mut record);
        let created = self.store.create_day(record).await?;
        tracing::info!("created availability of {resource_id} on {date}");
        Ok(created)
    }

    /// Owner-side patch of a day record, conditional on `expected_version`
    /// when given.
    pub async fn update_day(&self, id: Ulid, patch: DayPatch, expected_version: Option<u64>) -> Result<DailyAvailability, EngineError> {
        let updated = self.store.update_day(id, patch, expected_version).await?;
        tracing::info!(
            "updated availability of {} on {} (version {})",
            updated.resource_id,
            updated.date,
            updated.version
        );
        Ok(updated)
    }

    async fn load_days_lenient(&self, resource_id: Ulid, from: NaiveDate, to: NaiveDate) -> Vec<DailyAvailability> {
        match self.store.get_days(resource_id, from, to).await {
            Ok(days) => days,
            Err(e) => {
                warn!("reading availability of {resource_id} for {from}..={to} failed: {e}");
                metrics::counter!(crate::observability::STORE_READ_FAILURES_TOTAL).increment(1);
                Vec::new()
            }
        }
    }

    /// Day record for `date`, or `None` when absent or unreadable.
    pub(super) async fn load_day_lenient(&self, resource_id: Ulid, date: NaiveDate) -> Option<DailyAvailability> {
        match self.store.get_day(resource_id, date).await {
            Ok(day) => day,
            Err(e) => {
                warn!("reading availability of {resource_id} on {date} failed, treating as absent: {e}");
                metrics::counter!(crate::observability::STORE_READ_FAILURES_TOTAL).increment(1);
                None
            }
        }
    }

    /// Blocked times overlapping `window`, or none when unreadable.
    pub(super) async fn load_blocked_lenient(&self, resource_id: Ulid, window: Span) -> Vec<BlockedTime> {
        match self.store.blocked_times_overlapping(resource_id, window).await {
            Ok(blocked) => blocked,
            Err(e) => {
                warn!("reading blocked times of {resource_id} failed, treating as none: {e}");
                metrics::counter!(crate::observability::STORE_READ_FAILURES_TOTAL).increment(1);
                Vec::new()
            }
        }
    }

    /// Booking documents overlapping `window`, or none when unreadable.
    pub(super) async fn load_bookings_lenient(&self, resource_id: Ulid, window: Span) -> Vec<Booking> {
        match self.store.bookings_for_resource(resource_id, window).await {
            Ok(bookings) => bookings,
            Err(e) => {
                warn!("reading bookings of {resource_id} failed, treating as none: {e}");
                metrics::counter!(crate::observability::STORE_READ_FAILURES_TOTAL).increment(1);
                Vec::new()
            }
        }
    }
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.start > span.end {
        return Err(EngineError::InvalidSpan(*span));
    }
    if span.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Validates a span that will become a reserved slot: positive, minute
/// aligned, at most one day long.
pub(crate) fn reservable_bounds(span: &Span) -> Result<(String, String, u32), EngineError> {
    validate_span(span)?;
    calendar::slot_bounds(span).ok_or(EngineError::InvalidSpan(*span))
}
