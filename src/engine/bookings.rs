use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::calendar::now_ms;
use crate::limits::*;
use crate::model::*;
use crate::store::StoreError;

use super::{reservable_bounds, Engine, EngineError};

impl Engine {
    /// Booking-creation flow: boundary checks, slot reservation, then the
    /// booking document. If the booking write fails the slot is released.
    pub async fn create_booking(&self, req: NewBooking) -> Result<Booking, EngineError> {
        reservable_bounds(&req.span)?;
        let now = now_ms();
        if req.span.start <= now {
            return Err(EngineError::InThePast(req.span.start));
        }
        if !req.status.is_active() {
            return Err(EngineError::Invalid(format!("new bookings cannot start as {}", req.status)));
        }
        if !req.total_price.is_finite() || req.total_price < 0.0 {
            return Err(EngineError::Invalid("total price must be a non-negative number".into()));
        }
        let resource = self.get_resource(req.resource_id).await?;
        if req.guest_count == 0 {
            return Err(EngineError::Invalid("a booking needs at least one guest".into()));
        }
        if req.guest_count > resource.capacity {
            return Err(EngineError::OverCapacity {
                guests: req.guest_count,
                capacity: resource.capacity,
            });
        }

        let id = Ulid::new();
        let report = self.reserve(req.resource_id, req.span, id).await?;
        if !report.is_available {
            metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => "rejected").increment(1);
            return Err(EngineError::NotAvailable(report.conflicts));
        }

        let booking = Booking {
            id,
            resource_id: req.resource_id,
            user_id: req.user_id,
            span: req.span,
            guest_count: req.guest_count,
            status: req.status,
            total_price: req.total_price,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let booking = match self.store.put_booking(booking, None).await {
            Ok(booking) => booking,
            Err(e) => {
                error!("persisting booking {id} failed, releasing its slot: {e}");
                if let Err(release_err) = self.release_time_slot(req.resource_id, req.span, id).await {
                    error!("releasing slot of unpersisted booking {id} failed: {release_err}");
                }
                return Err(e.into());
            }
        };

        info!(
            "booking {id} created on {} for [{}, {}) ({} guests, {})",
            booking.resource_id, booking.span.start, booking.span.end, booking.guest_count, booking.status
        );
        metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => "created").increment(1);
        Ok(booking)
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.store.get_booking(id).await?.ok_or(EngineError::NotFound(id))
    }

    pub async fn bookings_for_resource(&self, resource_id: Ulid, window: Span) -> Result<Vec<Booking>, EngineError> {
        if window.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        Ok(self.store.bookings_for_resource(resource_id, window).await?)
    }

    /// Move a booking along `pending → confirmed → completed`, or cancel it
    /// from pending/confirmed. Cancelling releases the reserved slot.
    ///
    /// The status write is conditional on the version read, so of two
    /// concurrent changes from the same state only one lands; the other
    /// re-reads and is judged against the new status.
    pub async fn update_booking_status(&self, id: Ulid, status: BookingStatus) -> Result<Booking, EngineError> {
        for attempt in 0..MAX_RESERVE_RETRIES {
            let current = self.get_booking(id).await?;
            if !current.status.can_transition_to(status) {
                return Err(EngineError::InvalidTransition {
                    from: current.status,
                    to: status,
                });
            }

            let from = current.status;
            let expected = current.version;
            let next = Booking {
                status,
                updated_at: now_ms(),
                ..current
            };
            let written = match self.store.put_booking(next, Some(expected)).await {
                Ok(written) => written,
                Err(StoreError::VersionMismatch { .. }) => {
                    debug!("status change of booking {id} raced a concurrent write (attempt {attempt}), retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            info!("booking {id}: {from} -> {status}");

            if status == BookingStatus::Cancelled {
                match self.release_time_slot(written.resource_id, written.span, id).await {
                    Ok(true) => {}
                    Ok(false) => warn!("booking {id} cancelled but no reserved slot was found to release"),
                    Err(e) => error!("booking {id} cancelled but releasing its slot failed, reconcile its day: {e}"),
                }
            }
            return Ok(written);
        }
        Err(EngineError::Contention(id))
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.update_booking_status(id, BookingStatus::Cancelled).await
    }
}
