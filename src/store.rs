mod memory;
mod wal;

pub use memory::MemoryStore;
pub use wal::Wal;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;

#[derive(Debug)]
pub enum StoreError {
    NotFound(Ulid),
    /// A day record for this resource/date already exists.
    AlreadyExists { resource_id: Ulid, date: NaiveDate },
    /// Conditional write of a day record or booking lost against a
    /// concurrent writer.
    VersionMismatch { expected: u64, actual: u64 },
    /// Record failed shape validation at the store boundary.
    Invalid(String),
    /// Backing storage failed (I/O, writer gone).
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::AlreadyExists { resource_id, date } => {
                write!(f, "availability for {resource_id} on {date} already exists")
            }
            StoreError::VersionMismatch { expected, actual } => {
                write!(f, "version mismatch: expected {expected}, found {actual}")
            }
            StoreError::Invalid(msg) => write!(f, "invalid record: {msg}"),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Document writes as recorded in the WAL. Each carries the full new
/// document; replay is last-write-wins per id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreEvent {
    ResourcePut(Resource),
    DayPut(DailyAvailability),
    BlockedTimePut(BlockedTime),
    BlockedTimeRemoved { id: Ulid },
    BookingPut(Booking),
    ConflictPut(AvailabilityConflict),
}

/// Document store behind the reservation core. Injected into the engine as
/// `Arc<dyn AvailabilityStore>`.
#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    async fn get_resource(&self, id: Ulid) -> Result<Option<Resource>, StoreError>;
    async fn put_resource(&self, resource: Resource) -> Result<(), StoreError>;

    /// Day records in `[from, to]`, ascending by date.
    async fn get_days(
        &self,
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyAvailability>, StoreError>;
    async fn get_day(&self, resource_id: Ulid, date: NaiveDate) -> Result<Option<DailyAvailability>, StoreError>;
    /// Insert a new day record. Fails with `AlreadyExists` if one is present.
    async fn create_day(&self, record: DailyAvailability) -> Result<DailyAvailability, StoreError>;
    /// Patch a day record. With `expected_version` the write only lands if
    /// the stored version still matches.
    async fn update_day(
        &self,
        id: Ulid,
        patch: DayPatch,
        expected_version: Option<u64>,
    ) -> Result<DailyAvailability, StoreError>;

    /// Blocked times with at least one occurrence overlapping `window`.
    async fn blocked_times_overlapping(&self, resource_id: Ulid, window: Span) -> Result<Vec<BlockedTime>, StoreError>;
    async fn put_blocked_time(&self, blocked: BlockedTime) -> Result<(), StoreError>;
    async fn remove_blocked_time(&self, id: Ulid) -> Result<bool, StoreError>;

    async fn get_booking(&self, id: Ulid) -> Result<Option<Booking>, StoreError>;
    /// Upsert a booking and bump its version. With `expected_version` the
    /// write only lands if the stored booking is still at that version.
    async fn put_booking(&self, booking: Booking, expected_version: Option<u64>) -> Result<Booking, StoreError>;
    /// Bookings (any status) whose span overlaps `window`, by start.
    async fn bookings_for_resource(&self, resource_id: Ulid, window: Span) -> Result<Vec<Booking>, StoreError>;

    async fn get_conflict(&self, id: Ulid) -> Result<Option<AvailabilityConflict>, StoreError>;
    async fn put_conflict(&self, conflict: AvailabilityConflict) -> Result<(), StoreError>;
    async fn conflicts_for_resource(&self, resource_id: Ulid) -> Result<Vec<AvailabilityConflict>, StoreError>;
}
