use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::calendar::now_ms;
use crate::limits::*;
use crate::model::*;

use super::wal::{wal_writer_loop, Wal, WalCommand};
use super::{AvailabilityStore, StoreError, StoreEvent};

/// Concurrent in-memory document store, optionally backed by a WAL.
pub struct MemoryStore {
    resources: DashMap<Ulid, Resource>,
    days: DashMap<Ulid, DailyAvailability>,
    /// (resource, date) → day record id
    day_index: DashMap<(Ulid, NaiveDate), Ulid>,
    blocked: DashMap<Ulid, BlockedTime>,
    bookings: DashMap<Ulid, Booking>,
    /// resource → booking ids, for range reads without a full scan.
    resource_bookings: DashMap<Ulid, Vec<Ulid>>,
    conflicts: DashMap<Ulid, AvailabilityConflict>,
    /// Serializes day-record and booking writes per resource so conditional
    /// updates are atomic.
    write_locks: DashMap<Ulid, Arc<Mutex<()>>>,
    /// Writers hold it shared across append+apply; compaction holds it exclusively.
    compaction: RwLock<()>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Volatile store with no WAL.
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            days: DashMap::new(),
            day_index: DashMap::new(),
            blocked: DashMap::new(),
            bookings: DashMap::new(),
            resource_bookings: DashMap::new(),
            conflicts: DashMap::new(),
            write_locks: DashMap::new(),
            compaction: RwLock::new(()),
            wal_tx: None,
        }
    }

    /// Replay the WAL at `wal_path` and spawn its group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut store = Self::new();
        let replayed = events.len();
        for event in events {
            store.apply(event);
        }
        store.wal_tx = Some(wal_tx);
        tracing::info!(
            "replayed {replayed} WAL records from {} ({} days, {} bookings)",
            wal_path.display(),
            store.days.len(),
            store.bookings.len()
        );
        Ok(store)
    }

    pub fn is_durable(&self) -> bool {
        self.wal_tx.is_some()
    }

    /// Apply a write to the maps (no WAL).
    fn apply(&self, event: StoreEvent) {
        match event {
            StoreEvent::ResourcePut(resource) => {
                self.resources.insert(resource.id, resource);
            }
            StoreEvent::DayPut(day) => {
                self.day_index.insert((day.resource_id, day.date), day.id);
                self.days.insert(day.id, day);
            }
            StoreEvent::BlockedTimePut(blocked) => {
                self.blocked.insert(blocked.id, blocked);
            }
            StoreEvent::BlockedTimeRemoved { id } => {
                self.blocked.remove(&id);
            }
            StoreEvent::BookingPut(booking) => {
                let (id, rid) = (booking.id, booking.resource_id);
                if self.bookings.insert(id, booking).is_none() {
                    self.resource_bookings.entry(rid).or_default().push(id);
                }
            }
            StoreEvent::ConflictPut(conflict) => {
                self.conflicts.insert(conflict.id, conflict);
            }
        }
    }

    /// Write event to the WAL via the background group-commit writer.
    async fn wal_append(&self, event: &StoreEvent) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// WAL-append then apply.
    async fn persist_and_apply(&self, event: StoreEvent) -> Result<(), StoreError> {
        let _shared = self.compaction.read().await;
        self.wal_append(&event).await?;
        self.apply(event);
        Ok(())
    }

    fn write_lock(&self, resource_id: Ulid) -> Arc<Mutex<()>> {
        self.write_locks.entry(resource_id).or_default().value().clone()
    }

    /// Events that recreate the current state.
    fn snapshot(&self) -> Vec<StoreEvent> {
        let mut events = Vec::new();
        events.extend(self.resources.iter().map(|e| StoreEvent::ResourcePut(e.value().clone())));
        events.extend(self.days.iter().map(|e| StoreEvent::DayPut(e.value().clone())));
        events.extend(self.blocked.iter().map(|e| StoreEvent::BlockedTimePut(e.value().clone())));
        events.extend(self.bookings.iter().map(|e| StoreEvent::BookingPut(e.value().clone())));
        events.extend(self.conflicts.iter().map(|e| StoreEvent::ConflictPut(e.value().clone())));
        events
    }

    /// Rewrite the WAL with only the records needed to recreate current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let _exclusive = self.compaction.write().await;
        let events = self.snapshot();
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx.send(WalCommand::AppendsSinceCompact { response: tx }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn check_span(span: &Span, what: &str) -> Result<(), StoreError> {
    if span.is_empty() {
        return Err(StoreError::Invalid(format!("{what} span [{}, {}) is empty", span.start, span.end)));
    }
    Ok(())
}

#[async_trait]
impl AvailabilityStore for MemoryStore {
    async fn get_resource(&self, id: Ulid) -> Result<Option<Resource>, StoreError> {
        Ok(self.resources.get(&id).map(|e| e.value().clone()))
    }

    async fn put_resource(&self, resource: Resource) -> Result<(), StoreError> {
        if resource.name.len() > MAX_NAME_LEN {
            return Err(StoreError::Invalid("resource name too long".into()));
        }
        if resource.capacity == 0 {
            return Err(StoreError::Invalid("resource capacity must be at least 1".into()));
        }
        self.persist_and_apply(StoreEvent::ResourcePut(resource)).await
    }

    async fn get_days(
        &self,
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyAvailability>, StoreError> {
        let mut days: Vec<DailyAvailability> = from
            .iter_days()
            .take_while(|d| *d <= to)
            .filter_map(|d| self.day_index.get(&(resource_id, d)).map(|e| *e.value()))
            .filter_map(|id| self.days.get(&id).map(|e| e.value().clone()))
            .collect();
        days.sort_by_key(|d| d.date);
        Ok(days)
    }

    async fn get_day(&self, resource_id: Ulid, date: NaiveDate) -> Result<Option<DailyAvailability>, StoreError> {
        let Some(id) = self.day_index.get(&(resource_id, date)).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self.days.get(&id).map(|e| e.value().clone()))
    }

    async fn create_day(&self, mut record: DailyAvailability) -> Result<DailyAvailability, StoreError> {
        record.validate().map_err(StoreError::Invalid)?;
        let lock = self.write_lock(record.resource_id);
        let _guard = lock.lock().await;
        if self.day_index.contains_key(&(record.resource_id, record.date)) {
            return Err(StoreError::AlreadyExists {
                resource_id: record.resource_id,
                date: record.date,
            });
        }
        let now = now_ms();
        record.version = 1;
        record.created_at = now;
        record.updated_at = now;
        self.persist_and_apply(StoreEvent::DayPut(record.clone())).await?;
        Ok(record)
    }

    async fn update_day(
        &self,
        id: Ulid,
        patch: DayPatch,
        expected_version: Option<u64>,
    ) -> Result<DailyAvailability, StoreError> {
        let resource_id = self
            .days
            .get(&id)
            .map(|e| e.value().resource_id)
            .ok_or(StoreError::NotFound(id))?;
        let lock = self.write_lock(resource_id);
        let _guard = lock.lock().await;

        let mut day = self
            .days
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound(id))?;
        if let Some(expected) = expected_version
            && expected != day.version {
                return Err(StoreError::VersionMismatch {
                    expected,
                    actual: day.version,
                });
            }
        patch.apply(&mut day);
        day.validate().map_err(StoreError::Invalid)?;
        day.version += 1;
        day.updated_at = now_ms();
        self.persist_and_apply(StoreEvent::DayPut(day.clone())).await?;
        Ok(day)
    }

    async fn blocked_times_overlapping(&self, resource_id: Ulid, window: Span) -> Result<Vec<BlockedTime>, StoreError> {
        let mut hits: Vec<BlockedTime> = self
            .blocked
            .iter()
            .filter(|e| e.value().resource_id == resource_id)
            .filter(|e| !e.value().occurrences(&window).is_empty())
            .map(|e| e.value().clone())
            .collect();
        hits.sort_by_key(|b| b.span.start);
        Ok(hits)
    }

    async fn put_blocked_time(&self, blocked: BlockedTime) -> Result<(), StoreError> {
        check_span(&blocked.span, "blocked time")?;
        if blocked.reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(StoreError::Invalid("blocked time reason too long".into()));
        }
        self.persist_and_apply(StoreEvent::BlockedTimePut(blocked)).await
    }

    async fn remove_blocked_time(&self, id: Ulid) -> Result<bool, StoreError> {
        if !self.blocked.contains_key(&id) {
            return Ok(false);
        }
        self.persist_and_apply(StoreEvent::BlockedTimeRemoved { id }).await?;
        Ok(true)
    }

    async fn get_booking(&self, id: Ulid) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.get(&id).map(|e| e.value().clone()))
    }

    async fn put_booking(&self, mut booking: Booking, expected_version: Option<u64>) -> Result<Booking, StoreError> {
        check_span(&booking.span, "booking")?;
        let lock = self.write_lock(booking.resource_id);
        let _guard = lock.lock().await;

        let stored = self.bookings.get(&booking.id).map(|e| e.value().version);
        if let Some(expected) = expected_version {
            let actual = stored.ok_or(StoreError::NotFound(booking.id))?;
            if expected != actual {
                return Err(StoreError::VersionMismatch { expected, actual });
            }
        }
        booking.version = stored.map_or(1, |v| v + 1);
        self.persist_and_apply(StoreEvent::BookingPut(booking.clone())).await?;
        Ok(booking)
    }

    async fn bookings_for_resource(&self, resource_id: Ulid, window: Span) -> Result<Vec<Booking>, StoreError> {
        let ids = self
            .resource_bookings
            .get(&resource_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut hits: Vec<Booking> = ids
            .iter()
            .filter_map(|id| self.bookings.get(id).map(|e| e.value().clone()))
            .filter(|b| b.span.overlaps(&window))
            .collect();
        hits.sort_by_key(|b| (b.span.start, b.id));
        Ok(hits)
    }

    async fn get_conflict(&self, id: Ulid) -> Result<Option<AvailabilityConflict>, StoreError> {
        Ok(self.conflicts.get(&id).map(|e| e.value().clone()))
    }

    async fn put_conflict(&self, conflict: AvailabilityConflict) -> Result<(), StoreError> {
        self.persist_and_apply(StoreEvent::ConflictPut(conflict)).await
    }

    async fn conflicts_for_resource(&self, resource_id: Ulid) -> Result<Vec<AvailabilityConflict>, StoreError> {
        let mut hits: Vec<AvailabilityConflict> = self
            .conflicts
            .iter()
            .filter(|e| e.value().resource_id == resource_id)
            .map(|e| e.value().clone())
            .collect();
        hits.sort_by_key(|c| c.span.start);
        Ok(hits)
    }
}
