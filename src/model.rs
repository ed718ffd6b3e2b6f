use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use ulid::Ulid;

use crate::calendar;
use crate::limits::*;

/// Unix milliseconds, the only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Strict test: touching endpoints do not overlap, and an empty span
    /// overlaps nothing that starts at its instant.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn shifted(&self, by: Ms) -> Span {
        Span::new(self.start + by, self.end + by)
    }
}

// ── Resources ────────────────────────────────────────────────────

/// A venue or bookable service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    /// Max guests per booking.
    pub capacity: u32,
    pub created_at: Ms,
}

// ── Daily availability ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    /// `HH:mm`
    pub start: String,
    /// `HH:mm`; `24:00` means end of day.
    pub end: String,
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self {
            start: "09:00".into(),
            end: "17:00".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlot {
    #[serde(default = "Ulid::new")]
    pub id: Ulid,
    pub start_time: String,
    pub end_time: String,
    pub duration_minutes: u32,
    pub is_available: bool,
    pub max_bookings: u32,
    #[serde(default)]
    pub current_bookings: u32,
    pub price: Option<f64>,
    pub notes: Option<String>,
    /// Bookings currently holding this slot.
    #[serde(default)]
    pub booking_ids: Vec<Ulid>,
}

impl TimeSlot {
    /// A slot still accepting reservations.
    pub fn is_open(&self) -> bool {
        self.is_available && self.current_bookings < self.max_bookings
    }

    pub fn is_held_by(&self, booking_id: &Ulid) -> bool {
        self.booking_ids.contains(booking_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionStatus {
    Available,
    Unavailable,
    Maintenance,
    Holiday,
}

/// Sub-range override on a single day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityException {
    pub start_time: String,
    pub end_time: String,
    pub status: ExceptionStatus,
    pub reason: Option<String>,
}

impl AvailabilityException {
    pub fn closes(&self) -> bool {
        self.status != ExceptionStatus::Available
    }
}

/// Per-resource, per-day availability document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAvailability {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub is_working_day: bool,
    pub working_hours: WorkingHours,
    pub time_slots: Vec<TimeSlot>,
    pub exceptions: Vec<AvailabilityException>,
    pub total_bookings: u32,
    pub max_bookings: Option<u32>,
    /// Bumped on every write; conditional updates compare against it.
    pub version: u64,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl DailyAvailability {
    pub fn new(resource_id: Ulid, date: NaiveDate, working_hours: WorkingHours, now: Ms) -> Self {
        Self {
            id: Ulid::new(),
            resource_id,
            date,
            is_working_day: true,
            working_hours,
            time_slots: Vec::new(),
            exceptions: Vec::new(),
            total_bookings: 0,
            max_bookings: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_full(&self) -> bool {
        self.max_bookings.is_some_and(|cap| self.total_bookings >= cap)
    }

    /// Shape checks applied at the store boundary. Slot times are *not*
    /// parsed here: malformed slot bounds are tolerated and skipped by readers.
    pub fn validate(&self) -> Result<(), String> {
        if self.time_slots.len() > MAX_SLOTS_PER_DAY {
            return Err(format!("day {} has too many slots", self.date));
        }
        if self.exceptions.len() > MAX_EXCEPTIONS_PER_DAY {
            return Err(format!("day {} has too many exceptions", self.date));
        }
        for slot in &self.time_slots {
            if slot.current_bookings > slot.max_bookings {
                return Err(format!(
                    "slot {} holds {} bookings but allows {}",
                    slot.id, slot.current_bookings, slot.max_bookings
                ));
            }
            if slot.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
                return Err(format!("slot {} notes too long", slot.id));
            }
        }
        if calendar::parse_hhmm(&self.working_hours.start).is_none()
            || calendar::parse_hhmm(&self.working_hours.end).is_none()
        {
            return Err(format!(
                "working hours {}-{} are not HH:mm",
                self.working_hours.start, self.working_hours.end
            ));
        }
        Ok(())
    }
}

/// Partial update of a day document. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DayPatch {
    pub is_working_day: Option<bool>,
    pub working_hours: Option<WorkingHours>,
    pub time_slots: Option<Vec<TimeSlot>>,
    pub exceptions: Option<Vec<AvailabilityException>>,
    pub total_bookings: Option<u32>,
    /// Absent leaves the cap alone; `null` removes it.
    #[serde(deserialize_with = "present")]
    pub max_bookings: Option<Option<u32>>,
}

/// Distinguishes an explicit `null` from a missing field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl DayPatch {
    pub fn apply(self, day: &mut DailyAvailability) {
        if let Some(v) = self.is_working_day {
            day.is_working_day = v;
        }
        if let Some(v) = self.working_hours {
            day.working_hours = v;
        }
        if let Some(v) = self.time_slots {
            day.time_slots = v;
        }
        if let Some(v) = self.exceptions {
            day.exceptions = v;
        }
        if let Some(v) = self.total_bookings {
            day.total_bookings = v;
        }
        if let Some(v) = self.max_bookings {
            day.max_bookings = v;
        }
    }
}

// ── Blocked times ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Blocked,
    Maintenance,
    Holiday,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub frequency: Frequency,
    /// Every `interval` days/weeks; at least 1.
    pub interval: u32,
    /// No occurrence starts after this instant.
    pub until: Option<Ms>,
}

impl Recurrence {
    pub fn step_ms(&self) -> Ms {
        let unit = match self.frequency {
            Frequency::Daily => DAY_MS,
            Frequency::Weekly => 7 * DAY_MS,
        };
        unit * Ms::from(self.interval.max(1))
    }
}

/// Explicit override window. Always wins over day records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTime {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub span: Span,
    pub status: BlockStatus,
    pub reason: Option<String>,
    pub recurrence: Option<Recurrence>,
    pub created_at: Ms,
}

impl BlockedTime {
    /// Occurrences of this block that overlap `window`, in start order.
    pub fn occurrences(&self, window: &Span) -> Vec<Span> {
        let Some(rec) = self.recurrence else {
            return if self.span.overlaps(window) {
                vec![self.span]
            } else {
                Vec::new()
            };
        };
        let step = rec.step_ms();
        // First k with span.end + k*step > window.start.
        let first = if window.start < self.span.end {
            0
        } else {
            (window.start - self.span.end) / step + 1
        };
        let mut out = Vec::new();
        let mut k = first;
        while out.len() < MAX_RECURRENCE_EXPANSION {
            let occ = self.span.shifted(k * step);
            if occ.start >= window.end || rec.until.is_some_and(|u| occ.start > u) {
                break;
            }
            if occ.overlaps(window) {
                out.push(occ);
            }
            k += 1;
        }
        out
    }
}

/// A single concrete occurrence of a blocked time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedOccurrence {
    pub blocked_id: Ulid,
    pub span: Span,
    pub status: BlockStatus,
    pub reason: Option<String>,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Pending and confirmed bookings occupy their span.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Completed) | (Confirmed, Cancelled)
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub guest_count: u32,
    pub status: BookingStatus,
    pub total_price: f64,
    /// Bumped on every write; status changes are conditional on it.
    pub version: u64,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// Input to the booking-creation flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBooking {
    pub resource_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub guest_count: u32,
    pub total_price: f64,
    pub status: BookingStatus,
}

// ── Conflicts ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    DayOff,
    SlotUnavailable,
    BlockedTime,
    Exception,
    DayCapacity,
    BookingOverlap,
}

/// One reason a proposed span cannot be booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub severity: Severity,
    pub span: Span,
    pub message: String,
    pub source_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub is_available: bool,
    pub conflicts: Vec<Conflict>,
    pub suggested_slots: Vec<Ms>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Open,
    Resolved,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictingBooking {
    pub booking_id: Ulid,
    pub span: Span,
    pub severity: Severity,
}

/// Overlap between stored bookings, found after the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityConflict {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub span: Span,
    pub conflicting_bookings: Vec<ConflictingBooking>,
    pub suggested_resolutions: Vec<String>,
    pub status: ConflictStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(span: Span, recurrence: Option<Recurrence>) -> BlockedTime {
        BlockedTime {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            span,
            status: BlockStatus::Blocked,
            reason: None,
            recurrence,
            created_at: 0,
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn overlap_is_symmetric() {
        let spans = [
            Span::new(0, 10),
            Span::new(5, 15),
            Span::new(10, 20),
            Span::new(10, 10),
            Span::new(0, 30),
            Span::new(25, 26),
        ];
        for a in &spans {
            for b in &spans {
                assert_eq!(a.overlaps(b), b.overlaps(a), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn positive_span_overlaps_itself() {
        let a = Span::new(100, 101);
        assert!(a.overlaps(&a));
    }

    #[test]
    fn zero_duration_span_boundaries() {
        let point = Span::new(100, 100);
        // Same start
        assert!(!point.overlaps(&Span::new(100, 200)));
        assert!(!Span::new(100, 200).overlaps(&point));
        // Touching the end of a range
        assert!(!point.overlaps(&Span::new(0, 100)));
        // Itself
        assert!(!point.overlaps(&point));
        // Strictly inside a range still counts
        assert!(point.overlaps(&Span::new(50, 150)));
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        let inner = Span::new(150, 300);
        let partial = Span::new(50, 200);
        assert!(outer.contains_span(&inner));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&partial));
    }

    #[test]
    fn one_off_block_occurrences() {
        let b = blocked(Span::new(1000, 2000), None);
        assert_eq!(b.occurrences(&Span::new(1500, 3000)), vec![Span::new(1000, 2000)]);
        assert!(b.occurrences(&Span::new(2000, 3000)).is_empty());
    }

    #[test]
    fn daily_block_expands_into_window() {
        let b = blocked(
            Span::new(0, HOUR_MS),
            Some(Recurrence {
                frequency: Frequency::Daily,
                interval: 1,
                until: None,
            }),
        );
        let window = Span::new(2 * DAY_MS + 30 * MINUTE_MS, 4 * DAY_MS);
        let occ = b.occurrences(&window);
        assert_eq!(
            occ,
            vec![
                Span::new(2 * DAY_MS, 2 * DAY_MS + HOUR_MS),
                Span::new(3 * DAY_MS, 3 * DAY_MS + HOUR_MS),
            ]
        );
    }

    #[test]
    fn weekly_block_respects_until() {
        let b = blocked(
            Span::new(0, HOUR_MS),
            Some(Recurrence {
                frequency: Frequency::Weekly,
                interval: 2,
                until: Some(15 * DAY_MS),
            }),
        );
        let occ = b.occurrences(&Span::new(0, 60 * DAY_MS));
        assert_eq!(occ.len(), 2); // day 0 and day 14
        assert_eq!(occ[1].start, 14 * DAY_MS);
    }

    #[test]
    fn booking_status_transitions() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(Pending.is_active() && Confirmed.is_active());
        assert!(!Cancelled.is_active());
    }

    #[test]
    fn day_validation_rejects_overfull_slot() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let mut day = DailyAvailability::new(Ulid::new(), date, WorkingHours::default(), 0);
        assert!(day.validate().is_ok());
        day.time_slots.push(TimeSlot {
            id: Ulid::new(),
            start_time: "09:00".into(),
            end_time: "10:00".into(),
            duration_minutes: 60,
            is_available: false,
            max_bookings: 1,
            current_bookings: 2,
            price: None,
            notes: None,
            booking_ids: Vec::new(),
        });
        assert!(day.validate().is_err());
    }

    #[test]
    fn day_patch_leaves_unset_fields() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let mut day = DailyAvailability::new(Ulid::new(), date, WorkingHours::default(), 0);
        DayPatch {
            total_bookings: Some(3),
            max_bookings: Some(Some(5)),
            ..Default::default()
        }
        .apply(&mut day);
        assert_eq!(day.total_bookings, 3);
        assert_eq!(day.max_bookings, Some(5));
        assert!(day.is_working_day);
        assert_eq!(day.working_hours, WorkingHours::default());
    }

    #[test]
    fn store_event_bincode_roundtrip() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let day = DailyAvailability::new(Ulid::new(), date, WorkingHours::default(), 42);
        let bytes = bincode::serialize(&day).unwrap();
        let decoded: DailyAvailability = bincode::deserialize(&bytes).unwrap();
        assert_eq!(day, decoded);
    }
}
