use std::collections::HashSet;

use tracing::{debug, warn};
use ulid::Ulid;

use crate::calendar;
use crate::model::*;

use super::{validate_span, Engine, EngineError};

/// Offsets from the proposed start offered as alternatives. They are not
/// re-checked against availability.
const SUGGESTION_OFFSETS: [Ms; 3] = [HOUR_MS, 2 * HOUR_MS, DAY_MS];

/// Everything the resolver reads for one proposed span.
#[derive(Debug, Clone, Default)]
pub struct Occupancy {
    /// Day record of the UTC day containing the span's start.
    pub day: Option<DailyAvailability>,
    /// Records of the previous day and of later days the span reaches into.
    /// Only their taken slots count.
    pub neighbours: Vec<DailyAvailability>,
    pub blocked: Vec<BlockedTime>,
    /// Booking documents overlapping the span, any status.
    pub bookings: Vec<Booking>,
}

/// Taken slots of `day` that overlap `span`.
fn taken_slot_conflicts(day: &DailyAvailability, span: &Span, conflicts: &mut Vec<Conflict>) {
    for slot in &day.time_slots {
        if slot.is_open() {
            continue;
        }
        let Some(slot_span) = calendar::span_on(day.date, &slot.start_time, &slot.end_time) else {
            warn!(
                "skipping slot {} on {} with malformed bounds {:?}-{:?}",
                slot.id, day.date, slot.start_time, slot.end_time
            );
            continue;
        };
        if slot_span.overlaps(span) {
            conflicts.push(Conflict {
                kind: ConflictKind::SlotUnavailable,
                severity: Severity::Medium,
                span: slot_span,
                message: format!("slot {}-{} is already taken", slot.start_time, slot.end_time),
                source_id: Some(slot.id),
            });
        }
    }
}

/// Decide whether `span` is bookable. Pure.
///
/// A missing day record means "no explicit restrictions": the span is
/// available unless a blocked time, a neighbouring day's overnight slot or
/// an active booking says otherwise. Bookings already recorded in some slot
/// are judged through that slot; the rest surface as `booking_overlap`.
/// `exclude` is the booking being (re)reserved.
pub fn evaluate(occupancy: &Occupancy, span: &Span, exclude: Option<Ulid>) -> AvailabilityReport {
    let mut conflicts = Vec::new();

    if let Some(day) = &occupancy.day {
        if !day.is_working_day {
            conflicts.push(Conflict {
                kind: ConflictKind::DayOff,
                severity: Severity::High,
                span: calendar::day_span(day.date),
                message: format!("{} is not a working day", day.date),
                source_id: Some(day.id),
            });
        }

        taken_slot_conflicts(day, span, &mut conflicts);

        for exception in day.exceptions.iter().filter(|e| e.closes()) {
            let Some(ex_span) = calendar::span_on(day.date, &exception.start_time, &exception.end_time) else {
                warn!("skipping exception on {} with malformed bounds", day.date);
                continue;
            };
            if ex_span.overlaps(span) {
                conflicts.push(Conflict {
                    kind: ConflictKind::Exception,
                    severity: Severity::High,
                    span: ex_span,
                    message: exception
                        .reason
                        .clone()
                        .unwrap_or_else(|| format!("{:?} {}-{}", exception.status, exception.start_time, exception.end_time)),
                    source_id: Some(day.id),
                });
            }
        }

        if day.is_full() {
            conflicts.push(Conflict {
                kind: ConflictKind::DayCapacity,
                severity: Severity::Medium,
                span: calendar::day_span(day.date),
                message: format!("{} already has {} bookings", day.date, day.total_bookings),
                source_id: Some(day.id),
            });
        }
    }

    for neighbour in &occupancy.neighbours {
        taken_slot_conflicts(neighbour, span, &mut conflicts);
    }

    for b in &occupancy.blocked {
        for occurrence in b.occurrences(span) {
            conflicts.push(Conflict {
                kind: ConflictKind::BlockedTime,
                severity: Severity::High,
                span: occurrence,
                message: b.reason.clone().unwrap_or_else(|| format!("blocked ({:?})", b.status)),
                source_id: Some(b.id),
            });
        }
    }

    let recorded: HashSet<Ulid> = occupancy
        .day
        .iter()
        .chain(&occupancy.neighbours)
        .flat_map(|d| d.time_slots.iter())
        .flat_map(|s| s.booking_ids.iter().copied())
        .collect();
    for b in &occupancy.bookings {
        if !b.status.is_active() || Some(b.id) == exclude || recorded.contains(&b.id) || !b.span.overlaps(span) {
            continue;
        }
        conflicts.push(Conflict {
            kind: ConflictKind::BookingOverlap,
            severity: Severity::Low,
            span: b.span,
            message: format!("{} booking {} holds this time but no slot records it", b.status, b.id),
            source_id: Some(b.id),
        });
    }

    let is_available = conflicts.is_empty();
    let suggested_slots = if is_available {
        Vec::new()
    } else {
        SUGGESTION_OFFSETS.iter().map(|off| span.start + off).collect()
    };

    AvailabilityReport {
        is_available,
        conflicts,
        suggested_slots,
    }
}

impl Engine {
    /// Can `span` be booked on `resource_id`? Reads the day records around
    /// the span, the resource's blocked times and its booking documents.
    /// Guest capacity is not considered here.
    pub async fn check_availability(&self, resource_id: Ulid, span: Span) -> Result<AvailabilityReport, EngineError> {
        validate_span(&span)?;
        let occupancy = self.load_occupancy(resource_id, &span).await;
        let report = evaluate(&occupancy, &span, None);
        debug!(
            "availability of {resource_id} for [{}, {}): {} ({} conflicts)",
            span.start,
            span.end,
            report.is_available,
            report.conflicts.len()
        );
        metrics::counter!(
            crate::observability::AVAILABILITY_CHECKS_TOTAL,
            "available" => if report.is_available { "true" } else { "false" }
        )
        .increment(1);
        Ok(report)
    }

    /// Lenient read of everything `evaluate` needs. Slots are recorded on
    /// their start day, so the previous day can spill past midnight into
    /// the span and a span crossing midnight reaches later days.
    pub(super) async fn load_occupancy(&self, resource_id: Ulid, span: &Span) -> Occupancy {
        let date = calendar::day_of(span.start);
        let last = calendar::day_of((span.end - 1).max(span.start));
        let day = self.load_day_lenient(resource_id, date).await;
        let neighbours = self
            .load_days_lenient(resource_id, date.pred_opt().unwrap_or(date), last)
            .await
            .into_iter()
            .filter(|d| d.date != date)
            .collect();
        let blocked = self.load_blocked_lenient(resource_id, *span).await;
        let bookings = self.load_bookings_lenient(resource_id, *span).await;
        Occupancy {
            day,
            neighbours,
            blocked,
            bookings,
        }
    }
}
