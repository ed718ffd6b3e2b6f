use std::collections::BTreeSet;

use tracing::{info, warn};
use ulid::Ulid;

use crate::calendar::now_ms;
use crate::model::*;

use super::{validate_span, Engine, EngineError};

/// Group active bookings (sorted by start) into clusters of mutually
/// chained overlaps. Only clusters with two or more bookings are returned.
pub(super) fn overlapping_groups(sorted: &[Booking]) -> Vec<(Span, Vec<&Booking>)> {
    let mut groups = Vec::new();
    let mut current: Vec<&Booking> = Vec::new();
    let mut group_end: Ms = Ms::MIN;

    for b in sorted {
        if !current.is_empty() && b.span.start < group_end {
            group_end = group_end.max(b.span.end);
            current.push(b);
            continue;
        }
        if current.len() > 1 {
            groups.push((Span::new(current[0].span.start, group_end), std::mem::take(&mut current)));
        }
        current.clear();
        current.push(b);
        group_end = b.span.end;
    }
    if current.len() > 1 {
        groups.push((Span::new(current[0].span.start, group_end), current));
    }
    groups
}

fn suggestions(group: &[&Booking], group_end: Ms) -> Vec<String> {
    let mut out = Vec::new();
    for b in group.iter().skip(1) {
        out.push(format!("reschedule booking {} to start at {group_end}", b.id));
    }
    for b in group.iter().filter(|b| b.status == BookingStatus::Pending) {
        out.push(format!("cancel pending booking {}", b.id));
    }
    out.push("contact the guests of the overlapping bookings".to_string());
    out
}

impl Engine {
    /// Scan stored bookings in `window` for overlaps and record one open
    /// `AvailabilityConflict` per overlapping cluster. A cluster that already
    /// has an open conflict is returned as-is rather than recorded twice.
    pub async fn detect_conflicts(&self, resource_id: Ulid, window: Span) -> Result<Vec<AvailabilityConflict>, EngineError> {
        validate_span(&window)?;
        let mut active: Vec<Booking> = self
            .store
            .bookings_for_resource(resource_id, window)
            .await?
            .into_iter()
            .filter(|b| b.status.is_active())
            .collect();
        active.sort_by_key(|b| (b.span.start, b.id));

        let existing: Vec<AvailabilityConflict> = self
            .store
            .conflicts_for_resource(resource_id)
            .await?
            .into_iter()
            .filter(|c| c.status == ConflictStatus::Open)
            .collect();

        let mut out = Vec::new();
        for (span, group) in overlapping_groups(&active) {
            let ids: BTreeSet<Ulid> = group.iter().map(|b| b.id).collect();
            if let Some(known) = existing
                .iter()
                .find(|c| c.conflicting_bookings.iter().map(|cb| cb.booking_id).collect::<BTreeSet<_>>() == ids)
            {
                out.push(known.clone());
                continue;
            }

            let now = now_ms();
            let conflict = AvailabilityConflict {
                id: Ulid::new(),
                resource_id,
                span,
                conflicting_bookings: group
                    .iter()
                    .map(|b| ConflictingBooking {
                        booking_id: b.id,
                        span: b.span,
                        severity: if b.status == BookingStatus::Confirmed {
                            Severity::High
                        } else {
                            Severity::Medium
                        },
                    })
                    .collect(),
                suggested_resolutions: suggestions(&group, span.end),
                status: ConflictStatus::Open,
                created_at: now,
                updated_at: now,
            };
            self.store.put_conflict(conflict.clone()).await?;
            warn!(
                "recorded conflict {} on {resource_id}: {} overlapping bookings in [{}, {})",
                conflict.id,
                group.len(),
                span.start,
                span.end
            );
            metrics::counter!(crate::observability::CONFLICTS_DETECTED_TOTAL).increment(1);
            out.push(conflict);
        }
        Ok(out)
    }

    /// Close an open conflict as resolved or ignored.
    pub async fn resolve_conflict(&self, id: Ulid, status: ConflictStatus) -> Result<AvailabilityConflict, EngineError> {
        if status == ConflictStatus::Open {
            return Err(EngineError::Invalid("a conflict can only be resolved or ignored".into()));
        }
        let mut conflict = self.store.get_conflict(id).await?.ok_or(EngineError::NotFound(id))?;
        if conflict.status != ConflictStatus::Open {
            return Err(EngineError::Invalid(format!("conflict {id} is already {:?}", conflict.status)));
        }
        conflict.status = status;
        conflict.updated_at = now_ms();
        self.store.put_conflict(conflict.clone()).await?;
        info!("conflict {id} marked {status:?}");
        Ok(conflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(start: Ms, end: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            resource_id: Ulid::nil(),
            user_id: Ulid::new(),
            span: Span::new(start, end),
            guest_count: 1,
            status: BookingStatus::Confirmed,
            total_price: 0.0,
            version: 1,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn groups_chain_overlaps() {
        let sorted = vec![
            booking(0, 100),
            booking(50, 150),
            booking(140, 200), // overlaps the second, not the first
            booking(200, 300), // touches, separate
            booking(400, 500),
            booking(450, 460),
        ];
        let groups = overlapping_groups(&sorted);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, Span::new(0, 200));
        assert_eq!(groups[0].1.len(), 3);
        assert_eq!(groups[1].0, Span::new(400, 500));
        assert_eq!(groups[1].1.len(), 2);
    }

    #[test]
    fn no_groups_for_back_to_back() {
        let sorted = vec![booking(0, 100), booking(100, 200), booking(200, 300)];
        assert!(overlapping_groups(&sorted).is_empty());
    }

    #[test]
    fn suggestions_cover_pending_and_later_bookings() {
        let first = booking(0, 100);
        let mut second = booking(50, 150);
        second.status = BookingStatus::Pending;
        let s = suggestions(&[&first, &second], 150);
        assert!(s.iter().any(|x| x.contains(&second.id.to_string()) && x.starts_with("reschedule")));
        assert!(s.iter().any(|x| x.starts_with("cancel pending")));
        assert!(!s.iter().any(|x| x.contains(&first.id.to_string())));
    }
}
