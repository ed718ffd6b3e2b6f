use chrono::NaiveDate;
use tracing::warn;
use ulid::Ulid;

use crate::calendar;
use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted by start, `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Cut free spans into back-to-back pieces of `len`; remainders are dropped.
pub fn chop(free: &[Span], len: Ms) -> Vec<Span> {
    let mut out = Vec::new();
    if len <= 0 {
        return out;
    }
    for span in free {
        let mut t = span.start;
        while t + len <= span.end && out.len() < MAX_FREE_SLOTS {
            out.push(Span::new(t, t + len));
            t += len;
        }
    }
    out
}

impl Engine {
    /// Bookable spans on `date`: working hours minus taken slots, closing
    /// exceptions and blocked times. With `slot_minutes` the result is cut
    /// into fixed-length pieces.
    pub async fn free_slots(&self, resource_id: Ulid, date: NaiveDate, slot_minutes: Option<u32>) -> Result<Vec<Span>, EngineError> {
        if slot_minutes == Some(0) {
            return Err(EngineError::Invalid("slot length must be positive".into()));
        }
        let day = self.load_day_lenient(resource_id, date).await;
        if day.as_ref().is_some_and(|d| !d.is_working_day || d.is_full()) {
            return Ok(Vec::new());
        }

        let hours = day.as_ref().map_or(&self.default_hours, |d| &d.working_hours);
        let Some(open) = calendar::span_on(date, &hours.start, &hours.end) else {
            warn!("working hours {}-{} of {resource_id} on {date} are malformed", hours.start, hours.end);
            return Ok(Vec::new());
        };

        let mut busy: Vec<Span> = Vec::new();
        if let Some(day) = &day {
            for slot in day.time_slots.iter().filter(|s| !s.is_open()) {
                match calendar::span_on(date, &slot.start_time, &slot.end_time) {
                    Some(s) => busy.push(s),
                    None => warn!("skipping slot {} on {date} with malformed bounds", slot.id),
                }
            }
            for ex in day.exceptions.iter().filter(|e| e.closes()) {
                if let Some(s) = calendar::span_on(date, &ex.start_time, &ex.end_time) {
                    busy.push(s);
                }
            }
        }
        for b in self.load_blocked_lenient(resource_id, open).await {
            busy.extend(b.occurrences(&open));
        }

        busy.retain(|s| !s.is_empty());
        busy.sort_by_key(|s| s.start);
        let busy = merge_overlapping(&busy);
        let free = subtract_intervals(&[open], &busy);

        Ok(match slot_minutes {
            Some(m) => chop(&free, Ms::from(m) * MINUTE_MS),
            None => free,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_joins_adjacent_and_overlapping() {
        let merged = merge_overlapping(&[Span::new(0, 10), Span::new(10, 20), Span::new(15, 30), Span::new(40, 50)]);
        assert_eq!(merged, vec![Span::new(0, 30), Span::new(40, 50)]);
    }

    #[test]
    fn subtract_carves_holes() {
        let base = [Span::new(0, 100)];
        let remove = [Span::new(10, 20), Span::new(50, 60), Span::new(90, 120)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![Span::new(0, 10), Span::new(20, 50), Span::new(60, 90)]
        );
    }

    #[test]
    fn subtract_nothing_returns_base() {
        let base = [Span::new(0, 100), Span::new(200, 300)];
        assert_eq!(subtract_intervals(&base, &[]), base.to_vec());
    }

    #[test]
    fn chop_drops_remainder() {
        let pieces = chop(&[Span::new(0, 250), Span::new(300, 350)], 100);
        assert_eq!(pieces, vec![Span::new(0, 100), Span::new(100, 200)]);
        assert!(chop(&[Span::new(0, 100)], 0).is_empty());
    }
}
