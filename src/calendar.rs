//! Conversions between absolute instants and calendar days / `HH:mm` times.
//! Calendar days are UTC days.

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};

use crate::model::{Ms, Span, DAY_MS, MINUTE_MS};

const MINUTES_PER_DAY: u32 = 24 * 60;

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// Parse `HH:mm` into minutes since midnight. `24:00` is accepted as end of day.
pub fn parse_hhmm(s: &str) -> Option<u32> {
    let s = s.trim();
    if s == "24:00" {
        return Some(MINUTES_PER_DAY);
    }
    let t = NaiveTime::parse_from_str(s, "%H:%M").ok()?;
    Some(t.hour() * 60 + t.minute())
}

/// Format minutes since midnight as `HH:mm` (wrapping past midnight, except
/// that exactly one day renders as `24:00`).
pub fn format_hhmm(minutes: u32) -> String {
    if minutes == MINUTES_PER_DAY {
        return "24:00".to_string();
    }
    let m = minutes % MINUTES_PER_DAY;
    format!("{:02}:{:02}", m / 60, m % 60)
}

/// UTC calendar day containing `t`.
pub fn day_of(t: Ms) -> NaiveDate {
    DateTime::<Utc>::from_timestamp_millis(t)
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}

/// Instant of midnight starting `date`.
pub fn day_start(date: NaiveDate) -> Ms {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

pub fn day_span(date: NaiveDate) -> Span {
    let start = day_start(date);
    Span::new(start, start + DAY_MS)
}

/// Absolute span of an `HH:mm`–`HH:mm` range on `date`. An end before the
/// start wraps to the next day. `None` if either bound is malformed.
pub fn span_on(date: NaiveDate, start: &str, end: &str) -> Option<Span> {
    let (s, e) = minute_bounds(start, end)?;
    let base = day_start(date);
    Some(Span::new(base + Ms::from(s) * MINUTE_MS, base + Ms::from(e) * MINUTE_MS))
}

/// Parsed `(start, end)` minutes with overnight wrap applied.
pub fn minute_bounds(start: &str, end: &str) -> Option<(u32, u32)> {
    let s = parse_hhmm(start)?;
    let mut e = parse_hhmm(end)?;
    if e < s {
        e += MINUTES_PER_DAY;
    }
    Some((s, e))
}

/// `HH:mm` bounds of `span` relative to the UTC day of its start. Requires a
/// minute-aligned span no longer than one day.
pub fn slot_bounds(span: &Span) -> Option<(String, String, u32)> {
    if span.start % MINUTE_MS != 0 || span.end % MINUTE_MS != 0 || span.is_empty() {
        return None;
    }
    if span.duration_ms() > DAY_MS {
        return None;
    }
    let base = day_start(day_of(span.start));
    let start_min = ((span.start - base) / MINUTE_MS) as u32;
    let end_min = ((span.end - base) / MINUTE_MS) as u32;
    let duration = end_min - start_min;
    // A full day only has distinct labels when it starts at midnight.
    if duration >= MINUTES_PER_DAY && start_min != 0 {
        return None;
    }
    // A slot that ends past midnight wraps; `span_on` restores it.
    let end_label = if end_min <= MINUTES_PER_DAY {
        format_hhmm(end_min)
    } else {
        format_hhmm(end_min - MINUTES_PER_DAY)
    };
    Some((format_hhmm(start_min), end_label, duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HOUR_MS;

    fn june_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn parse_and_format() {
        assert_eq!(parse_hhmm("09:30"), Some(570));
        assert_eq!(parse_hhmm("00:00"), Some(0));
        assert_eq!(parse_hhmm("24:00"), Some(1440));
        assert_eq!(parse_hhmm("25:00"), None);
        assert_eq!(parse_hhmm("9am"), None);
        assert_eq!(parse_hhmm(""), None);
        assert_eq!(format_hhmm(570), "09:30");
        assert_eq!(format_hhmm(1440), "24:00");
        assert_eq!(format_hhmm(1500), "01:00");
    }

    #[test]
    fn day_of_and_start_agree() {
        let d = june_first();
        let start = day_start(d);
        assert_eq!(day_of(start), d);
        assert_eq!(day_of(start + DAY_MS - 1), d);
        assert_eq!(day_of(start + DAY_MS), d.succ_opt().unwrap());
    }

    #[test]
    fn span_on_wraps_overnight() {
        let d = june_first();
        let base = day_start(d);
        assert_eq!(span_on(d, "09:00", "10:00"), Some(Span::new(base + 9 * HOUR_MS, base + 10 * HOUR_MS)));
        assert_eq!(span_on(d, "23:00", "01:00"), Some(Span::new(base + 23 * HOUR_MS, base + 25 * HOUR_MS)));
        assert_eq!(span_on(d, "nine", "10:00"), None);
    }

    #[test]
    fn slot_bounds_roundtrip_through_span_on() {
        let d = june_first();
        let base = day_start(d);
        for span in [
            Span::new(base + 9 * HOUR_MS, base + 10 * HOUR_MS),
            Span::new(base + 23 * HOUR_MS, base + 25 * HOUR_MS),
            Span::new(base, base + DAY_MS),
        ] {
            let (s, e, minutes) = slot_bounds(&span).unwrap();
            assert_eq!(Ms::from(minutes) * MINUTE_MS, span.duration_ms());
            assert_eq!(span_on(d, &s, &e), Some(span));
        }
    }

    #[test]
    fn slot_bounds_rejects_unaligned_or_long() {
        let base = day_start(june_first());
        assert!(slot_bounds(&Span::new(base + 1, base + HOUR_MS)).is_none());
        assert!(slot_bounds(&Span::new(base, base + DAY_MS + HOUR_MS)).is_none());
        assert!(slot_bounds(&Span::new(base, base)).is_none());
        assert!(slot_bounds(&Span::new(base + HOUR_MS, base + HOUR_MS + DAY_MS)).is_none());
    }
}
