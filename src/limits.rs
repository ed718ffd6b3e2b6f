use crate::model::{Ms, DAY_MS};

pub const MAX_SLOTS_PER_DAY: usize = 1_440;
pub const MAX_EXCEPTIONS_PER_DAY: usize = 64;
pub const MAX_NOTES_LEN: usize = 1_024;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 512;

/// Widest window accepted by range queries.
pub const MAX_QUERY_DAYS: i64 = 366;
pub const MAX_QUERY_WINDOW_MS: Ms = MAX_QUERY_DAYS * DAY_MS;

/// Cap on occurrences produced when expanding one recurring block.
pub const MAX_RECURRENCE_EXPANSION: usize = 1_000;

/// Read-check-write attempts before a reservation gives up on contention.
pub const MAX_RESERVE_RETRIES: usize = 8;

pub const MAX_GUESTS: u32 = 100_000;
pub const MAX_FREE_SLOTS: usize = 1_440;

/// 2000-01-01 .. 2200-01-01 (UTC).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// Longest accepted request line on the wire.
pub const MAX_LINE_LEN: usize = 64 * 1024;
