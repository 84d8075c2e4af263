use crate::model::{DAY_MS, Ms};

// 2000-01-01T00:00:00Z .. 2100-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single rental may not exceed a year.
pub const MAX_RENTAL_SPAN_MS: Ms = 366 * DAY_MS;

/// Blackouts cover refits and seasonal closures, so they may run longer.
pub const MAX_BLACKOUT_SPAN_MS: Ms = 3660 * DAY_MS;

pub const MAX_ID_LEN: usize = 128;
pub const MAX_LOCATION_LEN: usize = 128;
pub const MAX_ADDONS_PER_REQUEST: usize = 32;
pub const MAX_ADDON_QUANTITY: u32 = 100;
pub const MAX_BUFFER_HOURS: u32 = 24 * 14;
pub const MAX_INTERVALS_PER_ITEM: usize = 100_000;

/// Longest accepted request line on the wire.
pub const MAX_LINE_LEN: usize = 64 * 1024;
