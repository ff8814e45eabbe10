//! Hard caps that keep a single request from exhausting memory or the WAL.

pub const MAX_POOLS: usize = 100_000;
pub const MAX_RESERVATIONS_PER_POOL: usize = 200_000;
pub const MAX_BATCH_SIZE: usize = 500;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_STOCK: u32 = 1_000_000;

/// Widest rental period accepted, in days.
pub const MAX_RANGE_DAYS: i64 = 3_660;
/// Widest calendar window a single query may expand day by day.
pub const MAX_CALENDAR_DAYS: i64 = 1_100;

pub const MIN_VALID_YEAR: i32 = 1970;
pub const MAX_VALID_YEAR: i32 = 9999;
