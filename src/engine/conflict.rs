use chrono::{Datelike, NaiveDate};

use crate::limits::*;
use crate::model::*;

use super::availability::reserved_quantity;
use super::EngineError;

/// Reject degenerate or out-of-range periods before touching any pool.
pub(crate) fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<DateRange, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidInterval { start, end });
    }
    if start.year() < MIN_VALID_YEAR || end.year() > MAX_VALID_YEAR {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    let range = DateRange::new(start, end);
    if range.days() > MAX_RANGE_DAYS {
        return Err(EngineError::LimitExceeded("rental period too long"));
    }
    Ok(range)
}

pub(crate) fn validate_quantity(quantity: u32) -> Result<(), EngineError> {
    if quantity == 0 {
        return Err(EngineError::InvalidQuantity(quantity));
    }
    if quantity > MAX_STOCK {
        return Err(EngineError::LimitExceeded("quantity too large"));
    }
    Ok(())
}

pub(crate) fn validate_line(line: &OrderLine) -> Result<(), EngineError> {
    validate_range(line.range.start, line.range.end)?;
    validate_quantity(line.quantity)
}

/// Commit-time check. Runs under the pool's write lock, against the same
/// state the insert will land in. `pending` holds lines of the same batch
/// that are validated but not applied yet.
pub(crate) fn check_capacity(
    ps: &PoolState,
    range: &DateRange,
    requested: u32,
    pending: &[(DateRange, u32)],
) -> Result<(), EngineError> {
    let batch: u64 = pending
        .iter()
        .filter(|(r, _)| r.overlaps(range))
        .map(|(_, q)| u64::from(*q))
        .sum();
    let reserved = u64::from(reserved_quantity(ps, range)) + batch;
    let free = u64::from(ps.stock).saturating_sub(reserved);
    if free < u64::from(requested) {
        return Err(EngineError::Conflict {
            product_id: ps.key.product_id,
            requested,
            available: free as u32,
        });
    }
    Ok(())
}
