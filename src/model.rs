use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Half-open rental period `[start, end)` at whole-day granularity.
///
/// `start` is the first rented day, `end` is the first day the unit is back.
/// A range ending on day 5 and a range starting on day 5 do not overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "DateRange start must be before end");
        Self { start, end }
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Every rented day, in order.
    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> {
        self.start.iter_days().take(self.days().max(0) as usize)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Identifies one stock pool. Every product has a base pool (`variant_id: None`)
/// and every registered variant has its own, independent pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolKey {
    pub product_id: Ulid,
    pub variant_id: Option<Ulid>,
}

impl PoolKey {
    pub fn new(product_id: Ulid, variant_id: Option<Ulid>) -> Self {
        Self { product_id, variant_id }
    }

    pub fn product(product_id: Ulid) -> Self {
        Self::new(product_id, None)
    }

    pub fn variant(product_id: Ulid, variant_id: Ulid) -> Self {
        Self::new(product_id, Some(variant_id))
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_id {
            Some(v) => write!(f, "{}/{}", self.product_id, v),
            None => write!(f, "{}", self.product_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Active,
    /// Terminal. Kept for audit, ignored by availability.
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

/// Where an order line came from. Both kinds reserve stock the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineSource {
    Direct,
    Quotation { quotation_id: Ulid },
}

/// One line of an order asking for `quantity` units of a pool over `range`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Id the reservation will carry once committed.
    pub id: Ulid,
    pub pool: PoolKey,
    pub quantity: u32,
    pub range: DateRange,
    pub source: LineSource,
}

impl OrderLine {
    pub fn direct(pool: PoolKey, quantity: u32, range: DateRange) -> Self {
        Self {
            id: Ulid::new(),
            pool,
            quantity,
            range,
            source: LineSource::Direct,
        }
    }

    pub fn quotation(quotation_id: Ulid, pool: PoolKey, quantity: u32, range: DateRange) -> Self {
        Self {
            id: Ulid::new(),
            pool,
            quantity,
            range,
            source: LineSource::Quotation { quotation_id },
        }
    }
}

/// A committed claim on `quantity` units of a pool for `range`, owned by an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub order_id: Ulid,
    pub pool: PoolKey,
    pub quantity: u32,
    pub range: DateRange,
    pub source: LineSource,
    pub status: ReservationStatus,
}

impl Reservation {
    pub fn from_line(order_id: Ulid, line: &OrderLine) -> Self {
        Self {
            id: line.id,
            order_id,
            pool: line.pool,
            quantity: line.quantity,
            range: line.range,
            source: line.source,
            status: ReservationStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }
}

#[derive(Debug, Clone)]
pub struct PoolState {
    pub key: PoolKey,
    pub name: Option<String>,
    /// Units in existence.
    pub stock: u32,
    /// Every reservation ever made on this pool, sorted by `range.start`.
    pub reservations: Vec<Reservation>,
}

impl PoolState {
    pub fn new(key: PoolKey, name: Option<String>, stock: u32) -> Self {
        Self {
            key,
            name,
            stock,
            reservations: Vec::new(),
        }
    }

    /// Insert keeping the list sorted by start date.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.range.start <= reservation.range.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Flip an active reservation to cancelled. Returns false if it was
    /// unknown or already cancelled.
    pub fn cancel(&mut self, id: Ulid) -> bool {
        match self.reservations.iter_mut().find(|r| r.id == id) {
            Some(r) if r.is_active() => {
                r.status = ReservationStatus::Cancelled;
                true
            }
            _ => false,
        }
    }

    /// Reservations (any status) whose range overlaps `query`.
    /// Binary search drops everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.range.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.range.end > query.start)
    }

    pub fn active_overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Reservation> {
        self.overlapping(query).filter(|r| r.is_active())
    }

    pub fn active(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter().filter(|r| r.is_active())
    }
}

/// WAL record. Flat on purpose: one variant per state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProductRegistered {
        id: Ulid,
        name: Option<String>,
        stock: u32,
    },
    VariantRegistered {
        id: Ulid,
        product_id: Ulid,
        name: Option<String>,
        stock: u32,
    },
    StockSet {
        pool: PoolKey,
        stock: u32,
    },
    ReservationCreated {
        id: Ulid,
        order_id: Ulid,
        pool: PoolKey,
        quantity: u32,
        range: DateRange,
        source: LineSource,
    },
    /// All lines of an order committed together.
    OrderReserved {
        order_id: Ulid,
        lines: Vec<OrderLine>,
    },
    ReservationCancelled {
        id: Ulid,
        pool: PoolKey,
    },
    OrderCancelled {
        order_id: Ulid,
        reservation_ids: Vec<Ulid>,
    },
}

// ── Query result types ───────────────────────────────────────────

/// Outcome of an availability check. Unavailability is a normal value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    /// Units still free over the whole requested range.
    pub available_quantity: u32,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayUsage {
    pub date: NaiveDate,
    pub reserved: u32,
    pub free: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockInfo {
    pub pool: PoolKey,
    pub name: Option<String>,
    pub stock: u32,
}

#[cfg(test)]
pub(crate) fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
}
