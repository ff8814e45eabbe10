use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Unknown product, variant, or reservation id.
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("invalid interval: start {start} is not before end {end}")]
    InvalidInterval { start: NaiveDate, end: NaiveDate },
    #[error("invalid quantity: {0}")]
    InvalidQuantity(u32),
    /// Stock was taken by another writer between the caller's check and this commit.
    /// Safe to retry once after a fresh availability check.
    #[error("conflict on product {product_id}: requested {requested}, only {available} free")]
    Conflict {
        product_id: Ulid,
        requested: u32,
        available: u32,
    },
    #[error("stock {stock} is below the {committed} units already reserved")]
    StockBelowCommitted { stock: u32, committed: u32 },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl EngineError {
    /// True for outcomes where a fresh check may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }
}
