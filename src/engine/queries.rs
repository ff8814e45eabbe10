use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{assess, daily_usage};
use super::conflict::{validate_quantity, validate_range};
use super::{Engine, EngineError};

impl Engine {
    /// How many more units of a pool can be rented for `[start, end)`, and
    /// whether `quantity` of them fit.
    pub async fn check_availability(
        &self,
        product_id: Ulid,
        variant_id: Option<Ulid>,
        start: NaiveDate,
        end: NaiveDate,
        quantity: u32,
    ) -> Result<Availability, EngineError> {
        let range = validate_range(start, end)?;
        validate_quantity(quantity)?;
        let pool = self.store.resolve(product_id, variant_id)?;
        let guard = pool.read().await;
        Ok(assess(&guard, &range, quantity))
    }

    pub async fn availability_calendar(
        &self,
        product_id: Ulid,
        variant_id: Option<Ulid>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DayUsage>, EngineError> {
        let window = validate_range(start, end)?;
        if window.days() > MAX_CALENDAR_DAYS {
            return Err(EngineError::LimitExceeded("calendar window too wide"));
        }
        let pool = self.store.resolve(product_id, variant_id)?;
        let guard = pool.read().await;
        Ok(daily_usage(&guard, &window))
    }

    /// Every reservation of an order, cancelled ones included, oldest first.
    pub async fn order_reservations(&self, order_id: Ulid) -> Vec<Reservation> {
        let mut out = Vec::new();
        for id in self.store.reservations_of_order(&order_id) {
            let Some(key) = self.store.pool_of_reservation(&id) else {
                continue;
            };
            let Some(pool) = self.store.get_pool(&key) else {
                continue;
            };
            let guard = pool.read().await;
            if let Some(r) = guard.get(id) {
                out.push(r.clone());
            }
        }
        out.sort_by_key(|r| r.id);
        out
    }

    pub async fn pool_reservations(
        &self,
        product_id: Ulid,
        variant_id: Option<Ulid>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let pool = self.store.resolve(product_id, variant_id)?;
        let guard = pool.read().await;
        Ok(guard.reservations.clone())
    }

    pub async fn list_stock(&self) -> Vec<StockInfo> {
        let mut out = Vec::with_capacity(self.store.pool_count());
        for (key, pool) in self.store.pools_sorted() {
            let guard = pool.read().await;
            out.push(StockInfo {
                pool: key,
                name: guard.name.clone(),
                stock: guard.stock,
            });
        }
        out
    }
}
