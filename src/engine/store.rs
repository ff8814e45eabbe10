use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::{EngineError, SharedPoolState};

/// Reservation storage: one sorted interval list per stock pool plus the
/// reverse indexes the manager needs to find a reservation or an order's
/// reservations without scanning every pool.
pub struct IntervalStore {
    pools: DashMap<PoolKey, SharedPoolState>,
    reservation_to_pool: DashMap<Ulid, PoolKey>,
    order_to_reservations: DashMap<Ulid, Vec<Ulid>>,
    variant_to_product: DashMap<Ulid, Ulid>,
}

impl Default for IntervalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IntervalStore {
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
            reservation_to_pool: DashMap::new(),
            order_to_reservations: DashMap::new(),
            variant_to_product: DashMap::new(),
        }
    }

    // ── Pools ────────────────────────────────────────────────

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn contains_pool(&self, key: &PoolKey) -> bool {
        self.pools.contains_key(key)
    }

    pub fn get_pool(&self, key: &PoolKey) -> Option<SharedPoolState> {
        self.pools.get(key).map(|e| e.value().clone())
    }

    pub fn insert_pool(&self, state: PoolState) {
        if let Some(variant_id) = state.key.variant_id {
            self.variant_to_product.insert(variant_id, state.key.product_id);
        }
        self.pools.insert(state.key, Arc::new(RwLock::new(state)));
    }

    /// Snapshot of every pool handle, sorted by key. Lets callers await on
    /// the pool locks without holding a map shard.
    pub fn pools_sorted(&self) -> Vec<(PoolKey, SharedPoolState)> {
        let mut pools: Vec<_> = self
            .pools
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        pools.sort_by_key(|(k, _)| *k);
        pools
    }

    pub fn is_variant(&self, id: &Ulid) -> bool {
        self.variant_to_product.contains_key(id)
    }

    /// Look up the pool a caller means by `(product_id, variant_id)`.
    /// A variant that belongs to another product is reported as not found.
    pub fn resolve(&self, product_id: Ulid, variant_id: Option<Ulid>) -> Result<SharedPoolState, EngineError> {
        if let Some(vid) = variant_id {
            match self.variant_to_product.get(&vid) {
                Some(owner) if *owner == product_id => {}
                _ => return Err(EngineError::NotFound(vid)),
            }
        }
        self.get_pool(&PoolKey::new(product_id, variant_id))
            .ok_or(EngineError::NotFound(variant_id.unwrap_or(product_id)))
    }

    // ── Reservation index ────────────────────────────────────

    pub fn contains_reservation(&self, id: &Ulid) -> bool {
        self.reservation_to_pool.contains_key(id)
    }

    pub fn pool_of_reservation(&self, id: &Ulid) -> Option<PoolKey> {
        self.reservation_to_pool.get(id).map(|e| *e.value())
    }

    pub fn reservations_of_order(&self, order_id: &Ulid) -> Vec<Ulid> {
        self.order_to_reservations
            .get(order_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    fn index_reservation(&self, id: Ulid, order_id: Ulid, pool: PoolKey) {
        self.reservation_to_pool.insert(id, pool);
        self.order_to_reservations.entry(order_id).or_default().push(id);
    }

    // ── Event application ────────────────────────────────────

    /// Pools a pool-scoped event touches. Catalog registrations return
    /// nothing; they are applied at the map level.
    pub fn event_pools(&self, event: &Event) -> Vec<PoolKey> {
        let mut keys: Vec<PoolKey> = match event {
            Event::StockSet { pool, .. }
            | Event::ReservationCreated { pool, .. }
            | Event::ReservationCancelled { pool, .. } => vec![*pool],
            Event::OrderReserved { lines, .. } => lines.iter().map(|l| l.pool).collect(),
            Event::OrderCancelled { reservation_ids, .. } => reservation_ids
                .iter()
                .filter_map(|id| self.pool_of_reservation(id))
                .collect(),
            Event::ProductRegistered { .. } | Event::VariantRegistered { .. } => Vec::new(),
        };
        keys.sort();
        keys.dedup();
        keys
    }

    /// Apply the part of `event` that concerns `ps`. The caller holds the
    /// pool's write lock; multi-pool events are applied once per pool.
    pub fn apply_event(&self, ps: &mut PoolState, event: &Event) {
        match event {
            Event::StockSet { pool, stock } if *pool == ps.key => {
                ps.stock = *stock;
            }
            Event::ReservationCreated {
                id,
                order_id,
                pool,
                quantity,
                range,
                source,
            } if *pool == ps.key => {
                ps.insert_reservation(Reservation {
                    id: *id,
                    order_id: *order_id,
                    pool: *pool,
                    quantity: *quantity,
                    range: *range,
                    source: *source,
                    status: ReservationStatus::Active,
                });
                self.index_reservation(*id, *order_id, *pool);
            }
            Event::OrderReserved { order_id, lines } => {
                let key = ps.key;
                for line in lines.iter().filter(|l| l.pool == key) {
                    ps.insert_reservation(Reservation::from_line(*order_id, line));
                    self.index_reservation(line.id, *order_id, line.pool);
                }
            }
            Event::ReservationCancelled { id, pool } if *pool == ps.key => {
                ps.cancel(*id);
            }
            Event::OrderCancelled { reservation_ids, .. } => {
                for id in reservation_ids {
                    if self.pool_of_reservation(id) == Some(ps.key) {
                        ps.cancel(*id);
                    }
                }
            }
            _ => {}
        }
    }
}
