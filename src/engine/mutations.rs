use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use tokio::sync::{oneshot, OwnedRwLockWriteGuard};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::peak_usage;
use super::conflict::{check_capacity, validate_line, validate_range};
use super::{Engine, EngineError, WalCommand};

fn validate_name(name: &Option<String>) -> Result<(), EngineError> {
    match name {
        Some(n) if n.len() > MAX_NAME_LEN => Err(EngineError::LimitExceeded("name too long")),
        _ => Ok(()),
    }
}

fn validate_stock(stock: u32) -> Result<(), EngineError> {
    if stock > MAX_STOCK {
        return Err(EngineError::LimitExceeded("stock too large"));
    }
    Ok(())
}

impl Engine {
    // ── Catalog ──────────────────────────────────────────────

    pub async fn register_product(
        &self,
        id: Ulid,
        name: Option<String>,
        stock: u32,
    ) -> Result<(), EngineError> {
        validate_name(&name)?;
        validate_stock(stock)?;
        let _gate = self.compaction_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        if self.store.pool_count() >= MAX_POOLS {
            return Err(EngineError::LimitExceeded("too many products"));
        }
        if self.store.contains_pool(&PoolKey::product(id)) || self.store.is_variant(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ProductRegistered { id, name: name.clone(), stock };
        self.wal_append(&event).await?;
        let key = PoolKey::product(id);
        self.store.insert_pool(PoolState::new(key, name, stock));
        self.notify.send(key, &event);
        info!(product = %id, stock, "product registered");
        Ok(())
    }

    pub async fn register_variant(
        &self,
        id: Ulid,
        product_id: Ulid,
        name: Option<String>,
        stock: u32,
    ) -> Result<(), EngineError> {
        validate_name(&name)?;
        validate_stock(stock)?;
        let _gate = self.compaction_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        if self.store.pool_count() >= MAX_POOLS {
            return Err(EngineError::LimitExceeded("too many products"));
        }
        if !self.store.contains_pool(&PoolKey::product(product_id)) {
            return Err(EngineError::NotFound(product_id));
        }
        if self.store.is_variant(&id) || self.store.contains_pool(&PoolKey::product(id)) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::VariantRegistered {
            id,
            product_id,
            name: name.clone(),
            stock,
        };
        self.wal_append(&event).await?;
        let key = PoolKey::variant(product_id, id);
        self.store.insert_pool(PoolState::new(key, name, stock));
        self.notify.send(key, &event);
        info!(product = %product_id, variant = %id, stock, "variant registered");
        Ok(())
    }

    /// Change a pool's stock. Refused if some day already has more units
    /// reserved than the new stock.
    pub async fn set_stock(
        &self,
        product_id: Ulid,
        variant_id: Option<Ulid>,
        stock: u32,
    ) -> Result<(), EngineError> {
        validate_stock(stock)?;
        let _gate = self.compaction_gate.read().await;
        let pool = self.store.resolve(product_id, variant_id)?;
        let mut guard = pool.write().await;

        let committed = peak_usage(guard.active());
        if committed > stock {
            return Err(EngineError::StockBelowCommitted { stock, committed });
        }

        let event = Event::StockSet { pool: guard.key, stock };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(pool = %guard.key, stock, "stock updated");
        Ok(())
    }

    // ── Reservations ─────────────────────────────────────────

    /// Reserve `quantity` units of a product (or one of its variants) for
    /// `[start, end)` on behalf of `order_id`. Returns the new reservation id.
    pub async fn create_reservation(
        &self,
        product_id: Ulid,
        variant_id: Option<Ulid>,
        order_id: Ulid,
        quantity: u32,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Ulid, EngineError> {
        let range = validate_range(start, end)?;
        let line = OrderLine::direct(PoolKey::new(product_id, variant_id), quantity, range);
        self.reserve_line(order_id, line).await
    }

    /// Commit a single order line with a caller-chosen reservation id.
    pub async fn reserve_line(&self, order_id: Ulid, line: OrderLine) -> Result<Ulid, EngineError> {
        validate_line(&line)?;
        let _gate = self.compaction_gate.read().await;
        let pool = self
            .store
            .resolve(line.pool.product_id, line.pool.variant_id)?;
        let mut guard = pool.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_POOL {
            return Err(EngineError::LimitExceeded("too many reservations on product"));
        }
        if self.store.contains_reservation(&line.id) {
            return Err(EngineError::AlreadyExists(line.id));
        }

        if let Err(e) = check_capacity(&guard, &line.range, line.quantity, &[]) {
            metrics::counter!(observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
            debug!(pool = %line.pool, range = %line.range, quantity = line.quantity, "reservation rejected: {e}");
            return Err(e);
        }

        let event = Event::ReservationCreated {
            id: line.id,
            order_id,
            pool: line.pool,
            quantity: line.quantity,
            range: line.range,
            source: line.source,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        info!(
            reservation = %line.id,
            order = %order_id,
            pool = %line.pool,
            range = %line.range,
            quantity = line.quantity,
            "reservation created"
        );
        Ok(line.id)
    }

    /// Reserve every line of an order, or nothing. Lines may target different
    /// pools; pools are locked in key order so concurrent batches cannot deadlock.
    pub async fn create_order_reservations(
        &self,
        order_id: Ulid,
        lines: Vec<OrderLine>,
    ) -> Result<Vec<Ulid>, EngineError> {
        if lines.is_empty() {
            return Ok(Vec::new());
        }
        if lines.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("order has too many lines"));
        }
        let mut seen = HashSet::new();
        for line in &lines {
            validate_line(line)?;
            if !seen.insert(line.id) {
                return Err(EngineError::AlreadyExists(line.id));
            }
        }

        let _gate = self.compaction_gate.read().await;

        let mut keys: Vec<PoolKey> = lines.iter().map(|l| l.pool).collect();
        keys.sort();
        keys.dedup();

        let mut guards: Vec<OwnedRwLockWriteGuard<PoolState>> = Vec::with_capacity(keys.len());
        let mut slot: HashMap<PoolKey, usize> = HashMap::new();
        for key in &keys {
            let pool = self.store.resolve(key.product_id, key.variant_id)?;
            let guard = pool.write_owned().await;
            if guard.reservations.len() + lines.len() > MAX_RESERVATIONS_PER_POOL {
                return Err(EngineError::LimitExceeded("too many reservations on product"));
            }
            slot.insert(*key, guards.len());
            guards.push(guard);
        }

        // Phase 1: validate against current state plus earlier lines of this order.
        let mut pending: HashMap<PoolKey, Vec<(DateRange, u32)>> = HashMap::new();
        for line in &lines {
            if self.store.contains_reservation(&line.id) {
                return Err(EngineError::AlreadyExists(line.id));
            }
            let guard = &guards[slot[&line.pool]];
            let earlier = pending.entry(line.pool).or_default();
            if let Err(e) = check_capacity(guard, &line.range, line.quantity, earlier) {
                metrics::counter!(observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
                debug!(order = %order_id, pool = %line.pool, range = %line.range, "order rejected: {e}");
                return Err(e);
            }
            earlier.push((line.range, line.quantity));
        }

        // Phase 2: one WAL record, then apply to every pool.
        let ids: Vec<Ulid> = lines.iter().map(|l| l.id).collect();
        let count = lines.len();
        let event = Event::OrderReserved { order_id, lines };
        self.wal_append(&event).await?;
        for guard in guards.iter_mut() {
            self.store.apply_event(guard, &event);
            self.notify.send(guard.key, &event);
        }

        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(count as u64);
        info!(order = %order_id, lines = count, pools = keys.len(), "order reserved");
        Ok(ids)
    }

    /// Cancel every active reservation of an order. Returns how many were
    /// cancelled; an unknown or already cancelled order yields `Ok(0)`.
    pub async fn cancel_order_reservations(&self, order_id: Ulid) -> Result<usize, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let ids = self.store.reservations_of_order(&order_id);
        if ids.is_empty() {
            return Ok(0);
        }

        let mut keys: Vec<PoolKey> = ids
            .iter()
            .filter_map(|id| self.store.pool_of_reservation(id))
            .collect();
        keys.sort();
        keys.dedup();

        let mut guards: Vec<OwnedRwLockWriteGuard<PoolState>> = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(pool) = self.store.get_pool(key) {
                guards.push(pool.write_owned().await);
            }
        }

        let active: Vec<Ulid> = ids
            .into_iter()
            .filter(|id| {
                guards
                    .iter()
                    .any(|g| g.get(*id).is_some_and(|r| r.is_active()))
            })
            .collect();
        if active.is_empty() {
            return Ok(0);
        }

        let count = active.len();
        let event = Event::OrderCancelled {
            order_id,
            reservation_ids: active,
        };
        self.wal_append(&event).await?;
        for guard in guards.iter_mut() {
            self.store.apply_event(guard, &event);
            self.notify.send(guard.key, &event);
        }

        metrics::counter!(observability::RESERVATIONS_CANCELLED_TOTAL).increment(count as u64);
        info!(order = %order_id, cancelled = count, "order reservations cancelled");
        Ok(count)
    }

    /// Cancel one reservation. Cancelling an already cancelled one is a no-op.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        let key = self
            .store
            .pool_of_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let pool = self.store.get_pool(&key).ok_or(EngineError::NotFound(id))?;
        let mut guard = pool.write().await;
        if !guard.get(id).is_some_and(|r| r.is_active()) {
            return Ok(());
        }

        let event = Event::ReservationCancelled { id, pool: key };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        info!(reservation = %id, pool = %key, "reservation cancelled");
        Ok(())
    }

    // ── Log maintenance ──────────────────────────────────────

    /// Rewrite the WAL with the minimal event sequence that rebuilds the
    /// current state, cancelled reservations included.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;

        let mut events = Vec::new();
        // Sorted keys put each base pool before its variants.
        for (key, pool) in self.store.pools_sorted() {
            let guard = pool.read().await;
            events.push(match key.variant_id {
                None => Event::ProductRegistered {
                    id: key.product_id,
                    name: guard.name.clone(),
                    stock: guard.stock,
                },
                Some(variant_id) => Event::VariantRegistered {
                    id: variant_id,
                    product_id: key.product_id,
                    name: guard.name.clone(),
                    stock: guard.stock,
                },
            });
            for r in &guard.reservations {
                events.push(Event::ReservationCreated {
                    id: r.id,
                    order_id: r.order_id,
                    pool: r.pool,
                    quantity: r.quantity,
                    range: r.range,
                    source: r.source,
                });
                if !r.is_active() {
                    events.push(Event::ReservationCancelled { id: r.id, pool: r.pool });
                }
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        info!(events = count, "reservation log compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
