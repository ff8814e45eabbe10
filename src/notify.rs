use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, PoolKey};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed events, one channel per stock pool.
pub struct NotifyHub {
    channels: DashMap<PoolKey, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a pool. Creates the channel if needed.
    pub fn subscribe(&self, pool: PoolKey) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(pool)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, pool: PoolKey, event: &Event) {
        if let Some(sender) = self.channels.get(&pool) {
            let _ = sender.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let pool = PoolKey::product(Ulid::new());
        let mut rx = hub.subscribe(pool);

        let event = Event::StockSet { pool, stock: 4 };
        hub.send(pool, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn variant_channel_is_separate() {
        let hub = NotifyHub::new();
        let product = Ulid::new();
        let base = PoolKey::product(product);
        let variant = PoolKey::variant(product, Ulid::new());
        let mut base_rx = hub.subscribe(base);

        hub.send(variant, &Event::StockSet { pool: variant, stock: 1 });
        assert!(base_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let pool = PoolKey::product(Ulid::new());
        hub.send(pool, &Event::StockSet { pool, stock: 0 });
    }
}
