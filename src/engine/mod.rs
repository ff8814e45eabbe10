mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{assess, daily_usage, peak_usage, reserved_quantity};
pub use error::EngineError;
pub use store::IntervalStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};

use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::Wal;

pub type SharedPoolState = Arc<RwLock<PoolState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL. Appends that queue up while a flush is
/// in progress are written together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Flush what we have before compaction sees the file.
                    deferred = Some(other);
                    break;
                }
            }
        }

        metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    let result = match append_err {
        Some(e) => Err(e),
        None => wal.flush_sync(),
    };
    // Every caller of a failed batch sees an error and applies nothing, so
    // none of its frames may survive into a later flush.
    if let Err(e) = &result {
        tracing::error!("WAL flush failed, discarding {} appends: {e}", batch.len());
        if let Err(e) = wal.discard_unsynced() {
            tracing::error!("failed to roll back WAL after flush error: {e}");
        }
    }
    result
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// The availability and reservation engine.
///
/// Reads take a pool's read lock; every write holds the pool's write lock from
/// the capacity check through the WAL append to the in-memory apply, so a
/// check and the insert it guards can never interleave with another writer.
pub struct Engine {
    pub store: IntervalStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Serializes catalog registrations so id uniqueness holds.
    pub(super) catalog_lock: Mutex<()>,
    /// Writers hold it shared, compaction exclusively. Always taken before
    /// any pool lock.
    pub(super) compaction_gate: RwLock<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: IntervalStore::new(),
            wal_tx,
            notify,
            catalog_lock: Mutex::new(()),
            compaction_gate: RwLock::new(()),
        };

        // Sole owner of every pool here, so try_write never contends. Blocking
        // lock calls are off limits: this may run inside the runtime.
        for event in &events {
            match event {
                Event::ProductRegistered { id, name, stock } => {
                    engine
                        .store
                        .insert_pool(PoolState::new(PoolKey::product(*id), name.clone(), *stock));
                }
                Event::VariantRegistered {
                    id,
                    product_id,
                    name,
                    stock,
                } => {
                    engine.store.insert_pool(PoolState::new(
                        PoolKey::variant(*product_id, *id),
                        name.clone(),
                        *stock,
                    ));
                }
                other => {
                    for key in engine.store.event_pools(other) {
                        let Some(pool) = engine.store.get_pool(&key) else {
                            continue;
                        };
                        let mut guard = pool
                            .try_write()
                            .map_err(|_| io::Error::other("replay: pool lock contended"))?;
                        engine.store.apply_event(&mut guard, other);
                    }
                }
            }
        }

        tracing::info!(
            events = events.len(),
            pools = engine.store.pool_count(),
            "replayed reservation log from {}",
            wal_path.display()
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// WAL-append, then apply, then notify. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        ps: &mut PoolState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(ps, event);
        self.notify.send(ps.key, event);
        Ok(())
    }

    /// Committed events for one pool, as they happen.
    pub fn subscribe(&self, pool: PoolKey) -> broadcast::Receiver<Event> {
        self.notify.subscribe(pool)
    }
}
