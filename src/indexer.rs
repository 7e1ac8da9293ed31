//! Driver: batches output, calls the user batch function, marks indexed,
//! and exposes an observable progress/state machine.

use crate::block::{ByteCost, Entry};
use crate::core::CoreHandle;
use crate::storage::{StorageFactory, StorageLocation};
use crate::stream::MultiCoreIndexStream;
use crate::utils::unreachable_variant;
use crate::Result;
use anyhow::bail;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// The indexer's lifecycle state. Closed under a non-wildcard match
/// everywhere it's inspected; see [`crate::utils::unreachable_variant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Current {
    Idle,
    Indexing,
    Closing,
    Closed,
}

/// A snapshot of the indexer's observable state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexState {
    pub current: Current,
    pub remaining: u64,
    pub entries_per_second: f64,
}

/// User batch function: called at most once concurrently, from the driver
/// task. A returned error closes the pipeline without marking that batch's
/// entries indexed, so they re-deliver on the next run.
pub type BatchFn<T> = Arc<dyn Fn(Vec<Entry<T>>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Construction options for an [`Indexer`].
pub struct IndexerOptions<T> {
    pub batch: BatchFn<T>,
    pub storage: StorageLocation,
    pub max_batch: usize,
    pub reindex: bool,
}

impl<T> IndexerOptions<T> {
    pub fn new(batch: BatchFn<T>, storage: StorageLocation) -> Self {
        Self {
            batch,
            storage,
            max_batch: 100,
            reindex: false,
        }
    }

    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch;
        self
    }

    pub fn with_reindex(mut self, reindex: bool) -> Self {
        self.reindex = reindex;
        self
    }
}

struct Shared<T> {
    fan_in: Mutex<MultiCoreIndexStream<T>>,
    storage_factory: StorageFactory,
    reindex: bool,
    max_batch: usize,
    batch: BatchFn<T>,
    wake: Arc<Notify>,
    idle_notify: Arc<Notify>,
    indexing_notify: Arc<Notify>,
    state_tx: watch::Sender<IndexState>,
    closing: AtomicBool,
    error: Mutex<Option<String>>,
}

/// Driver over a set of cores. Runs a single background Tokio task that pulls
/// batches from the fan-in, invokes the batch function, and marks entries
/// indexed only once the batch succeeds.
pub struct Indexer<T: Clone + Send + Sync + ByteCost + 'static> {
    shared: Arc<Shared<T>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Clone + Send + Sync + ByteCost + 'static> Indexer<T> {
    pub async fn new(cores: Vec<CoreHandle<T>>, config: IndexerOptions<T>) -> Result<Arc<Self>> {
        let wake = Arc::new(Notify::new());
        let storage_factory = config.storage.into_factory();
        let mut fan_in = MultiCoreIndexStream::new(storage_factory.clone(), wake.clone());
        for core in cores {
            fan_in.add_core(core, config.reindex).await?;
        }

        let (state_tx, _rx) = watch::channel(IndexState {
            current: Current::Indexing,
            remaining: fan_in.remaining(),
            entries_per_second: 0.0,
        });

        let shared = Arc::new(Shared {
            fan_in: Mutex::new(fan_in),
            storage_factory,
            reindex: config.reindex,
            max_batch: config.max_batch,
            batch: config.batch,
            wake,
            idle_notify: Arc::new(Notify::new()),
            indexing_notify: Arc::new(Notify::new()),
            state_tx,
            closing: AtomicBool::new(false),
            error: Mutex::new(None),
        });

        let driver_shared = shared.clone();
        let handle = tokio::spawn(async move { driver_loop(driver_shared).await });

        Ok(Arc::new(Self {
            shared,
            driver: Mutex::new(Some(handle)),
        }))
    }

    pub fn state(&self) -> IndexState {
        *self.shared.state_tx.borrow()
    }

    pub fn on_state_change(&self) -> watch::Receiver<IndexState> {
        self.shared.state_tx.subscribe()
    }

    pub fn on_idle(&self) -> Arc<Notify> {
        self.shared.idle_notify.clone()
    }

    pub fn on_indexing(&self) -> Arc<Notify> {
        self.shared.indexing_notify.clone()
    }

    /// Resolves immediately if already idle; otherwise resolves on the next
    /// transition into `Idle`.
    pub async fn idle(&self) {
        loop {
            if self.state().current == Current::Idle {
                return;
            }
            let notified = self.shared.idle_notify.notified();
            if self.state().current == Current::Idle {
                return;
            }
            notified.await;
        }
    }

    /// Rejected if closing or closed.
    pub async fn add_core(&self, core: CoreHandle<T>) -> Result<()> {
        match self.state().current {
            Current::Closing | Current::Closed => {
                bail!("cannot add a core to an indexer that is closing or closed")
            }
            Current::Idle | Current::Indexing => {}
        }
        let mut fan_in = self.shared.fan_in.lock().await;
        fan_in.add_core(core, self.shared.reindex).await?;
        self.shared.wake.notify_waiters();
        Ok(())
    }

    /// Take and clear the error, if any, that caused the driver to stop.
    pub async fn take_error(&self) -> Option<String> {
        self.shared.error.lock().await.take()
    }

    pub async fn close(&self) -> Result<()> {
        match self.state().current {
            Current::Closing | Current::Closed => {
                bail!("indexer is already closing or closed")
            }
            Current::Idle | Current::Indexing => {}
        }
        self.shared.closing.store(true, Ordering::SeqCst);
        publish_state(&self.shared, Current::Closing).await;
        self.shared.wake.notify_waiters();

        let handle = self.driver.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.shared.fan_in.lock().await.destroy().await?;
        publish_state(&self.shared, Current::Closed).await;
        self.shared.idle_notify.notify_waiters();
        Ok(())
    }

    /// Valid only once [`Self::close`] has completed.
    pub async fn unlink(&self) -> Result<()> {
        if self.state().current != Current::Closed {
            bail!("cannot unlink an indexer that is not closed");
        }
        self.shared.fan_in.lock().await.unlink().await
    }
}

async fn publish_state(shared: &Arc<Shared<impl Clone + Send + Sync + ByteCost>>, current: Current) {
    let (remaining, entries_per_second) = {
        let fan_in = shared.fan_in.lock().await;
        let prev = *shared.state_tx.borrow();
        (fan_in.remaining(), prev.entries_per_second)
    };
    let state = IndexState {
        current,
        remaining,
        entries_per_second,
    };
    let prev_current = shared.state_tx.borrow().current;
    let _ = shared.state_tx.send(state);
    if current == Current::Idle && prev_current != Current::Idle {
        shared.idle_notify.notify_waiters();
    }
    if current == Current::Indexing && prev_current != Current::Indexing {
        shared.indexing_notify.notify_waiters();
    }
}

async fn driver_loop<T: Clone + Send + Sync + ByteCost + 'static>(shared: Arc<Shared<T>>) {
    let mut rate = 0.0f64;
    let mut rate_start = Instant::now();
    let mut first_sample = true;

    loop {
        if shared.closing.load(Ordering::SeqCst) {
            return;
        }

        let pulled = {
            let mut fan_in = shared.fan_in.lock().await;
            fan_in.try_pull_batch(shared.max_batch).await
        };

        let entries = match pulled {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "fatal error while pulling batch");
                *shared.error.lock().await = Some(e.to_string());
                shared.closing.store(true, Ordering::SeqCst);
                publish_state(&shared, Current::Closing).await;
                if let Err(e) = shared.fan_in.lock().await.destroy().await {
                    error!(error = %e, "error destroying fan-in during fatal shutdown");
                }
                publish_state(&shared, Current::Closed).await;
                shared.idle_notify.notify_waiters();
                return;
            }
        };

        if entries.is_empty() {
            let (remaining, is_drained) = {
                let fan_in = shared.fan_in.lock().await;
                (fan_in.remaining(), fan_in.is_drained())
            };
            if remaining == 0 && is_drained {
                publish_state(&shared, Current::Idle).await;
            }
            tokio::select! {
                _ = shared.wake.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
            continue;
        }

        publish_state(&shared, Current::Indexing).await;

        let count = entries.len();
        debug!(count, "batch starting");
        let batch_entries = entries.clone();
        let result = (shared.batch)(batch_entries).await;

        match result {
            Ok(()) => {
                debug!(count, "batch completed");
                let mut fan_in = shared.fan_in.lock().await;
                for entry in &entries {
                    fan_in.set_indexed(&entry.discovery_id, entry.index);
                }
                drop(fan_in);

                let now = Instant::now();
                let elapsed = now.duration_since(rate_start).as_secs_f64().max(1e-6);
                let r = count as f64 / elapsed;
                rate = if first_sample {
                    first_sample = false;
                    r
                } else {
                    r + (rate - r) / 5.0
                };
                rate_start = now;

                {
                    let mut guard = shared.state_tx.borrow().to_owned();
                    guard.entries_per_second = rate;
                    let _ = shared.state_tx.send(guard);
                }

                let (remaining, is_drained) = {
                    let fan_in = shared.fan_in.lock().await;
                    (fan_in.remaining(), fan_in.is_drained())
                };
                if remaining == 0 && is_drained {
                    publish_state(&shared, Current::Idle).await;
                } else {
                    publish_state(&shared, Current::Indexing).await;
                }
            }
            Err(e) => {
                error!(error = %e, "batch function failed, closing pipeline");
                *shared.error.lock().await = Some(e.to_string());
                shared.closing.store(true, Ordering::SeqCst);
                publish_state(&shared, Current::Closing).await;
                if let Err(e) = shared.fan_in.lock().await.destroy().await {
                    error!(error = %e, "error destroying fan-in during fatal shutdown");
                }
                publish_state(&shared, Current::Closed).await;
                shared.idle_notify.notify_waiters();
                return;
            }
        }
    }
}

/// Describes a state for logging; exists so call sites can avoid a fifth,
/// silently-ignored arm if `Current` ever grows a variant.
pub fn describe(current: Current) -> &'static str {
    match current {
        Current::Idle => "idle",
        Current::Indexing => "indexing",
        Current::Closing => "closing",
        Current::Closed => "closed",
    }
}

#[allow(dead_code)]
fn assert_exhaustive(current: Current) {
    match current {
        Current::Idle => {}
        Current::Indexing => {}
        Current::Closing => {}
        Current::Closed => {}
        #[allow(unreachable_patterns)]
        _ => unreachable_variant("Current"),
    }
}
