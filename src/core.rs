//! The collaborator trait modelling an append-only, partially-downloadable log.

use crate::block::ByteCost;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Events a [`Core`] emits as its local state changes.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// The core's length grew.
    Append,
    /// Block at this position became locally present.
    Download(u64),
    /// The core will emit no further events.
    Close,
}

/// An append-only log the indexer drains. Implementations are expected to be
/// cheap to clone (wrap in `Arc`) and safe to share across the streams that
/// read from them.
#[async_trait]
pub trait Core: Send + Sync {
    type Block: Clone + Send + Sync + ByteCost;

    /// Resolves once the core is ready to be read (keys available, initial
    /// sync complete, whatever that means for the implementation).
    async fn ready(&self) -> Result<()>;

    /// Refresh locally cached metadata (principally `length()`). When `wait`
    /// is true, waits for the network/replication layer to confirm the
    /// latest known length before returning.
    async fn update(&self, wait: bool) -> Result<()>;

    /// One past the highest known position in this core.
    fn length(&self) -> u64;

    /// The core's public key.
    fn key(&self) -> [u8; 32];

    /// The core's discovery key, used to derive its storage sub-path.
    fn discovery_key(&self) -> [u8; 32];

    /// Fetch the block at `index`, or `None` if it is not locally present.
    /// When `wait` is true, waits for the block to arrive rather than
    /// returning `None` immediately; the indexer always calls this with
    /// `wait: false`.
    async fn get(&self, index: u64, wait: bool) -> Result<Option<Self::Block>>;

    /// Subscribe to this core's event stream. Each call creates an
    /// independent receiver; closing a stream drops its receiver, ending
    /// that subscription without affecting others.
    fn subscribe(&self) -> broadcast::Receiver<CoreEvent>;
}

/// A shared, type-erased handle to a [`Core`], as stored by the indexer.
pub type CoreHandle<T> = Arc<dyn Core<Block = T>>;

/// Lowercase hex discovery id for a core, used as the key under which its
/// [`crate::stream::CoreIndexStream`] is registered in the fan-in.
pub fn discovery_id(discovery_key: &[u8; 32]) -> String {
    let mut out = String::with_capacity(64);
    for byte in discovery_key {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Stable per-core storage sub-path derived from a discovery id: the first
/// two hex bytes, then the next two, then the full id. This is an external
/// compatibility contract — the same discovery key must always resolve to
/// the same path.
pub fn storage_path(discovery_id: &str) -> String {
    format!("{}/{}/{}", &discovery_id[0..2], &discovery_id[2..4], discovery_id)
}

#[cfg(any(test, feature = "test-util"))]
pub mod testing {
    //! An in-memory [`Core`] double used by the crate's own test suite and
    //! available to downstream users under the `test-util` feature.

    use super::*;
    use tokio::sync::{broadcast, Mutex};

    /// In-memory, single-writer core. `append` and `mark_downloaded` push
    /// onto the broadcast channel so subscribers observe growth the same way
    /// they would against a real networked core.
    pub struct MemoryCore<T> {
        key: [u8; 32],
        discovery_key: [u8; 32],
        blocks: Mutex<Vec<Option<T>>>,
        length: std::sync::atomic::AtomicU64,
        tx: broadcast::Sender<CoreEvent>,
    }

    impl<T: Clone + Send + Sync + ByteCost> MemoryCore<T> {
        pub fn new(id: u8) -> Arc<Self> {
            let (tx, _rx) = broadcast::channel(1024);
            Arc::new(Self {
                key: [id; 32],
                discovery_key: [id; 32],
                blocks: Mutex::new(Vec::new()),
                length: std::sync::atomic::AtomicU64::new(0),
                tx,
            })
        }

        /// Append a block that is immediately locally present (as if it were
        /// authored locally rather than downloaded).
        pub async fn append(&self, block: T) {
            let mut blocks = self.blocks.lock().await;
            blocks.push(Some(block));
            self.length
                .store(blocks.len() as u64, std::sync::atomic::Ordering::SeqCst);
            let _ = self.tx.send(CoreEvent::Append);
        }

        /// Append a placeholder for a remote block that has not yet
        /// downloaded (length grows, but `get` returns `None` until
        /// [`Self::mark_downloaded`]).
        pub async fn append_remote(&self) -> u64 {
            let mut blocks = self.blocks.lock().await;
            blocks.push(None);
            let index = blocks.len() as u64 - 1;
            self.length
                .store(blocks.len() as u64, std::sync::atomic::Ordering::SeqCst);
            let _ = self.tx.send(CoreEvent::Append);
            index
        }

        pub async fn mark_downloaded(&self, index: u64, block: T) {
            let mut blocks = self.blocks.lock().await;
            blocks[index as usize] = Some(block);
            let _ = self.tx.send(CoreEvent::Download(index));
        }

        pub fn close(&self) {
            let _ = self.tx.send(CoreEvent::Close);
        }
    }

    #[async_trait]
    impl<T: Clone + Send + Sync + ByteCost> Core for MemoryCore<T> {
        type Block = T;

        async fn ready(&self) -> Result<()> {
            Ok(())
        }

        async fn update(&self, _wait: bool) -> Result<()> {
            Ok(())
        }

        fn length(&self) -> u64 {
            self.length.load(std::sync::atomic::Ordering::SeqCst)
        }

        fn key(&self) -> [u8; 32] {
            self.key
        }

        fn discovery_key(&self) -> [u8; 32] {
            self.discovery_key
        }

        async fn get(&self, index: u64, _wait: bool) -> Result<Option<T>> {
            let blocks = self.blocks.lock().await;
            Ok(blocks.get(index as usize).cloned().flatten())
        }

        fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
            self.tx.subscribe()
        }
    }

    /// A core whose `ready()` always fails, used to exercise the
    /// readiness-failure path of `add_core` (§7: tightened in this crate to
    /// a synchronous error rather than a silently-dangling, never-routed
    /// stream — see DESIGN.md).
    pub struct NeverReadyCore {
        key: [u8; 32],
        discovery_key: [u8; 32],
    }

    impl NeverReadyCore {
        pub fn new(id: u8) -> Arc<Self> {
            Arc::new(Self {
                key: [id; 32],
                discovery_key: [id; 32],
            })
        }
    }

    #[async_trait]
    impl Core for NeverReadyCore {
        type Block = Vec<u8>;

        async fn ready(&self) -> Result<()> {
            anyhow::bail!("core never becomes ready")
        }

        async fn update(&self, _wait: bool) -> Result<()> {
            Ok(())
        }

        fn length(&self) -> u64 {
            0
        }

        fn key(&self) -> [u8; 32] {
            self.key
        }

        fn discovery_key(&self) -> [u8; 32] {
            self.discovery_key
        }

        async fn get(&self, _index: u64, _wait: bool) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }

        fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
            let (tx, rx) = broadcast::channel(1);
            let _ = tx;
            rx
        }
    }
}
