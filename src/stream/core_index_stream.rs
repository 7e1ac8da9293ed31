//! Single-core pull source.

use crate::bitfield::Bitfield;
use crate::block::Entry;
use crate::core::{discovery_id, storage_path, CoreEvent, CoreHandle};
use crate::storage::StorageFactory;
use crate::Result;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tracing::debug;

/// Drains a single core: emits not-yet-indexed, locally-present blocks, and
/// persists its indexed set as it goes. Owned and driven exclusively by the
/// task holding its parent [`crate::stream::MultiCoreIndexStream`]'s mutex.
pub struct CoreIndexStream<T> {
    core: CoreHandle<T>,
    discovery_id: String,
    next_scan: u64,
    indexed: Bitfield,
    in_progress: Bitfield,
    in_flight: u64,
    downloaded: BTreeSet<u64>,
    drained: bool,
    destroying: Arc<AtomicBool>,
    core_rx: broadcast::Receiver<CoreEvent>,
    wake: Arc<Notify>,
}

impl<T: Clone + Send + Sync> CoreIndexStream<T> {
    /// Wait for core readiness, refresh its length, derive the stable
    /// per-core storage sub-path from its discovery key, optionally unlink
    /// prior state when `reindex` is set, and open the indexed bitfield.
    pub async fn open(
        core: CoreHandle<T>,
        storage_factory: &StorageFactory,
        reindex: bool,
        wake: Arc<Notify>,
    ) -> Result<Self> {
        core.ready().await?;
        core.update(true).await?;

        let discovery_id = discovery_id(&core.discovery_key());
        let path = storage_path(&discovery_id);
        let storage = storage_factory(&path);

        if reindex {
            storage.unlink().await?;
        }

        let indexed = Bitfield::open(storage).await?;
        let core_rx = core.subscribe();

        debug!(discovery_id = %discovery_id, "opened core index stream");

        Ok(Self {
            core,
            discovery_id,
            next_scan: 0,
            indexed,
            in_progress: Bitfield::in_memory(),
            in_flight: 0,
            downloaded: BTreeSet::new(),
            drained: false,
            destroying: Arc::new(AtomicBool::new(false)),
            core_rx,
            wake,
        })
    }

    pub fn discovery_id(&self) -> &str {
        &self.discovery_id
    }

    pub fn remaining(&self) -> u64 {
        let scanned = self.core.length().saturating_sub(self.next_scan);
        scanned + self.downloaded.len() as u64 + self.in_flight
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    /// Convenience wrapper for standalone use outside a fan-in: loops
    /// [`Self::try_pull`], awaiting the shared wake signal between empty
    /// sweeps, until it has something to return or the stream is destroyed.
    pub async fn next(&mut self, max: usize) -> Result<Vec<Entry<T>>> {
        loop {
            let entries = self.try_pull(max).await?;
            if !entries.is_empty() || self.destroying.load(Ordering::SeqCst) {
                return Ok(entries);
            }
            self.wake.notified().await;
        }
    }

    /// One non-blocking sweep: drain pending core events, then emit as many
    /// not-yet-indexed, locally-present blocks as fit in `max`.
    pub async fn try_pull(&mut self, max: usize) -> Result<Vec<Entry<T>>> {
        if self.destroying.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }

        self.drain_events();

        let mut out = Vec::new();

        if self.next_scan >= self.core.length() && self.downloaded.is_empty() {
            self.drained = true;
            self.indexed.flush().await?;
            return Ok(out);
        }
        self.drained = false;

        while out.len() < max && self.next_scan < self.core.length() {
            let i = self.next_scan;
            if let Some(entry) = self.push_entry(i).await? {
                out.push(entry);
            }
            self.next_scan += 1;
        }

        if out.len() < max {
            let candidates: Vec<u64> = self.downloaded.iter().copied().collect();
            for i in candidates {
                if out.len() >= max {
                    break;
                }
                self.downloaded.remove(&i);
                if let Some(entry) = self.push_entry(i).await? {
                    out.push(entry);
                }
            }
        }

        self.indexed.flush().await?;
        Ok(out)
    }

    fn drain_events(&mut self) {
        loop {
            match self.core_rx.try_recv() {
                Ok(CoreEvent::Append) => {}
                Ok(CoreEvent::Download(i)) => {
                    self.downloaded.insert(i);
                }
                Ok(CoreEvent::Close) => {
                    self.destroying.store(true, Ordering::SeqCst);
                }
                Err(broadcast::error::TryRecvError::Empty) => break,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Closed) => break,
            }
        }
    }

    async fn push_entry(&mut self, i: u64) -> Result<Option<Entry<T>>> {
        if self.indexed.get(i) || self.in_progress.get(i) {
            return Ok(None);
        }
        let Some(block) = self.core.get(i, false).await? else {
            return Ok(None);
        };
        self.in_progress.set(i, true);
        self.in_flight += 1;
        Ok(Some(Entry {
            index: i,
            discovery_id: self.discovery_id.clone(),
            block,
        }))
    }

    pub fn set_indexed(&mut self, i: u64) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.indexed.set(i, true);
        self.in_progress.set(i, false);
        self.wake.notify_waiters();
    }

    pub async fn destroy(&mut self) -> Result<()> {
        self.destroying.store(true, Ordering::SeqCst);
        self.indexed.flush().await?;
        self.indexed.close().await?;
        debug!(discovery_id = %self.discovery_id, "closed core index stream");
        Ok(())
    }

    pub async fn unlink(storage_factory: &StorageFactory, core: &CoreHandle<T>) -> Result<()> {
        let discovery_id = discovery_id(&core.discovery_key());
        let path = storage_path(&discovery_id);
        storage_factory(&path).unlink().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::MemoryCore;
    use crate::storage::{MemoryStorage, Storage};

    fn factory() -> StorageFactory {
        Arc::new(|_name: &str| -> Arc<dyn Storage> { Arc::new(MemoryStorage::new()) })
    }

    #[tokio::test]
    async fn empty_core_is_drained_immediately() {
        let core = MemoryCore::<Vec<u8>>::new(1);
        let mut stream =
            CoreIndexStream::open(core, &factory(), false, Arc::new(Notify::new()))
                .await
                .unwrap();

        let entries = stream.try_pull(10).await.unwrap();
        assert!(entries.is_empty());
        assert!(stream.is_drained());
        assert_eq!(stream.remaining(), 0);
    }

    #[tokio::test]
    async fn next_blocks_until_append_then_returns() {
        let core = MemoryCore::<Vec<u8>>::new(2);
        let wake = Arc::new(Notify::new());
        let mut stream = CoreIndexStream::open(core.clone(), &factory(), false, wake.clone())
            .await
            .unwrap();

        let core2 = core.clone();
        let appender = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            core2.append(vec![42]).await;
            wake.notify_waiters();
        });

        let entries = stream.next(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].block, vec![42]);
        appender.await.unwrap();
    }

    #[tokio::test]
    async fn downloaded_before_next_scan_is_not_double_emitted() {
        let core = MemoryCore::<Vec<u8>>::new(3);
        let mut positions = Vec::new();
        for _ in 0..5u32 {
            positions.push(core.append_remote().await);
        }
        let mut stream =
            CoreIndexStream::open(core.clone(), &factory(), false, Arc::new(Notify::new()))
                .await
                .unwrap();

        // Linear pass sees nothing present yet.
        let first = stream.try_pull(10).await.unwrap();
        assert!(first.is_empty());

        // Download position 1 (below next_scan, which already reached the end).
        core.mark_downloaded(positions[1], vec![9]).await;
        let second = stream.try_pull(10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].index, positions[1]);

        // Re-downloading is a no-op: it's already in_progress.
        core.mark_downloaded(positions[1], vec![9]).await;
        let third = stream.try_pull(10).await.unwrap();
        assert!(third.is_empty());
    }

    #[tokio::test]
    async fn reindex_forgets_prior_storage() {
        let core = MemoryCore::<Vec<u8>>::new(4);
        for i in 0..3u8 {
            core.append(vec![i]).await;
        }

        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let factory: StorageFactory = Arc::new(move |_name: &str| storage.clone());

        {
            let mut stream =
                CoreIndexStream::open(core.clone(), &factory, false, Arc::new(Notify::new()))
                    .await
                    .unwrap();
            let entries = stream.try_pull(10).await.unwrap();
            assert_eq!(entries.len(), 3);
            for entry in &entries {
                stream.set_indexed(entry.index);
            }
            stream.destroy().await.unwrap();
        }

        // Without reindex, a fresh stream over the same storage sees nothing new.
        let mut stream =
            CoreIndexStream::open(core.clone(), &factory, false, Arc::new(Notify::new()))
                .await
                .unwrap();
        assert!(stream.try_pull(10).await.unwrap().is_empty());
        stream.destroy().await.unwrap();

        // With reindex, everything present re-emits.
        let mut stream = CoreIndexStream::open(core, &factory, true, Arc::new(Notify::new()))
            .await
            .unwrap();
        let entries = stream.try_pull(10).await.unwrap();
        assert_eq!(entries.len(), 3);
    }
}
