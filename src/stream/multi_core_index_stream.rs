//! Fan-in over a dynamic set of per-core streams.

use crate::block::Entry;
use crate::core::{discovery_id, CoreHandle};
use crate::storage::StorageFactory;
use crate::stream::CoreIndexStream;
use crate::Result;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// Merges many [`CoreIndexStream`]s into one pull source, keyed by discovery
/// id, with an aggregate drained flag maintained incrementally rather than
/// recomputed on every call.
pub struct MultiCoreIndexStream<T> {
    streams: FxHashMap<String, CoreIndexStream<T>>,
    cores: FxHashMap<String, CoreHandle<T>>,
    order: Vec<String>,
    storage_factory: StorageFactory,
    wake: Arc<Notify>,
    aggregate_drained: bool,
}

impl<T: Clone + Send + Sync> MultiCoreIndexStream<T> {
    pub fn new(storage_factory: StorageFactory, wake: Arc<Notify>) -> Self {
        Self {
            streams: FxHashMap::default(),
            cores: FxHashMap::default(),
            order: Vec::new(),
            storage_factory,
            wake,
            aggregate_drained: true,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.streams.values().map(|s| s.remaining()).sum()
    }

    pub fn is_drained(&self) -> bool {
        self.aggregate_drained
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Idempotent by discovery id: adding a core already present is a no-op.
    pub async fn add_core(&mut self, core: CoreHandle<T>, reindex: bool) -> Result<()> {
        let id = discovery_id(&core.discovery_key());
        if self.streams.contains_key(&id) {
            return Ok(());
        }
        let stream =
            CoreIndexStream::open(core.clone(), &self.storage_factory, reindex, self.wake.clone())
                .await?;
        debug!(discovery_id = %id, "added core to fan-in");
        self.order.push(id.clone());
        self.cores.insert(id.clone(), core);
        self.streams.insert(id, stream);
        self.aggregate_drained = false;
        self.wake.notify_waiters();
        Ok(())
    }

    pub fn set_indexed(&mut self, discovery_id: &str, index: u64) {
        if let Some(stream) = self.streams.get_mut(discovery_id) {
            stream.set_indexed(index);
        }
    }

    /// One non-blocking sweep across all managed streams, round-robin, until
    /// `max` entries are collected or every stream reports drained. The
    /// aggregate `drained` flag is only recomputed (a full scan over every
    /// inner stream) when this sweep actually observed an inner stream's
    /// `drained` flag flip; if nothing transitioned, the cached flag from the
    /// last recompute is left untouched.
    pub async fn try_pull_batch(&mut self, max: usize) -> Result<Vec<Entry<T>>> {
        let mut out = Vec::new();
        let mut transitioned = false;

        for id in self.order.clone() {
            if out.len() >= max {
                continue;
            }
            let Some(stream) = self.streams.get_mut(&id) else {
                continue;
            };
            let was_drained = stream.is_drained();
            let entries = stream.try_pull(max - out.len()).await?;
            out.extend(entries);
            if stream.is_drained() != was_drained {
                transitioned = true;
            }
        }

        if transitioned {
            self.aggregate_drained = self.streams.values().all(|s| s.is_drained());
        }
        Ok(out)
    }

    /// Detach, destroy, await inner close, then unlink backing storage.
    pub async fn remove_stream_and_unlink_storage(&mut self, discovery_id: &str) -> Result<()> {
        if let Some(mut stream) = self.streams.remove(discovery_id) {
            self.order.retain(|id| id != discovery_id);
            stream.destroy().await?;
            if let Some(core) = self.cores.remove(discovery_id) {
                CoreIndexStream::unlink(&self.storage_factory, &core).await?;
            }
            debug!(discovery_id = %discovery_id, "removed core from fan-in and unlinked its storage");
        }
        if self.streams.values().all(|s| s.is_drained()) {
            self.aggregate_drained = true;
        }
        Ok(())
    }

    pub async fn destroy(&mut self) -> Result<()> {
        for stream in self.streams.values_mut() {
            stream.destroy().await?;
        }
        debug!(count = self.streams.len(), "destroyed fan-in");
        Ok(())
    }

    /// Unlink every managed core's backing storage. Only meaningful after
    /// [`Self::destroy`] has flushed and closed each stream's bitfield.
    pub async fn unlink(&self) -> Result<()> {
        for core in self.cores.values() {
            CoreIndexStream::unlink(&self.storage_factory, core).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::MemoryCore;
    use crate::storage::MemoryStorage;

    fn ram_factory() -> StorageFactory {
        Arc::new(|_name: &str| -> Arc<dyn crate::storage::Storage> { Arc::new(MemoryStorage::new()) })
    }

    #[tokio::test]
    async fn empty_fan_in_is_drained() {
        let fan_in = MultiCoreIndexStream::<Vec<u8>>::new(ram_factory(), Arc::new(Notify::new()));
        assert!(fan_in.is_drained());
        assert_eq!(fan_in.remaining(), 0);
    }

    #[tokio::test]
    async fn adding_a_non_empty_core_flips_drained_to_false() {
        let mut fan_in = MultiCoreIndexStream::<Vec<u8>>::new(ram_factory(), Arc::new(Notify::new()));
        let core = MemoryCore::<Vec<u8>>::new(1);
        core.append(vec![1]).await;
        fan_in.add_core(core, false).await.unwrap();
        assert!(!fan_in.is_drained());
        assert_eq!(fan_in.remaining(), 1);
    }

    #[tokio::test]
    async fn add_core_is_idempotent_by_discovery_id() {
        let mut fan_in = MultiCoreIndexStream::<Vec<u8>>::new(ram_factory(), Arc::new(Notify::new()));
        let core = MemoryCore::<Vec<u8>>::new(5);
        fan_in.add_core(core.clone(), false).await.unwrap();
        fan_in.add_core(core, false).await.unwrap();
        assert_eq!(fan_in.len(), 1);
    }

    #[tokio::test]
    async fn remaining_sums_across_cores_and_set_indexed_routes_by_id() {
        let mut fan_in = MultiCoreIndexStream::<Vec<u8>>::new(ram_factory(), Arc::new(Notify::new()));
        let a = MemoryCore::<Vec<u8>>::new(1);
        let b = MemoryCore::<Vec<u8>>::new(2);
        for i in 0..3u8 {
            a.append(vec![i]).await;
        }
        for i in 0..4u8 {
            b.append(vec![i]).await;
        }
        let a_id = discovery_id(&a.discovery_key());
        fan_in.add_core(a, false).await.unwrap();
        fan_in.add_core(b, false).await.unwrap();
        assert_eq!(fan_in.remaining(), 7);

        let entries = fan_in.try_pull_batch(100).await.unwrap();
        assert_eq!(entries.len(), 7);
        // Dequeuing does not reduce remaining(); only set_indexed does.
        assert_eq!(fan_in.remaining(), 7);

        for entry in &entries {
            if entry.discovery_id == a_id {
                fan_in.set_indexed(&a_id, entry.index);
            }
        }
        assert_eq!(fan_in.remaining(), 4);

        // An unknown discovery id is a silent no-op.
        fan_in.set_indexed("not-a-real-id", 0);
        assert_eq!(fan_in.remaining(), 4);
    }
}
