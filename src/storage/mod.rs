//! Random-access byte store abstraction backing a [`crate::Bitfield`].

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A random-access byte store. Implementations need not support concurrent
/// writers; the engine never calls more than one mutating method on a given
/// handle at a time (see the concurrency notes in the crate-level docs).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Current length in bytes, or `None` if the store does not exist yet.
    async fn stat(&self) -> Result<Option<u64>>;

    /// Read `len` bytes starting at `offset`. Reads entirely past the end of
    /// an existing store return a zero-filled buffer of the requested length,
    /// matching a freshly allocated sparse page.
    async fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Write `data` at `offset`, extending the store if necessary.
    async fn write(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Remove `len` bytes starting at `offset`.
    async fn del(&self, offset: u64, len: u64) -> Result<()>;

    /// Release any resources held by this handle. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Delete the backing store entirely. Callable even if the store was
    /// never opened, as long as the handle was constructed.
    async fn unlink(&self) -> Result<()>;
}

/// Builds a [`Storage`] handle for a named region (one per core, keyed by its
/// discovery-key derived sub-path; see [`crate::core::storage_path`]).
pub type StorageFactory = Arc<dyn Fn(&str) -> Arc<dyn Storage> + Send + Sync>;

/// Where an [`crate::Indexer`] should keep its per-core state.
#[derive(Clone)]
pub enum StorageLocation {
    /// Root directory for a [`FileStorage`]-backed factory; one file per core
    /// at the stable sub-path described in the crate docs.
    Directory(std::path::PathBuf),
    /// Caller-supplied factory, e.g. an all-in-memory store for tests.
    Factory(StorageFactory),
}

impl StorageLocation {
    pub fn into_factory(self) -> StorageFactory {
        match self {
            StorageLocation::Directory(root) => {
                Arc::new(move |name: &str| -> Arc<dyn Storage> {
                    Arc::new(FileStorage::new(root.join(name)))
                })
            }
            StorageLocation::Factory(factory) => factory,
        }
    }
}
