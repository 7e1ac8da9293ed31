//! Live indexer over one or more append-only, partially-downloadable logs.
//!
//! An [`Indexer`](indexer::Indexer) drains a set of [`Core`](core::Core)s through a
//! per-core [`CoreIndexStream`](stream::CoreIndexStream), fans them into one
//! [`MultiCoreIndexStream`](stream::MultiCoreIndexStream), and hands batches of
//! not-yet-indexed blocks to a caller-supplied batch function. Progress is tracked
//! per core in a paged sparse [`Bitfield`](bitfield::Bitfield) that is flushed after
//! every read pass, so a restart resumes rather than re-indexes.

pub mod bitfield;
pub mod block;
pub mod config;
pub mod core;
pub mod indexer;
pub mod storage;
pub mod stream;
pub mod telemetry;
pub mod utils;

pub use bitfield::Bitfield;
pub use block::{ByteCost, Entry};
pub use config::{Config, IndexerConfig};
pub use core::{Core, CoreEvent, CoreHandle};
pub use indexer::{Current, IndexState, Indexer, IndexerOptions};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageFactory, StorageLocation};

/// Crate-wide result type. Every fallible operation returns this, matching the
/// rest of the indexing stack rather than introducing a second error enum.
pub type Result<T> = anyhow::Result<T>;
