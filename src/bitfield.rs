//! Paged sparse bit set, persisted to a [`Storage`] a page at a time.

use crate::storage::Storage;
use crate::Result;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::trace;

pub const BITS_PER_PAGE: u64 = 32_768;
const WORDS_PER_PAGE: usize = 1024;
const PAGE_BYTES: usize = WORDS_PER_PAGE * 4;

struct Page {
    words: [u32; WORDS_PER_PAGE],
    dirty: bool,
}

impl Page {
    fn empty() -> Self {
        Self {
            words: [0u32; WORDS_PER_PAGE],
            dirty: false,
        }
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut words = [0u32; WORDS_PER_PAGE];
        for (i, word) in words.iter_mut().enumerate() {
            let start = i * 4;
            *word = u32::from_le_bytes(bytes[start..start + 4].try_into().unwrap());
        }
        Self {
            words,
            dirty: false,
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PAGE_BYTES);
        for word in &self.words {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out
    }

    fn get(&self, w: usize, b: u32) -> bool {
        (self.words[w] & (1 << b)) != 0
    }

    /// Returns `true` if this write actually changed the bit.
    fn set(&mut self, w: usize, b: u32, value: bool) -> bool {
        let mask = 1u32 << b;
        let was = (self.words[w] & mask) != 0;
        if was == value {
            return false;
        }
        if value {
            self.words[w] |= mask;
        } else {
            self.words[w] &= !mask;
        }
        self.dirty = true;
        true
    }
}

fn locate(i: u64) -> (u32, usize, u32) {
    let page = (i / BITS_PER_PAGE) as u32;
    let within = i % BITS_PER_PAGE;
    let word = (within / 32) as usize;
    let bit = (within % 32) as u32;
    (page, word, bit)
}

/// A sparse, page-granular bit set. Either persisted (opened over a
/// [`Storage`] handle) or purely in-memory (see [`Bitfield::in_memory`]),
/// used for both the `indexed` and `in_progress` roles of a core's read loop.
pub struct Bitfield {
    storage: Option<Arc<dyn Storage>>,
    pages: FxHashMap<u32, Page>,
}

impl Bitfield {
    /// Read the entire existing contents (if any) from `storage` and
    /// materialise pages.
    pub async fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let mut pages = FxHashMap::default();
        if let Some(len) = storage.stat().await? {
            let page_count = len.div_ceil(PAGE_BYTES as u64) as u32;
            for p in 0..page_count {
                let bytes = storage.read(p as u64 * PAGE_BYTES as u64, PAGE_BYTES).await?;
                let page = Page::from_bytes(&bytes);
                if page.words.iter().any(|w| *w != 0) {
                    pages.insert(p, page);
                }
            }
        }
        Ok(Self {
            storage: Some(storage),
            pages,
        })
    }

    /// A bitfield with no backing store. `flush`/`close`/`unlink` are no-ops.
    pub fn in_memory() -> Self {
        Self {
            storage: None,
            pages: FxHashMap::default(),
        }
    }

    pub fn get(&self, i: u64) -> bool {
        let (p, w, b) = locate(i);
        self.pages.get(&p).map(|page| page.get(w, b)).unwrap_or(false)
    }

    /// Set bit `i`. A transition from unset to set on a previously-untouched
    /// page allocates that page; a no-op write does not allocate.
    pub fn set(&mut self, i: u64, value: bool) {
        let (p, w, b) = locate(i);
        if let Some(page) = self.pages.get_mut(&p) {
            page.set(w, b, value);
            return;
        }
        if !value {
            return;
        }
        let mut page = Page::empty();
        page.set(w, b, true);
        self.pages.insert(p, page);
    }

    /// Write all dirty pages to storage at their aligned offsets and clear
    /// dirty flags. A no-op on an in-memory bitfield.
    pub async fn flush(&mut self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let mut pages_written = 0u32;
        for (p, page) in self.pages.iter_mut() {
            if !page.dirty {
                continue;
            }
            storage
                .write(*p as u64 * PAGE_BYTES as u64, &page.to_bytes())
                .await?;
            page.dirty = false;
            pages_written += 1;
        }
        if pages_written > 0 {
            trace!(pages_written, "bitfield flushed");
        }
        Ok(())
    }

    /// Release the backing storage handle. A no-op on an in-memory bitfield.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(storage) = &self.storage {
            storage.close().await?;
        }
        Ok(())
    }

    /// Delete backing state. Valid even before the bitfield has been opened,
    /// by unlinking storage directly.
    pub async fn unlink(storage: &Arc<dyn Storage>) -> Result<()> {
        storage.unlink().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn set_then_get_without_flush() {
        let mut bf = Bitfield::open(Arc::new(MemoryStorage::new())).await.unwrap();
        assert!(!bf.get(42));
        bf.set(42, true);
        assert!(bf.get(42));
    }

    #[tokio::test]
    async fn round_trips_across_open() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut bf = Bitfield::open(storage.clone()).await.unwrap();
        bf.set(0, true);
        bf.set(40_000, true); // second page
        bf.flush().await.unwrap();

        let bf2 = Bitfield::open(storage).await.unwrap();
        assert!(bf2.get(0));
        assert!(bf2.get(40_000));
        assert!(!bf2.get(1));
    }

    #[tokio::test]
    async fn unset_on_untouched_page_does_not_allocate() {
        let mut bf = Bitfield::open(Arc::new(MemoryStorage::new())).await.unwrap();
        bf.set(100, false);
        assert!(bf.pages.is_empty());
    }

    #[tokio::test]
    async fn in_memory_flush_is_noop() {
        let mut bf = Bitfield::in_memory();
        bf.set(5, true);
        bf.flush().await.unwrap();
        assert!(bf.get(5));
    }
}
