//! The unit of work flowing through a stream: a block's position, its owning
//! core, and the decoded payload.

use serde_json::Value;

/// A single not-yet-indexed block pulled from a core.
#[derive(Debug, Clone)]
pub struct Entry<T> {
    /// Position of this block within its core.
    pub index: u64,
    /// Lowercase hex discovery id of the owning core.
    pub discovery_id: String,
    /// Decoded block payload.
    pub block: T,
}

/// Default byte-length heuristic for a block encoding, used only for
/// byte-weighted buffering accounting (the default batch high-water mark
/// counts entries instead; see [`crate::indexer::IndexerOptions`]).
pub trait ByteCost {
    fn byte_cost(&self) -> usize;
}

impl ByteCost for Vec<u8> {
    fn byte_cost(&self) -> usize {
        self.len()
    }
}

impl ByteCost for String {
    fn byte_cost(&self) -> usize {
        self.len()
    }
}

impl ByteCost for Value {
    fn byte_cost(&self) -> usize {
        1024
    }
}
