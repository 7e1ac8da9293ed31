//! Pull-based stream stack: one [`CoreIndexStream`] per core, fanned into a
//! single [`MultiCoreIndexStream`].

mod core_index_stream;
mod multi_core_index_stream;

pub use core_index_stream::CoreIndexStream;
pub use multi_core_index_stream::MultiCoreIndexStream;
