//! Archive Index Adapters
//!
//! Implementations of the `ArchiveIndex` trait.

mod file;
mod memory;

pub use file::FileArchiveIndex;
pub use memory::InMemoryArchiveIndex;
