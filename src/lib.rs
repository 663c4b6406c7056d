//! Dual-device mirrored storage I/O core for an embedded LSM-style
//! key-value engine.
//!
//! A mirrored writable file (`MirroredWritableFile`) fans writes out
//! to a primary and, for eligible SSTables, a background-drained
//! mirror copy; a two-partition table cache (`TableCache`) and
//! two-level iterator (`TwoLevelIterator`) route reads between the
//! two devices depending on file size, an in-use filename counter, and
//! whatever the embedding engine decides at compaction time. The
//! SSTable binary format, comparator, and generic block cache are
//! explicitly out of scope — `table::Table` is the seam this crate
//! expects its embedder to implement.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod aio;
pub mod config;
pub mod env;
pub mod filename;
pub mod inuse;
pub mod iterator;
pub mod mirrored_file;
pub mod pipeline;
pub mod queue;
pub mod random_access;
pub mod status;
pub mod table;
pub mod table_cache;
mod window;
pub mod worker;
pub mod writable_file;

pub use config::MirrorConfig;
pub use env::MirrorEnv;
pub use mirrored_file::MirroredWritableFile;
pub use pipeline::MirrorPipeline;
pub use random_access::RandomAccessFile;
pub use status::{Result, Status};
pub use table_cache::TableCache;
pub use writable_file::{SyncMode, WritableFile};
