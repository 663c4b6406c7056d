//! The `Table` contract: the SSTable binary format, the comparator,
//! and the block cache are explicitly out of scope for this crate —
//! they're external collaborators. This trait is the minimal seam the
//! table cache and the two-level iterator need in order to compile and
//! be testable independently of a real LSM engine.

use crate::status::Result;

/// A single key/value pair surfaced by a `DataIterator`.
pub type Entry = (Vec<u8>, Vec<u8>);

/// Iterator over one data block (or, in non-prefetch mode, over the
/// table as a whole via repeated block opens).
pub trait DataIterator: Send {
    /// Advance to the next entry; `false` once exhausted.
    fn next(&mut self) -> bool;
    /// The current entry. Only valid directly after `next` returned
    /// `true`.
    fn current(&self) -> Entry;
    /// Any error encountered while iterating.
    fn status(&self) -> Result<()>;
}

/// An opaque handle to a block the index iterator points at —
/// whatever the table format needs to locate and decode a block.
pub type BlockHandle = Vec<u8>;

/// Iterator over an index block, yielding `BlockHandle`s in key
/// order.
pub trait IndexIterator: Send {
    /// Seek to the first index entry whose key is >= `target`.
    fn seek(&mut self, target: &[u8]) -> bool;
    /// Seek to the first index entry.
    fn seek_to_first(&mut self) -> bool;
    /// Seek to the last index entry.
    fn seek_to_last(&mut self) -> bool;
    /// Advance to the next index entry.
    fn next(&mut self) -> bool;
    /// Move to the previous index entry.
    fn prev(&mut self) -> bool;
    /// Whether the iterator currently points at a valid entry.
    fn valid(&self) -> bool;
    /// The block handle at the current position. Only valid when
    /// `valid()` is true.
    fn handle(&self) -> BlockHandle;
    /// Any error encountered while iterating.
    fn status(&self) -> Result<()>;
}

/// An open SSTable: produces an index iterator and can resolve a
/// block handle into a data iterator.
pub trait Table: Send + Sync {
    /// A fresh index iterator over this table's blocks.
    fn new_index_iterator(&self) -> Box<dyn IndexIterator>;

    /// Resolve `handle` into a data iterator. `mirror` hints that the
    /// read should prefer the mirror copy if the table cache opened
    /// one for this table.
    fn open_block(&self, handle: &BlockHandle, mirror: bool) -> Result<Box<dyn DataIterator>>;

    /// Point lookup used by compaction and reads that don't need a
    /// full iterator.
    fn internal_get(&self, key: &[u8]) -> Result<Option<Entry>>;
}
