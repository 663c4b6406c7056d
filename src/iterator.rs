//! Two-level iterator with prefetch: an index iterator resolving
//! block handles into data iterators, with an optional look-ahead
//! that submits the next blocks on the mirror path while the current
//! one is still being consumed.

use std::collections::VecDeque;
use std::sync::Arc;

use log::warn;

use crate::aio::PrefetchCounter;
use crate::status::{Result, Status};
use crate::table::{BlockHandle, DataIterator, Entry, IndexIterator, Table};
use crate::table_cache::CacheEntry;

/// Global cap on concurrent look-ahead block opens. Two matches
/// typical NVMe queue-depth sweet spots for sequential compaction
/// scans — more saturates the mirror device for no extra overlap.
pub const MAX_PREFETCH: u32 = 2;

/// How many `Next` calls to let pass before re-topping-up the
/// look-ahead window.
pub const MAX_OPS_BETWEEN_PREFETCHES: u32 = 1024;

enum Direction {
    Forward,
    Backward,
}

/// Iterates a table's key/value pairs in order, optionally prefetching
/// ahead on the mirror read path.
pub struct TwoLevelIterator {
    // Kept alive so the table cache handle this iterator was built
    // from is released exactly once, on `Drop` — ownership *is* the
    // release.
    _entry: Arc<CacheEntry>,
    table: Arc<dyn Table>,
    index_iter: Box<dyn IndexIterator>,
    data_iter: Option<Box<dyn DataIterator>>,
    mirror_flag: bool,
    prefetch_enabled: bool,
    ops_since_last_prefetch: u32,
    pending_handles: VecDeque<BlockHandle>,
    pending_iters: VecDeque<Box<dyn DataIterator>>,
    /// Shared across every `TwoLevelIterator` built against the same
    /// mirror device, so `MAX_PREFETCH` bounds total concurrent AIO
    /// load rather than each scan's individually.
    prefetch_counter: PrefetchCounter,
    /// Materialized entries of the current block, used only on the
    /// backward path: `DataIterator` only exposes forward `next()`, so
    /// moving to the previous entry buffers the whole block once and
    /// walks it backward in memory.
    backward: Option<BufferedBlock>,
    saved_status: Result<()>,
    direction: Direction,
}

struct BufferedBlock {
    entries: Vec<Entry>,
    pos: usize,
}

impl BufferedBlock {
    fn last(entries: Vec<Entry>) -> Option<Self> {
        if entries.is_empty() {
            None
        } else {
            let pos = entries.len() - 1;
            Some(Self { entries, pos })
        }
    }

    fn current(&self) -> Entry {
        self.entries[self.pos].clone()
    }

    fn prev(&mut self) -> bool {
        if self.pos == 0 {
            false
        } else {
            self.pos -= 1;
            true
        }
    }
}

impl TwoLevelIterator {
    /// Build an iterator over `entry`'s table. `prefetch_enabled`
    /// should already fold in both the mirror flag and the
    /// `cprefetch` configuration option — this type doesn't read
    /// global config itself. `prefetch_counter` should be shared with
    /// every other iterator built against the same mirror device, so
    /// the look-ahead cap is enforced across all of them together.
    pub fn new(
        entry: Arc<CacheEntry>,
        mirror_flag: bool,
        prefetch_enabled: bool,
        prefetch_counter: PrefetchCounter,
    ) -> Self {
        let table = entry.table.clone();
        let index_iter = table.new_index_iterator();
        Self {
            _entry: entry,
            table,
            index_iter,
            data_iter: None,
            mirror_flag,
            prefetch_enabled: prefetch_enabled && mirror_flag,
            ops_since_last_prefetch: 0,
            pending_handles: VecDeque::new(),
            pending_iters: VecDeque::new(),
            prefetch_counter,
            backward: None,
            saved_status: Ok(()),
            direction: Direction::Forward,
        }
    }

    /// Current count of look-ahead blocks submitted but not yet handed
    /// off, across every iterator sharing this counter — must never
    /// exceed `MAX_PREFETCH`.
    pub fn outstanding_prefetches(&self) -> u32 {
        self.prefetch_counter.get()
    }

    fn open_block_sync(&mut self, handle: &BlockHandle) -> Option<Box<dyn DataIterator>> {
        match self.table.open_block(handle, self.mirror_flag) {
            Ok(it) => Some(it),
            Err(e) => {
                self.saved_status = Err(e);
                None
            }
        }
    }

    /// Submit look-ahead block reads until either the cap is hit or
    /// the index iterator runs out. Errors — including a transient
    /// `EAGAIN` — degrade the iterator to non-prefetch mode for the
    /// rest of its lifetime rather than failing the scan outright.
    fn prefetch_data_block(&mut self) {
        while self.index_iter.valid() {
            if !self.prefetch_counter.try_increment_below(MAX_PREFETCH) {
                break;
            }
            let handle = self.index_iter.handle();
            match self.table.open_block(&handle, self.mirror_flag) {
                Ok(it) => {
                    self.pending_handles.push_back(handle);
                    self.pending_iters.push_back(it);
                    self.index_iter.next();
                }
                Err(e) => {
                    self.prefetch_counter.release();
                    let transient = e.is_errno(libc::EAGAIN);
                    if transient {
                        warn!("prefetch submit got EAGAIN, degrading iterator to non-prefetch");
                        self.prefetch_enabled = false;
                    } else {
                        self.saved_status = Err(e);
                    }
                    break;
                }
            }
        }
        if let Err(e) = self.index_iter.status() {
            self.saved_status = Err(e);
        }
    }

    /// Drain a block fully into memory, in order. Only used on the
    /// backward path.
    fn materialize_block(&mut self, handle: &BlockHandle) -> Vec<Entry> {
        let mut entries = Vec::new();
        if let Some(mut it) = self.open_block_sync(handle) {
            while it.next() {
                entries.push(it.current());
            }
            if let Err(e) = it.status() {
                self.saved_status = Err(e);
            }
        }
        entries
    }

    fn take_pending(&mut self) -> Option<Box<dyn DataIterator>> {
        let it = self.pending_iters.pop_front();
        if it.is_some() {
            self.pending_handles.pop_front();
            self.prefetch_counter.release();
        }
        it
    }

    /// Drop every not-yet-consumed look-ahead block, releasing its
    /// slot back to the shared counter so a reset (re-`seek`, `prev`)
    /// doesn't leak capacity other iterators are waiting on.
    fn clear_pending(&mut self) {
        for _ in 0..self.pending_iters.len() {
            self.prefetch_counter.release();
        }
        self.pending_handles.clear();
        self.pending_iters.clear();
    }

    /// After the current data iterator runs dry: pull from the
    /// look-ahead queue, topping it up via another round of
    /// prefetching if it's empty, until a non-empty block is found or
    /// the table is exhausted.
    fn skip_empty_data_blocks_forward(&mut self) {
        loop {
            let has_entry = self
                .data_iter
                .as_mut()
                .map(|it| it.next())
                .unwrap_or(false);
            if has_entry {
                return;
            }
            if let Some(it) = self.data_iter.take() {
                if let Err(e) = it.status() {
                    self.saved_status = Err(e);
                }
            }

            if self.prefetch_enabled {
                if let Some(it) = self.take_pending() {
                    self.data_iter = Some(it);
                    continue;
                }
                self.prefetch_data_block();
                if let Some(it) = self.take_pending() {
                    self.data_iter = Some(it);
                    continue;
                }
                return;
            } else {
                if !self.index_iter.valid() {
                    return;
                }
                let handle = self.index_iter.handle();
                self.data_iter = self.open_block_sync(&handle);
                self.index_iter.next();
                if self.data_iter.is_none() {
                    return;
                }
            }
        }
    }

    /// Seek to the first entry whose key is >= `target`.
    pub fn seek(&mut self, target: &[u8]) -> bool {
        self.direction = Direction::Forward;
        self.clear_pending();
        self.data_iter = None;
        self.backward = None;
        self.ops_since_last_prefetch = 0;
        if !self.index_iter.seek(target) {
            return false;
        }
        self.skip_empty_data_blocks_forward();
        self.valid()
    }

    /// Seek to the first entry in the table, initiating look-ahead
    /// prefetch instead of opening the current block synchronously
    /// when prefetch mode is active.
    pub fn seek_to_first(&mut self) -> bool {
        self.direction = Direction::Forward;
        self.clear_pending();
        self.data_iter = None;
        self.backward = None;
        self.ops_since_last_prefetch = 0;
        if !self.index_iter.seek_to_first() {
            return false;
        }
        self.skip_empty_data_blocks_forward();
        self.valid()
    }

    /// Seek to the last entry. Never prefetches — compaction scans are
    /// forward-only, so backward positioning always goes through the
    /// synchronous path.
    pub fn seek_to_last(&mut self) -> bool {
        self.direction = Direction::Backward;
        self.clear_pending();
        self.ops_since_last_prefetch = 0;
        self.data_iter = None;
        self.backward = None;
        if !self.index_iter.seek_to_last() {
            return false;
        }
        let handle = self.index_iter.handle();
        let entries = self.materialize_block(&handle);
        self.backward = BufferedBlock::last(entries);
        self.valid()
    }

    /// Advance to the next entry. Switching direction mid-scan (i.e.
    /// calling `next` right after `prev`) drops the buffered backward
    /// block and resumes forward from wherever the index iterator
    /// currently sits — callers doing genuine bidirectional scans
    /// should re-`seek` instead of relying on the exact boundary entry.
    pub fn next(&mut self) -> bool {
        self.direction = Direction::Forward;
        self.backward = None;
        if self.prefetch_enabled {
            self.ops_since_last_prefetch += 1;
            if self.ops_since_last_prefetch >= MAX_OPS_BETWEEN_PREFETCHES {
                self.prefetch_data_block();
                self.ops_since_last_prefetch = 0;
            }
        }
        self.skip_empty_data_blocks_forward();
        self.valid()
    }

    /// Move to the previous entry. Always synchronous.
    pub fn prev(&mut self) -> bool {
        self.direction = Direction::Backward;
        self.clear_pending();
        self.data_iter = None;
        loop {
            if let Some(block) = self.backward.as_mut() {
                if block.prev() {
                    return true;
                }
                self.backward = None;
            }
            if !self.index_iter.prev() {
                return false;
            }
            let handle = self.index_iter.handle();
            let entries = self.materialize_block(&handle);
            self.backward = BufferedBlock::last(entries);
            if self.backward.is_some() {
                return true;
            }
        }
    }

    fn current_entry(&self) -> Option<Entry> {
        if let Some(it) = &self.data_iter {
            Some(it.current())
        } else {
            self.backward.as_ref().map(|b| b.current())
        }
    }

    /// Whether the iterator currently sits on a valid entry.
    pub fn valid(&self) -> bool {
        self.current_entry().is_some() && self.saved_status.is_ok()
    }

    /// Current key. Only valid when `valid()` is true.
    pub fn key(&self) -> Vec<u8> {
        self.current_entry().map(|e| e.0).unwrap_or_default()
    }

    /// Current value. Only valid when `valid()` is true.
    pub fn value(&self) -> Vec<u8> {
        self.current_entry().map(|e| e.1).unwrap_or_default()
    }

    /// Any saved error from the index or data iterators. Never
    /// panics — errors are always surfaced here, not thrown.
    pub fn status(&self) -> Result<()> {
        match &self.saved_status {
            Ok(()) => Ok(()),
            Err(Status::IoError { path, source }) => Err(Status::IoError {
                path: path.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            }),
            Err(Status::Corruption(m)) => Err(Status::Corruption(m.clone())),
            Err(Status::InvalidArgument(m)) => Err(Status::InvalidArgument(m.clone())),
            Err(Status::NotFound(m)) => Err(Status::NotFound(m.clone())),
        }
    }
}

impl Drop for TwoLevelIterator {
    fn drop(&mut self) {
        self.clear_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random_access::{MmapSlots, RandomAccessFile};
    use crate::table_cache::{CacheEntry, TableOpener};
    use std::sync::Mutex as StdMutex;

    struct VecIndex {
        handles: Vec<BlockHandle>,
        pos: isize,
    }
    impl IndexIterator for VecIndex {
        fn seek(&mut self, target: &[u8]) -> bool {
            self.pos = self
                .handles
                .iter()
                .position(|h| h.as_slice() >= target)
                .map(|p| p as isize)
                .unwrap_or(self.handles.len() as isize);
            self.valid()
        }
        fn seek_to_first(&mut self) -> bool {
            self.pos = 0;
            self.valid()
        }
        fn seek_to_last(&mut self) -> bool {
            self.pos = self.handles.len() as isize - 1;
            self.valid()
        }
        fn next(&mut self) -> bool {
            if self.valid() {
                self.pos += 1;
            }
            self.valid()
        }
        fn prev(&mut self) -> bool {
            if self.pos >= 0 {
                self.pos -= 1;
            }
            self.valid()
        }
        fn valid(&self) -> bool {
            self.pos >= 0 && (self.pos as usize) < self.handles.len()
        }
        fn handle(&self) -> BlockHandle {
            self.handles[self.pos as usize].clone()
        }
        fn status(&self) -> Result<()> {
            Ok(())
        }
    }

    struct OneEntryData {
        entry: Entry,
        yielded: StdMutex<bool>,
    }
    impl DataIterator for OneEntryData {
        fn next(&mut self) -> bool {
            let mut y = self.yielded.lock().unwrap();
            if *y {
                false
            } else {
                *y = true;
                true
            }
        }
        fn current(&self) -> Entry {
            self.entry.clone()
        }
        fn status(&self) -> Result<()> {
            Ok(())
        }
    }

    struct TenBlockTable;
    impl Table for TenBlockTable {
        fn new_index_iterator(&self) -> Box<dyn IndexIterator> {
            Box::new(VecIndex {
                handles: (0..10u8).map(|i| vec![i]).collect(),
                pos: -1,
            })
        }
        fn open_block(&self, handle: &BlockHandle, _mirror: bool) -> Result<Box<dyn DataIterator>> {
            let i = handle[0];
            Ok(Box::new(OneEntryData {
                entry: (vec![i], vec![i * 2]),
                yielded: StdMutex::new(false),
            }))
        }
        fn internal_get(&self, _key: &[u8]) -> Result<Option<Entry>> {
            Ok(None)
        }
    }

    struct TenBlockOpener;
    impl TableOpener for TenBlockOpener {
        fn open(&self, _file: Arc<RandomAccessFile>, _file_size: u64) -> Result<Arc<dyn Table>> {
            Ok(Arc::new(TenBlockTable))
        }
    }

    fn make_entry(dir: &std::path::Path) -> Arc<CacheEntry> {
        std::fs::write(dir.join("data"), b"0123456789").unwrap();
        let raf = RandomAccessFile::open(dir.join("data"), false, &MmapSlots::default()).unwrap();
        let table = TenBlockOpener.open(Arc::new(raf), 10).unwrap();
        // Build CacheEntry through the public cache path so private
        // fields stay private: exercise TableCache directly instead.
        let cache = crate::table_cache::TableCache::new(dir, crate::config::MirrorConfig::new(), TenBlockOpener);
        cache.open(1, 10, false).unwrap()
    }

    #[test]
    fn forward_scan_visits_every_block_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(crate::filename::table_file_name(dir.path(), 1), b"0123456789").unwrap();
        let entry = make_entry(dir.path());

        let mut it = TwoLevelIterator::new(entry, false, false, PrefetchCounter::new());
        assert!(it.seek_to_first());
        let mut seen = Vec::new();
        while it.valid() {
            seen.push(it.key()[0]);
            it.next();
        }
        assert_eq!(seen, (0..10u8).collect::<Vec<_>>());
        assert!(it.status().is_ok());
    }

    #[test]
    fn prefetch_mode_never_exceeds_cap_and_visits_every_block() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(crate::filename::table_file_name(dir.path(), 1), b"0123456789").unwrap();
        let entry = make_entry(dir.path());

        let mut it = TwoLevelIterator::new(entry, true, true, PrefetchCounter::new());
        assert!(it.seek_to_first());
        let mut seen = Vec::new();
        while it.valid() {
            assert!(it.outstanding_prefetches() <= MAX_PREFETCH);
            seen.push(it.key()[0]);
            it.next();
        }
        assert_eq!(seen, (0..10u8).collect::<Vec<_>>());
    }

    #[test]
    fn shared_counter_caps_total_outstanding_across_two_iterators() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(crate::filename::table_file_name(dir.path(), 1), b"0123456789").unwrap();
        let entry_a = make_entry(dir.path());
        let entry_b = make_entry(dir.path());
        let shared = PrefetchCounter::new();

        let mut a = TwoLevelIterator::new(entry_a, true, true, shared.clone());
        let mut b = TwoLevelIterator::new(entry_b, true, true, shared.clone());
        a.seek_to_first();
        b.seek_to_first();
        assert!(shared.get() <= MAX_PREFETCH);
        assert_eq!(a.outstanding_prefetches(), b.outstanding_prefetches());

        while a.valid() || b.valid() {
            assert!(shared.get() <= MAX_PREFETCH);
            if a.valid() {
                a.next();
            }
            if b.valid() {
                b.next();
            }
        }
        drop(a);
        drop(b);
        assert_eq!(shared.get(), 0);
    }

    #[test]
    fn backward_scan_from_last_visits_every_block_in_reverse() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(crate::filename::table_file_name(dir.path(), 1), b"0123456789").unwrap();
        let entry = make_entry(dir.path());

        let mut it = TwoLevelIterator::new(entry, false, false, PrefetchCounter::new());
        assert!(it.seek_to_last());
        let mut seen = Vec::new();
        while it.valid() {
            seen.push(it.key()[0]);
            it.prev();
        }
        assert_eq!(seen, (0..10u8).rev().collect::<Vec<_>>());
        assert!(it.status().is_ok());
    }
}
