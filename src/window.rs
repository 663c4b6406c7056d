//! The rolling mmap window a single-device writable file advances
//! across as it appends.

use memmap2::MmapMut;
use std::fs::File;

/// Cap on how large a single window is allowed to grow. Doubling
/// stops once a window would exceed this.
pub const MAX_MAP_SIZE: u64 = 1024 * 1024;

/// Initial window size for a freshly created file.
pub const INITIAL_MAP_SIZE: u64 = 64 * 1024;

fn page_size() -> u64 {
    // SAFETY: sysconf with a valid name never touches memory we don't own.
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if n <= 0 { 4096 } else { n as u64 }
}

/// One mmap'd region of a writable file, covering
/// `[mapped_base, mapped_base + map_size)`.
pub(crate) struct Window {
    pub(crate) mmap: MmapMut,
    pub(crate) mapped_base: u64,
    pub(crate) map_size: u64,
    pub(crate) write_cursor: u64,
    pub(crate) last_sync_cursor: u64,
}

impl Window {
    /// Map a fresh window of `map_size` bytes starting at
    /// `mapped_base`. The caller must have already extended the file
    /// to at least `mapped_base + map_size`.
    pub(crate) fn map(file: &File, mapped_base: u64, map_size: u64) -> std::io::Result<Self> {
        // SAFETY: the file is extended to cover the mapped range before
        // this call, and the mapping is exclusively owned by this window.
        let mmap = unsafe {
            memmap2::MmapOptions::new()
                .offset(mapped_base)
                .len(map_size as usize)
                .map_mut(file)?
        };
        Ok(Self {
            mmap,
            mapped_base,
            map_size,
            write_cursor: mapped_base,
            last_sync_cursor: mapped_base,
        })
    }

    /// Bytes remaining before the window is exhausted.
    pub(crate) fn remaining(&self) -> u64 {
        self.mapped_base + self.map_size - self.write_cursor
    }

    /// Copy `data` into the window at the current write cursor,
    /// advancing it. Panics if `data` doesn't fit — callers must slice
    /// to `remaining()` first.
    pub(crate) fn write(&mut self, data: &[u8]) {
        let offset = (self.write_cursor - self.mapped_base) as usize;
        self.mmap[offset..offset + data.len()].copy_from_slice(data);
        self.write_cursor += data.len() as u64;
    }

    /// Page-aligned `msync` of the unsynced prefix of this window.
    /// `asynchronous` selects `MS_ASYNC` vs `MS_SYNC` semantics.
    pub(crate) fn sync_mapped_range(&mut self, asynchronous: bool) -> std::io::Result<()> {
        if self.write_cursor <= self.last_sync_cursor {
            return Ok(());
        }
        let page = page_size();
        let start = (self.last_sync_cursor - self.mapped_base) / page * page;
        let end_byte = self.write_cursor - self.mapped_base - 1;
        let end_page_start = end_byte / page * page;
        let len = (end_page_start - start + page) as usize;
        if asynchronous {
            self.mmap.flush_async_range(start as usize, len)?;
        } else {
            self.mmap.flush_range(start as usize, len)?;
        }
        self.last_sync_cursor = self.write_cursor;
        Ok(())
    }

    /// Next window's size: double, capped at `MAX_MAP_SIZE`.
    pub(crate) fn next_map_size(&self) -> u64 {
        (self.map_size * 2).min(MAX_MAP_SIZE)
    }
}
