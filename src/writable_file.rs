//! Single-device, mmap-windowed append-only writable file.
//!
//! Maintains a rolling mmap window over the tail of the file. Appends
//! copy into the mapped region; when the window fills, the current
//! region is unmapped (noting whether unsynced bytes are left behind)
//! and a new, larger region is mapped starting where the old one
//! ended.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use log::debug;

use crate::status::{Result, Status};
use crate::window::{Window, INITIAL_MAP_SIZE};

/// Whether a `sync` should block until durable (`Sync`) or merely
/// schedule the write-back (`Async`, `MS_ASYNC`-equivalent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Block until the range is durable.
    Sync,
    /// Schedule the flush and return immediately.
    Async,
}

/// An append-only file backed by a rolling mmap window.
///
/// `Sync` after `Close` is undefined — callers must not call `sync`
/// once `close` has consumed the file.
pub struct WritableFile {
    path: PathBuf,
    file: File,
    window: Option<Window>,
    closed: bool,
    /// Set when a window is unmapped while it still has unsynced
    /// bytes (the next window's `msync` range starts fresh at its own
    /// base, so those orphaned bytes would otherwise never get
    /// flushed). Cleared by the next `sync`'s `fdatasync`.
    pending_sync: bool,
}

impl std::fmt::Debug for WritableFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritableFile")
            .field("path", &self.path)
            .field("closed", &self.closed)
            .finish()
    }
}

impl WritableFile {
    /// Create (or truncate) `path` and open it for append-only
    /// mmap-windowed writes.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Status::io_error(path.clone(), e))?;
        Ok(Self {
            path,
            file,
            window: None,
            closed: false,
            pending_sync: false,
        })
    }

    /// Wrap an already-open file descriptor, resuming writes at its
    /// current length (used when reopening a file that was partially
    /// written in a previous process lifetime).
    pub fn reopen(path: impl AsRef<Path>, file: File) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file,
            window: None,
            closed: false,
            pending_sync: false,
        }
    }

    fn map_new_region(&mut self, base: u64) -> Result<()> {
        let map_size = self
            .window
            .as_ref()
            .map(Window::next_map_size)
            .unwrap_or(INITIAL_MAP_SIZE);
        self.file
            .set_len(base + map_size)
            .map_err(|e| Status::io_error(self.path.clone(), e))?;
        let window = Window::map(&self.file, base, map_size)
            .map_err(|e| Status::io_error(self.path.clone(), e))?;
        self.window = Some(window);
        Ok(())
    }

    fn unmap_current_region(&mut self) -> Option<u64> {
        let window = self.window.take()?;
        let unsynced = window.last_sync_cursor < window.mapped_base + window.map_size
            && window.write_cursor > window.last_sync_cursor;
        let next_base = window.mapped_base + window.map_size;
        drop(window);
        if unsynced {
            self.pending_sync = true;
            debug!("{}: window unmapped with unsynced bytes pending", self.path.display());
        }
        Some(next_base)
    }

    /// Append `data`, copying in arbitrarily many chunks across window
    /// boundaries. A partial write is impossible: this only ever
    /// memcpys into already-mapped memory.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        let mut remaining = data;
        while !remaining.is_empty() {
            if self.window.is_none() {
                self.map_new_region(0)?;
            }
            let window = self.window.as_mut().expect("just mapped");
            if window.remaining() == 0 {
                let next_base = self.unmap_current_region().unwrap();
                self.map_new_region(next_base)?;
                continue;
            }
            let window = self.window.as_mut().expect("just mapped");
            let take = (window.remaining() as usize).min(remaining.len());
            window.write(&remaining[..take]);
            remaining = &remaining[take..];
        }
        Ok(())
    }

    /// Flush unsynced bytes to the device. `fdatasync`s the file
    /// first if a previous window was unmapped with unsynced bytes
    /// (`pending_sync`), then `msync`s the current window's unsynced
    /// prefix.
    pub fn sync(&mut self, mode: SyncMode) -> Result<()> {
        if self.pending_sync {
            self.file
                .sync_data()
                .map_err(|e| Status::io_error(self.path.clone(), e))?;
            self.pending_sync = false;
        }
        if let Some(window) = self.window.as_mut() {
            window
                .sync_mapped_range(mode == SyncMode::Async)
                .map_err(|e| Status::io_error(self.path.clone(), e))?;
        }
        Ok(())
    }

    /// Current logical length of the file (bytes actually appended,
    /// not including the preallocated window tail).
    pub fn len(&self) -> u64 {
        self.window.as_ref().map(|w| w.write_cursor).unwrap_or(0)
    }

    /// True if nothing has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn has_pending_sync(&self) -> bool {
        self.pending_sync
    }

    /// Unmap the final window, trim the preallocated tail back to the
    /// logical length, and close the descriptor. Idempotent: calling
    /// `close` twice is a no-op the second time.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let final_len = self.len();
        self.window = None;
        self.file
            .set_len(final_len)
            .map_err(|e| Status::io_error(self.path.clone(), e))?;
        self.closed = true;
        Ok(())
    }

    /// Path this file was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `ftruncate` the underlying descriptor to `size` bytes. Used by
    /// the mirror worker's `Truncate` op to trim the mirror's
    /// preallocated tail independently of a `Close`.
    pub fn truncate_to(&mut self, size: u64) -> Result<()> {
        self.window = None;
        self.file
            .set_len(size)
            .map_err(|e| Status::io_error(self.path.clone(), e))
    }
}

impl Drop for WritableFile {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_append_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = WritableFile::create(dir.path().join("000001.ldb")).unwrap();
        f.append(b"").unwrap();
        assert_eq!(f.len(), 0);
    }

    #[test]
    fn append_crossing_window_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = WritableFile::create(dir.path().join("000001.ldb")).unwrap();
        let chunk = vec![0xABu8; INITIAL_MAP_SIZE as usize + 10];
        f.append(&chunk).unwrap();
        assert_eq!(f.len(), chunk.len() as u64);
        f.close().unwrap();
        let bytes = std::fs::read(dir.path().join("000001.ldb")).unwrap();
        assert_eq!(bytes, chunk);
    }

    #[test]
    fn unmap_with_unsynced_bytes_sets_pending_sync_until_next_sync() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = WritableFile::create(dir.path().join("000001.ldb")).unwrap();
        // Crosses the window boundary without an intervening `sync`,
        // so the first window is unmapped while still carrying bytes
        // past `last_sync_cursor`.
        let chunk = vec![0xCDu8; INITIAL_MAP_SIZE as usize + 10];
        f.append(&chunk).unwrap();
        assert!(f.has_pending_sync());
        f.sync(SyncMode::Sync).unwrap();
        assert!(!f.has_pending_sync());
    }

    #[test]
    fn append_exactly_filling_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = WritableFile::create(dir.path().join("000001.ldb")).unwrap();
        let chunk = vec![7u8; INITIAL_MAP_SIZE as usize];
        f.append(&chunk).unwrap();
        assert_eq!(f.len(), chunk.len() as u64);
    }

    #[test]
    fn concatenated_appends_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("000001.ldb");
        let mut f = WritableFile::create(&path).unwrap();
        f.append(b"hello, ").unwrap();
        f.append(b"world").unwrap();
        f.sync(SyncMode::Sync).unwrap();
        f.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello, world");
    }

    #[test]
    fn close_without_prior_append_leaves_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("000001.ldb");
        let mut f = WritableFile::create(&path).unwrap();
        f.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap().len(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = WritableFile::create(dir.path().join("000001.ldb")).unwrap();
        f.append(b"data").unwrap();
        f.close().unwrap();
        f.close().unwrap();
    }
}
