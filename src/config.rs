//! Configuration surface for the mirrored storage core.
//!
//! Plain fields, chained `with_*` setters, a `validate`.

use std::path::PathBuf;

/// Minimum file size below which a mirror-read is not attempted.
pub const DEFAULT_MIRROR_MIN_BYTES: u64 = 65_536;

/// Per-partition table cache LRU capacity.
pub const DEFAULT_TABLE_CACHE_ENTRIES: u64 = 1_000;

/// Global configuration for mirroring behavior.
///
/// One `MirrorConfig` is shared (via `Arc`) by the writable-file
/// facade, the table cache, and the iterators it hands out.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Globally gates mirroring; when `false` all mirror paths are
    /// bypassed and every file lives only under `dbname`.
    pub mirror_enable: bool,
    /// Directory for the mirror copy.
    pub mirror_path: Option<PathBuf>,
    /// Enables iterator-level AIO prefetch on mirror reads.
    pub cprefetch: bool,
    /// Enables the asynchronous mirror pipeline. When `false`, mirror
    /// ops run synchronously on the caller's thread instead of being
    /// enqueued to the background worker.
    pub use_opq_thread: bool,
    /// Instructs compaction to open SSTables for read with
    /// `mirror = true`.
    pub compact_read_on_secondary: bool,
    /// Per-partition LRU capacity for the table cache.
    pub table_cache_entries: u64,
    /// Minimum file size below which mirror-read is not attempted.
    pub mirror_min_bytes: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            mirror_enable: false,
            mirror_path: None,
            cprefetch: false,
            use_opq_thread: true,
            compact_read_on_secondary: false,
            table_cache_entries: DEFAULT_TABLE_CACHE_ENTRIES,
            mirror_min_bytes: DEFAULT_MIRROR_MIN_BYTES,
        }
    }
}

impl MirrorConfig {
    /// Start from the defaults (mirroring disabled).
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable mirroring to the given directory.
    pub fn with_mirror(mut self, mirror_path: impl Into<PathBuf>) -> Self {
        self.mirror_enable = true;
        self.mirror_path = Some(mirror_path.into());
        self
    }

    /// Enable or disable iterator-level AIO prefetch.
    pub fn with_cprefetch(mut self, enabled: bool) -> Self {
        self.cprefetch = enabled;
        self
    }

    /// Enable or disable the asynchronous mirror pipeline.
    pub fn with_async_pipeline(mut self, enabled: bool) -> Self {
        self.use_opq_thread = enabled;
        self
    }

    /// Instruct compaction reads to prefer the mirror.
    pub fn with_compact_read_on_secondary(mut self, enabled: bool) -> Self {
        self.compact_read_on_secondary = enabled;
        self
    }

    /// Set the per-partition table cache capacity.
    pub fn with_table_cache_entries(mut self, entries: u64) -> Self {
        self.table_cache_entries = entries;
        self
    }

    /// Set the minimum file size eligible for mirror reads.
    pub fn with_mirror_min_bytes(mut self, bytes: u64) -> Self {
        self.mirror_min_bytes = bytes;
        self
    }

    /// Validate the configuration, catching the obvious
    /// misconfigurations before anything is opened.
    pub fn validate(&self) -> Result<(), String> {
        if self.mirror_enable && self.mirror_path.is_none() {
            return Err("mirror_enable is set but mirror_path is missing".into());
        }
        if self.table_cache_entries == 0 {
            return Err("table_cache_entries must be at least 1".into());
        }
        Ok(())
    }
}
