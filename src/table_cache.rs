//! Table cache: two LRU partitions (primary, mirror) keyed by
//! file number, each backed by `moka`'s sync cache — the same crate an
//! LSM-style table cache reaches for to cache open table blocks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use moka::notification::RemovalCause;
use moka::sync::Cache;
use parking_lot::Mutex;

use crate::config::MirrorConfig;
use crate::filename::table_file_name;
use crate::inuse::InUseTable;
use crate::random_access::{MmapSlots, RandomAccessFile};
use crate::status::Result;
use crate::table::Table;

/// Opens the table format for a random-access file. The real
/// implementation lives in the SSTable crate this one is paired with;
/// this is the `Table::open` seam between them.
pub trait TableOpener: Send + Sync + 'static {
    /// Parse `file`'s footer/index and return an open table.
    fn open(&self, file: Arc<RandomAccessFile>, file_size: u64) -> Result<Arc<dyn Table>>;
}

/// A cached open SSTable: the random-access handle and the parsed
/// table, kept alive together so callers with a live iterator always
/// have a backing file.
pub struct CacheEntry {
    pub file: Arc<RandomAccessFile>,
    pub table: Arc<dyn Table>,
    mirrored: bool,
    name: String,
}

impl CacheEntry {
    /// True if this entry's bytes were served from the mirror device.
    pub fn is_mirrored(&self) -> bool {
        self.mirrored
    }
}

struct Partitions {
    primary: Cache<u64, Arc<CacheEntry>>,
    mirror: Cache<u64, Arc<CacheEntry>>,
}

/// Two independent LRU-ish partitions plus the in-use filename
/// counter that decides mirror eligibility for cache misses.
pub struct TableCache<O: TableOpener> {
    opener: O,
    partitions: Partitions,
    in_use: Arc<Mutex<InUseTable>>,
    mmap_slots: MmapSlots,
    config: MirrorConfig,
    primary_dir: PathBuf,
}

impl<O: TableOpener> std::fmt::Debug for TableCache<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableCache").finish_non_exhaustive()
    }
}

impl<O: TableOpener> TableCache<O> {
    /// Build a table cache with `config.table_cache_entries` capacity
    /// per partition and its own in-use filename table.
    pub fn new(primary_dir: impl AsRef<Path>, config: MirrorConfig, opener: O) -> Self {
        Self::with_in_use(primary_dir, config, opener, Arc::new(Mutex::new(InUseTable::new())))
    }

    /// Build a table cache sharing `in_use` with other caches — e.g.
    /// one per column family, all contending over the same mirror
    /// device's in-use filenames so a file open for mirror reads on one
    /// cache correctly forces a concurrent open on another to the
    /// primary.
    pub fn with_in_use(
        primary_dir: impl AsRef<Path>,
        config: MirrorConfig,
        opener: O,
        in_use: Arc<Mutex<InUseTable>>,
    ) -> Self {
        let listener_in_use = in_use.clone();
        let capacity = config.table_cache_entries;
        let build = |in_use: Arc<Mutex<InUseTable>>| {
            Cache::builder()
                .max_capacity(capacity)
                .eviction_listener(move |_k, v: Arc<CacheEntry>, _cause: RemovalCause| {
                    if v.mirrored {
                        InUseTable::drop(&mut in_use.lock(), &v.name);
                    }
                })
                .build()
        };
        Self {
            opener,
            partitions: Partitions {
                primary: build(listener_in_use.clone()),
                mirror: build(listener_in_use),
            },
            in_use,
            mmap_slots: MmapSlots::default(),
            config,
            primary_dir: primary_dir.as_ref().to_path_buf(),
        }
    }

    fn partition(&self, mirror_flag: bool) -> &Cache<u64, Arc<CacheEntry>> {
        if mirror_flag {
            &self.partitions.mirror
        } else {
            &self.partitions.primary
        }
    }

    /// Open (or fetch from cache) the SSTable for `file_number`.
    /// `mirror_flag` selects which partition to check/insert into;
    /// whether the actual bytes come from the mirror is decided here
    /// independently, from file size and current in-use state.
    ///
    /// Open failures are never cached, so a transient failure (e.g.
    /// the mirror file not having landed yet) self-heals on retry.
    pub fn open(&self, file_number: u64, file_size: u64, mirror_flag: bool) -> Result<Arc<CacheEntry>> {
        let partition = self.partition(mirror_flag);
        if let Some(entry) = partition.get(&file_number) {
            return Ok(entry);
        }

        let name = format!("{:06}.ldb", file_number);
        let use_mirror = mirror_flag
            && self.config.mirror_enable
            && self.config.mirror_path.is_some()
            && file_size > self.config.mirror_min_bytes
            && !self.in_use.lock().in_use(&name);

        let dir = if use_mirror {
            self.config.mirror_path.as_ref().unwrap()
        } else {
            &self.primary_dir
        };
        let path = table_file_name(dir, file_number);

        let raf = RandomAccessFile::open(&path, use_mirror, &self.mmap_slots)?;
        let raf = Arc::new(raf);
        let table = self.opener.open(raf.clone(), file_size)?;

        if use_mirror {
            self.in_use.lock().add(&name);
        }

        let entry = Arc::new(CacheEntry {
            file: raf,
            table,
            mirrored: use_mirror,
            name,
        });
        partition.insert(file_number, entry.clone());
        Ok(entry)
    }

    /// Drop `file_number` from both partitions, e.g. because
    /// compaction obsoleted it.
    pub fn evict(&self, file_number: u64) {
        self.partitions.primary.invalidate(&file_number);
        self.partitions.mirror.invalidate(&file_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{BlockHandle, DataIterator, Entry, IndexIterator};

    struct FakeTable;
    struct EmptyIndex;
    impl IndexIterator for EmptyIndex {
        fn seek(&mut self, _target: &[u8]) -> bool {
            false
        }
        fn seek_to_first(&mut self) -> bool {
            false
        }
        fn seek_to_last(&mut self) -> bool {
            false
        }
        fn next(&mut self) -> bool {
            false
        }
        fn prev(&mut self) -> bool {
            false
        }
        fn valid(&self) -> bool {
            false
        }
        fn handle(&self) -> BlockHandle {
            Vec::new()
        }
        fn status(&self) -> Result<()> {
            Ok(())
        }
    }
    impl Table for FakeTable {
        fn new_index_iterator(&self) -> Box<dyn IndexIterator> {
            Box::new(EmptyIndex)
        }
        fn open_block(&self, _handle: &BlockHandle, _mirror: bool) -> Result<Box<dyn DataIterator>> {
            unimplemented!()
        }
        fn internal_get(&self, _key: &[u8]) -> Result<Option<Entry>> {
            Ok(None)
        }
    }
    struct FakeOpener;
    impl TableOpener for FakeOpener {
        fn open(&self, _file: Arc<RandomAccessFile>, _file_size: u64) -> Result<Arc<dyn Table>> {
            Ok(Arc::new(FakeTable))
        }
    }

    fn write_table(dir: &Path, file_number: u64, bytes: &[u8]) {
        std::fs::write(table_file_name(dir, file_number), bytes).unwrap();
    }

    #[test]
    fn open_is_idempotent_across_evict() {
        let primary_dir = tempfile::tempdir().unwrap();
        write_table(primary_dir.path(), 7, b"0123456789");

        let cache = TableCache::new(primary_dir.path(), MirrorConfig::new(), FakeOpener);
        let a = cache.open(7, 10, false).unwrap();
        let b = cache.open(7, 10, false).unwrap();
        assert_eq!(a.file.read(0, 4).unwrap(), b.file.read(0, 4).unwrap());

        cache.evict(7);
        let c = cache.open(7, 10, false).unwrap();
        assert_eq!(a.file.read(0, 4).unwrap(), c.file.read(0, 4).unwrap());
    }

    #[test]
    fn small_mirror_file_falls_back_to_primary() {
        let primary_dir = tempfile::tempdir().unwrap();
        let mirror_dir = tempfile::tempdir().unwrap();
        write_table(primary_dir.path(), 7, b"primary-bytes");
        write_table(mirror_dir.path(), 7, b"mirror-bytesX");

        let config = MirrorConfig::new().with_mirror(mirror_dir.path());
        let cache = TableCache::new(primary_dir.path(), config, FakeOpener);
        // file_size (13) is below the default 64KiB threshold.
        let entry = cache.open(7, 13, true).unwrap();
        assert_eq!(entry.file.read(0, 7).unwrap(), b"primary");
    }

    #[test]
    fn eligible_mirror_open_is_cached_as_mirrored() {
        let primary_dir = tempfile::tempdir().unwrap();
        let mirror_dir = tempfile::tempdir().unwrap();
        let big = vec![b'M'; 200_000];
        write_table(primary_dir.path(), 7, b"primary-data");
        write_table(mirror_dir.path(), 7, &big);

        let config = MirrorConfig::new().with_mirror(mirror_dir.path());
        let cache = TableCache::new(primary_dir.path(), config, FakeOpener);
        let entry = cache.open(7, big.len() as u64, true).unwrap();
        assert!(entry.mirrored);
        assert_eq!(entry.file.read(0, 1).unwrap(), b"M");
    }

    #[test]
    fn concurrent_opener_sharing_in_use_falls_back_to_primary() {
        let primary_dir = tempfile::tempdir().unwrap();
        let mirror_dir = tempfile::tempdir().unwrap();
        let big = vec![b'M'; 200_000];
        write_table(primary_dir.path(), 7, b"primary-data");
        write_table(mirror_dir.path(), 7, &big);

        let config = MirrorConfig::new().with_mirror(mirror_dir.path());
        let in_use = Arc::new(Mutex::new(InUseTable::new()));

        let first = TableCache::with_in_use(primary_dir.path(), config.clone(), FakeOpener, in_use.clone());
        let entry = first.open(7, big.len() as u64, true).unwrap();
        assert!(entry.mirrored);

        // A second cache sharing the in-use table (e.g. a different
        // column family's cache over the same mirror device) sees file
        // 7 as in-use and falls back to the primary copy instead.
        let second = TableCache::with_in_use(primary_dir.path(), config, FakeOpener, in_use);
        let entry2 = second.open(7, big.len() as u64, true).unwrap();
        assert!(!entry2.mirrored);
        assert_eq!(entry2.file.read(0, 7).unwrap(), b"primary");
    }

    #[test]
    fn open_failure_is_not_cached_and_retry_succeeds() {
        let primary_dir = tempfile::tempdir().unwrap();
        let cache = TableCache::new(primary_dir.path(), MirrorConfig::new(), FakeOpener);

        assert!(cache.open(9, 10, false).is_err());
        write_table(primary_dir.path(), 9, b"now-it-exists");
        let entry = cache.open(9, 10, false).unwrap();
        assert_eq!(entry.file.read(0, 3).unwrap(), b"now");
    }
}
