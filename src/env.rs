//! Environment: provides `new_sequential_file`,
//! `new_random_access_file(mirror_flag)`, `new_writable_file`,
//! `delete_file`, `rename_file`, `get_file_size`, file locking, and
//! thread scheduling primitives. The LSM engine that embeds this crate
//! normally owns an object like this; `MirrorEnv` is the concrete
//! implementation of the file-facing half of it, wiring
//! `MirrorConfig`, `MirrorPipeline`, and the single/mirrored writable
//! file types together so a caller doesn't have to.
//!
//! Table-cache-facing environment methods (`new_random_access_file`
//! with table-cache eligibility bookkeeping) stay inside
//! [`crate::table_cache::TableCache`], which already owns the in-use
//! table and mmap-slot semaphore this would otherwise have to share.

use std::fs::File;
use std::io::Read as _;
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use nix::sys::uio::pread;

use crate::config::MirrorConfig;
use crate::filename::is_mirror_eligible;
use crate::mirrored_file::MirroredWritableFile;
use crate::pipeline::MirrorPipeline;
use crate::random_access::{MmapSlots, RandomAccessFile};
use crate::status::{Result, Status};

/// A plain forward-only reader over the primary copy of a file.
/// Sequential reads (WAL replay, MANIFEST reads) never touch the
/// mirror — only SSTable random-access reads are mirror-eligible.
pub struct SequentialFile {
    file: File,
}

impl std::fmt::Debug for SequentialFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialFile").finish_non_exhaustive()
    }
}

impl SequentialFile {
    /// Read up to `n` bytes, returning fewer at EOF.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let got = self.file.read(&mut buf).map_err(Status::from)?;
        buf.truncate(got);
        Ok(buf)
    }
}

/// An advisory `flock(2)` held on a path for the process's lifetime,
/// released automatically on drop. Used for the single-writer DB lock
/// file, not for SSTables (which are immutable once closed).
pub struct FileLock {
    _flock: Flock<File>,
    path: PathBuf,
}

impl std::fmt::Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLock").field("path", &self.path).finish()
    }
}

impl FileLock {
    /// The locked path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Ties `MirrorConfig`, the background `MirrorPipeline`, and the
/// single/mirrored writable file types into the file-facing surface of
/// an "Environment". Random-access opens that participate in the
/// table cache's eligibility bookkeeping go through `TableCache::open`
/// instead of through this type.
pub struct MirrorEnv {
    primary_dir: PathBuf,
    mirror_dir: Option<PathBuf>,
    config: MirrorConfig,
    pipeline: Option<MirrorPipeline>,
    mmap_slots: MmapSlots,
}

impl std::fmt::Debug for MirrorEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorEnv")
            .field("primary_dir", &self.primary_dir)
            .field("mirror_dir", &self.mirror_dir)
            .finish_non_exhaustive()
    }
}

impl MirrorEnv {
    /// Build an environment rooted at `primary_dir`. Spawns the mirror
    /// pipeline's background worker iff mirroring, the async pipeline,
    /// and a mirror directory are all present; with
    /// `use_opq_thread = false`, mirroring still happens — every
    /// mirrored file still gets a live mirror side — but
    /// [`MirroredWritableFile`] runs each op inline on the caller's
    /// thread instead of handing it to a background worker.
    pub fn open(primary_dir: impl AsRef<Path>, config: MirrorConfig) -> Result<Self> {
        config.validate().map_err(Status::InvalidArgument)?;
        let primary_dir = primary_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&primary_dir).map_err(|e| Status::io_error(&primary_dir, e))?;

        let mirror_dir = config.mirror_path.clone();
        if let Some(dir) = &mirror_dir {
            std::fs::create_dir_all(dir).map_err(|e| Status::io_error(dir, e))?;
        }

        let pipeline = if config.mirror_enable && config.use_opq_thread && mirror_dir.is_some() {
            Some(MirrorPipeline::start())
        } else {
            None
        };

        Ok(Self {
            primary_dir,
            mirror_dir,
            config,
            pipeline,
            mmap_slots: MmapSlots::default(),
        })
    }

    /// The configuration this environment was opened with.
    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    fn primary_path(&self, name: &str) -> PathBuf {
        self.primary_dir.join(name)
    }

    /// Open `name` for sequential forward-only reads (WAL/MANIFEST).
    pub fn new_sequential_file(&self, name: &str) -> Result<SequentialFile> {
        let path = self.primary_path(name);
        let file = File::open(&path).map_err(|e| Status::io_error(&path, e))?;
        Ok(SequentialFile { file })
    }

    /// Open `name` for random access. `mirror_flag` is the caller's
    /// hint (e.g. `compact_read_on_secondary`); actual mirror use
    /// additionally requires mirroring to be enabled and a mirror copy
    /// to exist — callers doing table-cache-managed opens should go
    /// through `TableCache::open` instead, which adds in-use and
    /// size-threshold eligibility on top of this.
    pub fn new_random_access_file(&self, name: &str, mirror_flag: bool) -> Result<RandomAccessFile> {
        let use_mirror = mirror_flag && self.config.mirror_enable && self.mirror_dir.is_some();
        let path = if use_mirror {
            self.mirror_dir.as_ref().unwrap().join(name)
        } else {
            self.primary_path(name)
        };
        let prefer_prefetch = use_mirror && self.config.cprefetch;
        RandomAccessFile::open(path, prefer_prefetch, &self.mmap_slots)
    }

    /// Create (or truncate) `name` for writing, mirrored when eligible.
    pub fn new_writable_file(&self, name: &str) -> Result<MirroredWritableFile> {
        MirroredWritableFile::create(
            &self.primary_dir,
            self.mirror_dir.as_deref(),
            name,
            self.pipeline.clone(),
        )
    }

    /// Delete `name`: synchronous on the primary, best-effort and
    /// queued on the mirror.
    pub fn delete_file(&self, name: &str) -> Result<()> {
        let primary_path = self.primary_path(name);
        let mirror_path = if is_mirror_eligible(self.config.mirror_enable, name) {
            self.mirror_dir.as_ref().map(|d| d.join(name))
        } else {
            None
        };
        MirroredWritableFile::delete(primary_path, mirror_path, self.pipeline.as_ref())
    }

    /// Rename `from` to `to`. Metadata operations like this are rare
    /// enough (MANIFEST/CURRENT swaps) to do synchronously on both
    /// sides rather than threading a rename variant through the queue;
    /// non-mirror-eligible names (which is what MANIFEST/CURRENT
    /// always are) never touch the mirror directory at all.
    pub fn rename_file(&self, from: &str, to: &str) -> Result<()> {
        let from_path = self.primary_path(from);
        let to_path = self.primary_path(to);
        std::fs::rename(&from_path, &to_path).map_err(|e| Status::io_error(&from_path, e))?;

        if is_mirror_eligible(self.config.mirror_enable, from) {
            if let Some(dir) = &self.mirror_dir {
                let mirror_from = dir.join(from);
                let mirror_to = dir.join(to);
                if mirror_from.exists() {
                    let _ = std::fs::rename(&mirror_from, &mirror_to);
                }
            }
        }
        Ok(())
    }

    /// Size in bytes of `name` under the primary directory.
    pub fn get_file_size(&self, name: &str) -> Result<u64> {
        let path = self.primary_path(name);
        std::fs::metadata(&path)
            .map(|m| m.len())
            .map_err(|e| Status::io_error(&path, e))
    }

    /// Take an advisory exclusive lock on `name` (the DB lock file),
    /// held for as long as the returned guard lives.
    pub fn lock_file(&self, name: &str) -> Result<FileLock> {
        let path = self.primary_path(name);
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Status::io_error(&path, e))?;
        let flock = Flock::lock(file, FlockArg::LockExclusiveNonblock)
            .map_err(|(_, errno)| Status::from(std::io::Error::from(errno)))?;
        Ok(FileLock {
            _flock: flock,
            path,
        })
    }

    /// Schedule `job` to run on a freshly spawned background thread,
    /// distinct from the dedicated mirror worker thread
    /// `MirrorPipeline` owns.
    pub fn schedule<F>(&self, name: &str, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(job);
    }
}

/// Blocking random-access read helper shared by callers that just want
/// bytes without constructing a `RandomAccessFile` — used by the
/// sequential file's sibling operations in the wider engine. Exposed
/// here as a thin, standalone wrapper over `pread`.
pub fn pread_at(file: &File, offset: u64, n: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    let got = pread(file.as_fd(), &mut buf, offset as i64).map_err(|errno| Status::from(std::io::Error::from(errno)))?;
    buf.truncate(got);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writable_then_sequential_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let env = MirrorEnv::open(dir.path(), MirrorConfig::new()).unwrap();

        let mut f = env.new_writable_file("000001.ldb").unwrap();
        f.append(b"hello world").unwrap();
        f.close().unwrap();

        let mut seq = env.new_sequential_file("000001.ldb").unwrap();
        assert_eq!(seq.read(5).unwrap(), b"hello");
        assert_eq!(seq.read(100).unwrap(), b" world");
    }

    #[test]
    fn delete_and_rename_touch_only_primary_when_mirroring_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let env = MirrorEnv::open(dir.path(), MirrorConfig::new()).unwrap();

        let mut f = env.new_writable_file("a.ldb").unwrap();
        f.append(b"x").unwrap();
        f.close().unwrap();

        env.rename_file("a.ldb", "b.ldb").unwrap();
        assert_eq!(env.get_file_size("b.ldb").unwrap(), 1);

        env.delete_file("b.ldb").unwrap();
        assert!(!dir.path().join("b.ldb").exists());
    }

    #[test]
    fn mirrored_sstable_rename_follows_on_mirror_too() {
        let primary_dir = tempfile::tempdir().unwrap();
        let mirror_dir = tempfile::tempdir().unwrap();
        let config = MirrorConfig::new()
            .with_mirror(mirror_dir.path())
            .with_mirror_min_bytes(0);
        let env = MirrorEnv::open(primary_dir.path(), config).unwrap();

        let mut f = env.new_writable_file("000007.ldb").unwrap();
        f.append(&vec![b'z'; 10]).unwrap();
        f.close().unwrap();
        drop(f);

        env.rename_file("000007.ldb", "000008.ldb").unwrap();
        assert!(mirror_dir.path().join("000008.ldb").exists());
        assert!(!mirror_dir.path().join("000007.ldb").exists());
    }

    #[test]
    fn mirrors_inline_when_async_pipeline_disabled() {
        let primary_dir = tempfile::tempdir().unwrap();
        let mirror_dir = tempfile::tempdir().unwrap();
        let config = MirrorConfig::new()
            .with_mirror(mirror_dir.path())
            .with_mirror_min_bytes(0)
            .with_async_pipeline(false);
        let env = MirrorEnv::open(primary_dir.path(), config).unwrap();

        let mut f = env.new_writable_file("000009.ldb").unwrap();
        assert!(f.is_mirrored());
        f.append(b"inline mirror").unwrap();
        f.close().unwrap();
        drop(f);

        let mirror_bytes = std::fs::read(mirror_dir.path().join("000009.ldb")).unwrap();
        assert_eq!(mirror_bytes, b"inline mirror");
    }

    #[test]
    fn lock_file_is_exclusive_to_one_guard() {
        let dir = tempfile::tempdir().unwrap();
        let env = MirrorEnv::open(dir.path(), MirrorConfig::new()).unwrap();
        let _lock = env.lock_file("LOCK").unwrap();
        assert!(dir.path().join("LOCK").exists());
    }
}
