//! Random-access file: three variants selected at open time,
//! plus the mmap-slot limiter that bounds concurrent mmap-backed
//! reads.

use std::fs::File;
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use nix::sys::uio::pread;
use parking_lot::Mutex;

use crate::aio::{AioHandle, PrefetchCounter};
use crate::status::{Result, Status};

/// Capacity of the mmap-slot semaphore: bounds concurrently open mmap
/// regions for reads. 1000 on 64-bit platforms, where address space is
/// cheap, 0 on 32-bit, where mmap-backed reads are simply never chosen.
pub const MMAP_SLOT_CAPACITY: u32 = if cfg!(target_pointer_width = "64") {
    1000
} else {
    0
};

/// Counting semaphore over the process's (or pipeline's) concurrently
/// open read-mmap regions. Acquire/release are mutex-protected, not
/// lock-free.
#[derive(Clone)]
pub struct MmapSlots {
    remaining: Arc<Mutex<u32>>,
}

impl std::fmt::Debug for MmapSlots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapSlots")
            .field("remaining", &*self.remaining.lock())
            .finish()
    }
}

impl Default for MmapSlots {
    fn default() -> Self {
        Self::new(MMAP_SLOT_CAPACITY)
    }
}

impl MmapSlots {
    /// A fresh semaphore with `capacity` slots.
    pub fn new(capacity: u32) -> Self {
        Self {
            remaining: Arc::new(Mutex::new(capacity)),
        }
    }

    /// Try to take one slot; `None` if none are left.
    pub fn try_acquire(&self) -> Option<MmapSlotGuard> {
        let mut remaining = self.remaining.lock();
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(MmapSlotGuard {
            slots: self.clone(),
        })
    }

    fn release(&self) {
        *self.remaining.lock() += 1;
    }
}

/// RAII guard: releases its mmap slot back to the semaphore on drop.
pub struct MmapSlotGuard {
    slots: MmapSlots,
}

impl Drop for MmapSlotGuard {
    fn drop(&mut self) {
        self.slots.release();
    }
}

/// A random-access SSTable file, opened via whichever strategy fit at
/// open time.
pub enum RandomAccessFile {
    /// `pread`-free: the returned slice points directly into the
    /// mmap. Holds the slot guard for as long as the mapping lives.
    Mmap { mmap: Mmap, _slot: MmapSlotGuard },
    /// Used on the mirror-read path: the whole file was (or is being)
    /// bulk-loaded via AIO at open time; `read` waits on the handle
    /// the first time it's needed.
    Prefetch {
        handle: Mutex<AioHandle>,
    },
    /// Fallback when mmap slots are exhausted: every read issues a
    /// fresh `pread`.
    Pread { file: File },
}

impl std::fmt::Debug for RandomAccessFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            RandomAccessFile::Mmap { .. } => "Mmap",
            RandomAccessFile::Prefetch { .. } => "Prefetch",
            RandomAccessFile::Pread { .. } => "Pread",
        };
        f.debug_struct("RandomAccessFile")
            .field("variant", &variant)
            .finish()
    }
}

impl RandomAccessFile {
    /// Open `path` for random access. `prefer_prefetch` selects the
    /// mirror-read path (bulk AIO load); otherwise an mmap slot is
    /// taken if available, falling back to `pread`.
    pub fn open(path: impl AsRef<Path>, prefer_prefetch: bool, slots: &MmapSlots) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Status::io_error(path, e))?;
        let size = file
            .metadata()
            .map_err(|e| Status::io_error(path, e))?
            .len();

        if prefer_prefetch {
            let fd = file.into();
            let handle = AioHandle::read(fd, size as usize, 0, PrefetchCounter::new())?;
            return Ok(RandomAccessFile::Prefetch {
                handle: Mutex::new(handle),
            });
        }

        if let Some(slot) = slots.try_acquire() {
            // SAFETY: the file is opened read-only above and not
            // concurrently truncated by this process's SSTable writers
            // (SSTables are immutable once closed).
            let mmap = unsafe { Mmap::map(&file) };
            match mmap {
                Ok(mmap) => {
                    return Ok(RandomAccessFile::Mmap { mmap, _slot: slot });
                }
                Err(e) => return Err(Status::io_error(path, e)),
            }
        }

        Ok(RandomAccessFile::Pread { file })
    }

    /// Read `n` bytes at `offset`, memcpy-slicing into whatever
    /// backing this variant holds.
    pub fn read(&self, offset: u64, n: usize) -> Result<Vec<u8>> {
        match self {
            RandomAccessFile::Mmap { mmap, .. } => {
                let start = offset as usize;
                let end = start
                    .checked_add(n)
                    .filter(|&end| end <= mmap.len())
                    .ok_or_else(|| {
                        Status::InvalidArgument(format!(
                            "read [{start}, {start}+{n}) past EOF ({})",
                            mmap.len()
                        ))
                    })?;
                Ok(mmap[start..end].to_vec())
            }
            RandomAccessFile::Prefetch { handle } => {
                let mut guard = handle.lock();
                let bytes = guard.wait()?;
                let start = offset as usize;
                let end = start.checked_add(n).filter(|&end| end <= bytes.len()).ok_or_else(|| {
                    Status::InvalidArgument(format!(
                        "read [{start}, {start}+{n}) past EOF ({})",
                        bytes.len()
                    ))
                })?;
                Ok(bytes[start..end].to_vec())
            }
            RandomAccessFile::Pread { file } => {
                let mut buf = vec![0u8; n];
                let got = pread(file.as_fd(), &mut buf, offset as i64)
                    .map_err(|errno| Status::from(std::io::Error::from(errno)))?;
                if got != n {
                    return Err(Status::InvalidArgument(format!(
                        "short read: wanted {n}, got {got}"
                    )));
                }
                Ok(buf)
            }
        }
    }
}

/// Derive both candidate paths for a file number, used by callers
/// deciding which variant to open (see the table cache's eligibility
/// check, which is the only caller that should make this decision).
pub fn candidate_paths(primary_dir: impl AsRef<Path>, mirror_dir: Option<impl AsRef<Path>>, name: &str) -> (PathBuf, Option<PathBuf>) {
    (
        primary_dir.as_ref().join(name),
        mirror_dir.map(|d| d.as_ref().join(name)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmap_read_returns_expected_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let slots = MmapSlots::new(1);
        let raf = RandomAccessFile::open(&path, false, &slots).unwrap();
        assert!(matches!(raf, RandomAccessFile::Mmap { .. }));
        assert_eq!(raf.read(2, 4).unwrap(), b"2345");
    }

    #[test]
    fn exhausted_slots_fall_back_to_pread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let slots = MmapSlots::new(0);
        let raf = RandomAccessFile::open(&path, false, &slots).unwrap();
        assert!(matches!(raf, RandomAccessFile::Pread { .. }));
        assert_eq!(raf.read(0, 3).unwrap(), b"012");
    }

    #[test]
    fn prefetch_variant_waits_then_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"abcdefghij").unwrap();

        let slots = MmapSlots::new(1);
        let raf = RandomAccessFile::open(&path, true, &slots).unwrap();
        assert!(matches!(raf, RandomAccessFile::Prefetch { .. }));
        assert_eq!(raf.read(3, 3).unwrap(), b"def");
    }

    #[test]
    fn read_past_eof_is_invalid_argument() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"short").unwrap();

        let slots = MmapSlots::new(1);
        let raf = RandomAccessFile::open(&path, false, &slots).unwrap();
        assert!(matches!(raf.read(0, 100), Err(Status::InvalidArgument(_))));
    }
}
