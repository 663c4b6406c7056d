//! POSIX-AIO prefetch handle.
//!
//! Wraps one outstanding kernel AIO read. There is no portable
//! ecosystem crate for POSIX AIO the way there is for mmap (`memmap2`)
//! or caching (`moka`), so this is the one place in the crate that
//! drops to raw `libc` FFI directly, in the same raw-bindings style
//! used for other syscall-adjacent wrappers in this crate.

use std::os::fd::OwnedFd;

use parking_lot::Mutex;
use std::sync::Arc;

use crate::status::{Result, Status};

/// Count of outstanding AIO reads behind one `RandomAccessFile` open
/// (at most one, since each mirror-read open issues a single bulk
/// load). The same type also backs the two-level iterator's look-ahead
/// cap, where one instance is shared across every `TwoLevelIterator`
/// built against a given mirror device so the cap bounds total
/// concurrent AIO load, not just one scan's.
#[derive(Clone, Default)]
pub struct PrefetchCounter {
    count: Arc<Mutex<u32>>,
}

impl std::fmt::Debug for PrefetchCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchCounter")
            .field("count", &*self.count.lock())
            .finish()
    }
}

impl PrefetchCounter {
    /// A fresh counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current outstanding count.
    pub fn get(&self) -> u32 {
        *self.count.lock()
    }

    fn increment(&self) {
        *self.count.lock() += 1;
    }

    fn decrement(&self) {
        let mut guard = self.count.lock();
        *guard = guard.saturating_sub(1);
    }

    /// Atomically increments the count iff it's currently below `max`,
    /// in one lock acquisition so two concurrent callers can't both
    /// observe room and overshoot the cap. Returns whether it took.
    pub(crate) fn try_increment_below(&self, max: u32) -> bool {
        let mut guard = self.count.lock();
        if *guard < max {
            *guard += 1;
            true
        } else {
            false
        }
    }

    /// Release one slot taken by `try_increment_below`.
    pub(crate) fn release(&self) {
        self.decrement();
    }
}

/// One outstanding (or completed) `aio_read`. The fd is owned by the
/// prefetch, not by any readable-file object, since its lifetime ends
/// with completion, not with the caller's use of the data.
pub struct AioHandle {
    cb: Box<libc::aiocb>,
    // Kept alive so the kernel's pointer into it stays valid; the
    // `Box` gives a stable heap address independent of where this
    // struct itself is moved to.
    buf: Box<[u8]>,
    fd: Option<OwnedFd>,
    counter: PrefetchCounter,
    finished: bool,
}

// SAFETY: `cb`'s raw pointers are a self-referential view into `buf`,
// both owned exclusively by this handle and never aliased outside of
// it; all access goes through `&mut self` or the `Mutex<AioHandle>`
// wrapper callers already use to share a handle across threads.
unsafe impl Send for AioHandle {}
unsafe impl Sync for AioHandle {}

impl std::fmt::Debug for AioHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AioHandle")
            .field("len", &self.buf.len())
            .field("finished", &self.finished)
            .finish()
    }
}

impl AioHandle {
    /// Submit an `aio_read` of `len` bytes from `fd` at `offset`,
    /// incrementing `counter`. Ownership of `fd` transfers to the
    /// handle.
    pub fn read(fd: OwnedFd, len: usize, offset: u64, counter: PrefetchCounter) -> Result<Self> {
        let mut buf = vec![0u8; len].into_boxed_slice();
        let mut cb: Box<libc::aiocb> = Box::new(unsafe { std::mem::zeroed() });
        cb.aio_fildes = fd.as_raw_fd_compat();
        cb.aio_offset = offset as libc::off_t;
        cb.aio_buf = buf.as_mut_ptr() as *mut libc::c_void;
        cb.aio_nbytes = len;
        cb.aio_sigevent.sigev_notify = libc::SIGEV_NONE;

        let rc = unsafe { libc::aio_read(&mut *cb as *mut libc::aiocb) };
        if rc != 0 {
            return Err(Status::from(std::io::Error::last_os_error()));
        }
        counter.increment();
        Ok(Self {
            cb,
            buf,
            fd: Some(fd),
            counter,
            finished: false,
        })
    }

    /// Non-blocking probe: is the read finished (successfully or not)?
    pub fn is_completed(&self) -> bool {
        if self.finished {
            return true;
        }
        let errno = unsafe { libc::aio_error(&*self.cb as *const libc::aiocb) };
        errno != libc::EINPROGRESS
    }

    /// Spin until the read completes, then close the fd, decrement
    /// the outstanding counter, and return the bytes read. The fd is
    /// closed here — not in `Drop` — because completion is precisely
    /// when this handle's lifetime ends.
    pub fn wait(&mut self) -> Result<&[u8]> {
        if !self.finished {
            loop {
                let errno = unsafe { libc::aio_error(&*self.cb as *const libc::aiocb) };
                if errno != libc::EINPROGRESS {
                    break;
                }
                std::thread::yield_now();
            }
            let n = unsafe { libc::aio_return(&mut *self.cb as *mut libc::aiocb) };
            self.fd.take();
            self.counter.decrement();
            self.finished = true;
            if n < 0 {
                return Err(Status::from(std::io::Error::last_os_error()));
            }
        }
        Ok(&self.buf[..self.buf.len()])
    }
}

impl Drop for AioHandle {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.wait();
        }
    }
}

trait AsRawFdCompat {
    fn as_raw_fd_compat(&self) -> libc::c_int;
}

impl AsRawFdCompat for OwnedFd {
    fn as_raw_fd_compat(&self) -> libc::c_int {
        use std::os::fd::AsRawFd;
        self.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[test]
    fn read_completes_with_expected_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let mut f = File::create(&path).unwrap();
        let payload = vec![0x5Au8; 8192];
        f.write_all(&payload).unwrap();
        drop(f);

        let file = File::open(&path).unwrap();
        let fd: OwnedFd = file.into();
        let counter = PrefetchCounter::new();
        let mut handle = AioHandle::read(fd, 8192, 0, counter.clone()).unwrap();
        assert_eq!(counter.get(), 1);
        let bytes = handle.wait().unwrap();
        assert_eq!(bytes, &payload[..]);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn is_completed_becomes_true_after_wait() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, vec![1u8; 4096]).unwrap();

        let file = File::open(&path).unwrap();
        let fd: OwnedFd = file.into();
        let counter = PrefetchCounter::new();
        let mut handle = AioHandle::read(fd, 4096, 0, counter).unwrap();
        handle.wait().unwrap();
        assert!(handle.is_completed());
    }
}
