//! Single-consumer FIFO queue of mirror I/O operations.
//!
//! A plain `Mutex<VecDeque<_>>` guarded by a `Condvar`, with the
//! consumer waking on a bounded timeout so a pending `Halt` is never
//! stuck behind a spurious missed signal.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::writable_file::WritableFile;

/// Shared handle to the mirror-side writable file an op targets.
pub type MirrorHandle = Arc<Mutex<WritableFile>>;

/// Upper bound on how long the consumer sleeps before re-checking the
/// queue, so a `Halt` enqueued right after the last wake-up is still
/// observed promptly.
pub const CONSUMER_WAKE_INTERVAL: Duration = Duration::from_millis(16);

/// A single mirror-side I/O operation, carrying owned data so the
/// queue never references memory the producer might free before the
/// consumer drains it.
pub enum Op {
    /// Append an owned byte buffer to the mirror file.
    Append { file: MirrorHandle, bytes: Vec<u8> },
    /// Flush the mirror file. Mirror syncs are always asynchronous —
    /// the primary's synchronous sync already provides the durability
    /// barrier the caller observes.
    Sync { file: MirrorHandle },
    /// Close the mirror file (drop the handle).
    Close { file: MirrorHandle },
    /// Unlink an owned path.
    Delete { path: PathBuf },
    /// Truncate the mirror file to `size` bytes (trims the
    /// preallocated tail left by the mmap window doubling).
    Truncate { file: MirrorHandle, size: u64 },
    /// Direct-`pwrite` variant of `Sync`, used when the mirror writer
    /// owns an O_DIRECT buffer instead of an mmap window. This crate
    /// implements only the mmap-windowed writer, so this currently
    /// dispatches to the same path as `Sync`; kept as a distinct
    /// variant so a future O_DIRECT writer slots in without touching
    /// the queue or worker dispatch.
    BufSync { file: MirrorHandle },
    /// Direct-`pwrite` variant of `Close`.
    BufClose { file: MirrorHandle },
    /// Poison pill: causes the worker to exit after draining
    /// everything enqueued ahead of it.
    Halt,
}

impl std::fmt::Debug for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Op::Append { bytes, .. } => return write!(f, "Append({} bytes)", bytes.len()),
            Op::Sync { .. } => "Sync",
            Op::Close { .. } => "Close",
            Op::Delete { path } => return write!(f, "Delete({})", path.display()),
            Op::Truncate { size, .. } => return write!(f, "Truncate({size})"),
            Op::BufSync { .. } => "BufSync",
            Op::BufClose { .. } => "BufClose",
            Op::Halt => "Halt",
        };
        f.write_str(kind)
    }
}

#[derive(Default)]
struct Shared {
    ops: Mutex<VecDeque<Op>>,
    not_empty: Condvar,
}

/// Multi-producer, single-consumer FIFO. Enqueue is O(1) and never
/// blocks on capacity — the queue is intentionally unbounded; the
/// design relies on producers being naturally rate-limited by their
/// own synchronous primary-device write.
#[derive(Clone, Default)]
pub struct OpQueue {
    shared: Arc<Shared>,
}

impl OpQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an operation to the back of the queue and wake the
    /// consumer. Ordering between operations pushed on the same
    /// target file is preserved by FIFO order alone — the queue makes
    /// no per-file distinction.
    pub fn push(&self, op: Op) {
        let mut ops = self.shared.ops.lock().unwrap();
        ops.push_back(op);
        self.shared.not_empty.notify_one();
    }

    /// Pop the next operation, blocking until one is available. Wakes
    /// at least every `CONSUMER_WAKE_INTERVAL` even with no signal, so
    /// callers polling for shutdown never stall.
    pub fn pop_blocking(&self) -> Op {
        let mut ops = self.shared.ops.lock().unwrap();
        loop {
            if let Some(op) = ops.pop_front() {
                return op;
            }
            let (guard, _timeout) = self
                .shared
                .not_empty
                .wait_timeout(ops, CONSUMER_WAKE_INTERVAL)
                .unwrap();
            ops = guard;
        }
    }

    /// Number of operations currently queued. For tests and metrics
    /// only — never used to gate correctness.
    pub fn len(&self) -> usize {
        self.shared.ops.lock().unwrap().len()
    }

    /// True if the queue currently has no pending operations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
