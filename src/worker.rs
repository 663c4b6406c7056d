//! Background mirror worker: the single consumer draining the
//! operation queue.
//!
//! One `JoinHandle`, a clean shutdown signal, `log` for the errors
//! that must never reach the foreground.

use std::thread::{self, JoinHandle};

use log::{debug, warn};

use crate::queue::{MirrorHandle, Op, OpQueue};
use crate::writable_file::SyncMode;

/// Drains one op at a time until `Halt`. Mirror-side failures are
/// logged and dropped — the primary remains the source of truth, and
/// a failed mirror operation simply means that file is primary-only
/// for future reads (callers are responsible for not bumping the
/// in-use counter on a failed open, not this worker).
fn run(queue: OpQueue) {
    loop {
        match queue.pop_blocking() {
            Op::Halt => {
                debug!("mirror worker halting");
                return;
            }
            op => apply(op),
        }
    }
}

/// Execute one op against its target mirror file, logging and
/// dropping any failure. Shared by the background worker's drain loop
/// and by `MirroredWritableFile`'s synchronous-dispatch mode (when
/// `use_opq_thread` is disabled, ops run this same way but inline on
/// the caller's thread instead of via `OpQueue`). Passing `Halt` here
/// is a no-op, since it only has meaning as a drain-loop sentinel.
pub fn apply(op: Op) {
    match op {
        Op::Append { file, bytes } => {
            if let Err(e) = append(&file, &bytes) {
                warn!("mirror append failed: {e}");
            }
        }
        Op::Sync { file } => {
            if let Err(e) = sync(&file, SyncMode::Async) {
                warn!("mirror sync failed: {e}");
            }
        }
        Op::Close { file } => {
            if let Err(e) = close(&file) {
                warn!("mirror close failed: {e}");
            }
        }
        Op::Delete { path } => {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("mirror delete of {} failed: {e}", path.display());
            }
        }
        Op::Truncate { file, size } => {
            let mut guard = file.lock().unwrap();
            if let Err(e) = guard.truncate_to(size) {
                warn!("mirror truncate failed: {e}");
            }
        }
        Op::BufSync { file } => {
            if let Err(e) = sync(&file, SyncMode::Async) {
                warn!("mirror buffered sync failed: {e}");
            }
        }
        Op::BufClose { file } => {
            if let Err(e) = close(&file) {
                warn!("mirror buffered close failed: {e}");
            }
        }
        Op::Halt => {}
    }
}

fn append(file: &MirrorHandle, bytes: &[u8]) -> crate::status::Result<()> {
    file.lock().unwrap().append(bytes)
}

fn sync(file: &MirrorHandle, mode: SyncMode) -> crate::status::Result<()> {
    file.lock().unwrap().sync(mode)
}

fn close(file: &MirrorHandle) -> crate::status::Result<()> {
    file.lock().unwrap().close()
}

/// Owns the background thread draining an `OpQueue`. Dropping this
/// without calling `halt` leaves the thread running (mirroring the
/// design's "Halt is the only clean shutdown path" — destroying the
/// handle is not itself a signal).
pub struct MirrorWorker {
    queue: OpQueue,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for MirrorWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorWorker").finish_non_exhaustive()
    }
}

impl MirrorWorker {
    /// Spawn the worker thread against `queue`.
    pub fn spawn(queue: OpQueue) -> Self {
        let worker_queue = queue.clone();
        let handle = thread::Builder::new()
            .name("mirror-worker".into())
            .spawn(move || run(worker_queue))
            .expect("failed to spawn mirror worker thread");
        Self {
            queue,
            handle: Some(handle),
        }
    }

    /// The queue this worker drains — clone to get a producer handle.
    pub fn queue(&self) -> &OpQueue {
        &self.queue
    }

    /// Enqueue `Halt` and block until the worker has drained
    /// everything ahead of it and exited.
    pub fn halt(&mut self) {
        self.queue.push(Op::Halt);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MirrorWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.halt();
        }
    }
}
