//! The mirror pipeline: queue + worker bundled as one object.
//!
//! Rather than process-wide globals for the queue, the worker, and the
//! AIO counters, all three live behind a single `MirrorPipeline` owned
//! by whatever plays the role of the environment — initialized on
//! first mirrored open, torn down by dropping it (which enqueues
//! `Halt` and joins the worker).

use std::sync::Arc;

use crate::queue::{Op, OpQueue};
use crate::worker::MirrorWorker;

/// Bundles the operation queue and its background worker. Cloning is
/// cheap (it's an `Arc` internally) and every clone shares the same
/// queue and worker thread.
#[derive(Clone)]
pub struct MirrorPipeline {
    inner: Arc<Inner>,
}

struct Inner {
    queue: OpQueue,
    worker: std::sync::Mutex<Option<MirrorWorker>>,
}

impl std::fmt::Debug for MirrorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorPipeline").finish_non_exhaustive()
    }
}

impl MirrorPipeline {
    /// Start the queue and its draining worker thread.
    pub fn start() -> Self {
        let queue = OpQueue::new();
        let worker = MirrorWorker::spawn(queue.clone());
        Self {
            inner: Arc::new(Inner {
                queue,
                worker: std::sync::Mutex::new(Some(worker)),
            }),
        }
    }

    /// Enqueue a mirror operation.
    pub fn push(&self, op: Op) {
        self.inner.queue.push(op);
    }

    /// Number of operations not yet drained — a bound on mirror lag,
    /// not a correctness signal.
    pub fn queue_depth(&self) -> usize {
        self.inner.queue.len()
    }

    /// Enqueue `Halt` and block until the worker has drained the
    /// queue and exited. Idempotent.
    pub fn shutdown(&self) {
        if let Some(mut worker) = self.inner.worker.lock().unwrap().take() {
            worker.halt();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.lock().unwrap().take() {
            worker.halt();
        }
    }
}
