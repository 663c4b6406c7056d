//! Mirrored writable file: a facade over two single-device
//! writable files. Mirror-side operations either go through the
//! background pipeline or run inline right here, depending on
//! configuration; the primary always executes synchronously on the
//! caller's thread.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::filename::is_mirror_eligible;
use crate::pipeline::MirrorPipeline;
use crate::queue::Op;
use crate::status::Result;
use crate::worker;
use crate::writable_file::{SyncMode, WritableFile};

/// How a mirrored file hands its ops off to the mirror side, once it
/// has decided the file is mirror-eligible.
enum MirrorDispatch {
    /// Pushed onto the background pipeline's queue, drained by the
    /// dedicated worker thread.
    Pipeline(MirrorPipeline),
    /// Run inline on the caller's thread, right after the op is built
    /// — used when `use_opq_thread` is disabled. Mirroring still
    /// happens, just without a dedicated worker thread to absorb the
    /// latency.
    Inline,
}

/// Either mirrors every op — via the background pipeline, or inline on
/// the caller's thread — or, when the file isn't mirror-eligible or
/// mirroring is disabled, behaves as a thin pass-through over the
/// primary alone.
pub struct MirroredWritableFile {
    primary_path: PathBuf,
    mirror_path: Option<PathBuf>,
    primary: WritableFile,
    mirror: Option<Arc<Mutex<WritableFile>>>,
    dispatch: Option<MirrorDispatch>,
    closed: bool,
}

impl std::fmt::Debug for MirroredWritableFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirroredWritableFile")
            .field("primary_path", &self.primary_path)
            .field("mirror_path", &self.mirror_path)
            .finish()
    }
}

impl MirroredWritableFile {
    /// Open `name` under `primary_dir`, and — if `name` is
    /// mirror-eligible and `mirror_dir` is given — also under
    /// `mirror_dir`, synchronously on the caller's thread (the mirror
    /// side is created eagerly; only later ops are dispatched through
    /// `pipeline`). `pipeline` being `None` does not mean mirroring is
    /// disabled: it means `use_opq_thread` is off, so once a mirror
    /// side exists, its ops run inline on the caller's thread rather
    /// than being handed to a background worker.
    pub fn create(
        primary_dir: impl AsRef<Path>,
        mirror_dir: Option<impl AsRef<Path>>,
        name: &str,
        pipeline: Option<MirrorPipeline>,
    ) -> Result<Self> {
        let primary_path = primary_dir.as_ref().join(name);
        let primary = WritableFile::create(&primary_path)?;

        let eligible = mirror_dir.is_some() && is_mirror_eligible(true, name);
        let (mirror_path, mirror) = if eligible {
            let mirror_dir = mirror_dir.unwrap();
            let mirror_path = mirror_dir.as_ref().join(name);
            let mirror = WritableFile::create(&mirror_path)?;
            (Some(mirror_path), Some(Arc::new(Mutex::new(mirror))))
        } else {
            (None, None)
        };

        let dispatch = mirror.is_some().then(|| match pipeline {
            Some(p) => MirrorDispatch::Pipeline(p),
            None => MirrorDispatch::Inline,
        });

        Ok(Self {
            primary_path,
            mirror_path,
            primary,
            mirror,
            dispatch,
            closed: false,
        })
    }

    /// True if this file has a live mirror side.
    pub fn is_mirrored(&self) -> bool {
        self.mirror.is_some()
    }

    fn dispatch(&self, op: Op) {
        match &self.dispatch {
            Some(MirrorDispatch::Pipeline(pipeline)) => pipeline.push(op),
            Some(MirrorDispatch::Inline) => worker::apply(op),
            None => {}
        }
    }

    /// Deep-copy `data` into an owned buffer, enqueue a mirror
    /// `Append`, then append to the primary synchronously and return
    /// its status. The primary's status is the only one the caller
    /// ever observes — mirror failures are logged and dropped deeper
    /// in the pipeline.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        if let Some(mirror) = &self.mirror {
            self.dispatch(Op::Append {
                file: mirror.clone(),
                bytes: data.to_vec(),
            });
        }
        self.primary.append(data)
    }

    /// Enqueue a mirror sync (always asynchronous), then sync the
    /// primary with the caller-requested mode and return its status.
    pub fn sync(&mut self, mode: SyncMode) -> Result<()> {
        if let Some(mirror) = &self.mirror {
            self.dispatch(Op::Sync {
                file: mirror.clone(),
            });
        }
        self.primary.sync(mode)
    }

    /// Enqueue a mirror close, then close the primary synchronously.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if let Some(mirror) = &self.mirror {
            self.dispatch(Op::Close {
                file: mirror.clone(),
            });
        }
        self.closed = true;
        self.primary.close()
    }

    /// Delete both copies. The primary delete is synchronous and
    /// authoritative; the mirror delete either races the mirror
    /// worker's queue (pipelined) or runs inline right here
    /// (`use_opq_thread` off) — either way it's allowed to land after
    /// the primary unlink, and both must still succeed independently.
    pub fn delete(primary_path: impl AsRef<Path>, mirror_path: Option<impl AsRef<Path>>, pipeline: Option<&MirrorPipeline>) -> Result<()> {
        if let Some(mirror_path) = &mirror_path {
            let op = Op::Delete {
                path: mirror_path.as_ref().to_path_buf(),
            };
            match pipeline {
                Some(pipeline) => pipeline.push(op),
                None => worker::apply(op),
            }
        }
        std::fs::remove_file(primary_path.as_ref())
            .map_err(|e| crate::status::Status::io_error(primary_path.as_ref(), e))
    }

    /// Path of the primary copy.
    pub fn primary_path(&self) -> &Path {
        &self.primary_path
    }

    /// Path of the mirror copy, if this file is mirrored.
    pub fn mirror_path(&self) -> Option<&Path> {
        self.mirror_path.as_deref()
    }
}

impl Drop for MirroredWritableFile {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}
