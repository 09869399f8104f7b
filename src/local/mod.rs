//! Local Copy Engine
//!
//! Copies one file or directory subtree within a single filesystem namespace.
//!
//! Progress is not computed from the copy loop itself. Instead each
//! destination directory level is registered with a [`WatchBackend`] and a
//! background thread (owned by [`CopyCallback`]) turns write notifications
//! into byte deltas:
//!
//! ```text
//! caller thread                         watch thread
//! ─────────────                         ────────────
//! pre-scan subtree size
//! CopyCallback::start ────────────────> read_events() (blocks)
//! create dest dir, watch_dir                 │
//! fs::copy file 1 ──── kernel events ───────>├─ delta vs ReceiveInfo
//! fs::copy file 2 ──── kernel events ───────>├─ ProgressAggregator
//! ...                                        │
//! release(): wake ──────────────────────────>└─ exit
//!            join, remove watches
//! ```
//!
//! Cancellation is checked before every unit of work. A single `fs::copy`
//! already running is allowed to finish; nothing new starts after that.

pub mod callback;
pub mod watch;

use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, warn};

pub use callback::{CopyCallback, CopyState, ReceiveInfo};
pub use watch::{ReadOutcome, WatchBackend, WatchEvent, WatchEventKind, WatchHandle};

use crate::cancel::CancellationSignal;
use crate::config::TransferConfig;
use crate::error::{CopyError, Result};
use crate::path;
use crate::progress::RecordProgress;

/// Copies files and subtrees within one namespace
#[derive(Debug, Clone, Copy)]
pub struct LocalCopyEngine<'a> {
    config: &'a TransferConfig,
}

impl<'a> LocalCopyEngine<'a> {
    /// Create an engine using the watch settings in `config`
    pub fn new(config: &'a TransferConfig) -> Self {
        Self { config }
    }

    /// Copy `src` (file or directory) to `dest`, returning bytes copied.
    ///
    /// Reports file-level progress through `progress`; the final 100% for the
    /// record is reported once the copy returns successfully.
    pub fn copy(
        &self,
        src: &Path,
        dest: &Path,
        progress: &RecordProgress,
        cancel: &CancellationSignal,
    ) -> Result<u64> {
        if cancel.is_cancelled() {
            return Err(CopyError::Cancelled);
        }

        let meta = fs::metadata(src).map_err(|e| CopyError::local(src, e))?;
        let copied = if meta.is_dir() {
            self.copy_directory(src, dest, progress, cancel)?
        } else {
            self.copy_file(src, dest, meta.len(), progress)?
        };

        progress.report_percent(100);
        Ok(copied)
    }

    fn copy_file(
        &self,
        src: &Path,
        dest: &Path,
        total: u64,
        progress: &RecordProgress,
    ) -> Result<u64> {
        debug!(src = %src.display(), dest = %dest.display(), total, "copying file");
        if total == 0 {
            progress.report_percent(100);
        }

        let mut callback = self.open_callback(total, progress);
        if let (Some(callback), Some(parent), Some(name)) =
            (callback.as_ref(), dest.parent(), dest.file_name())
        {
            if let Err(e) = callback.watch_dir(parent, Some(OsString::from(name))) {
                warn!("Progress watch unavailable for {}: {}", parent.display(), e);
            }
        }

        let result = fs::copy(src, dest).map_err(|e| CopyError::local(dest, e));

        if let Some(callback) = callback.as_mut() {
            callback.release();
            log_watch_error(callback);
        }
        result
    }

    fn copy_directory(
        &self,
        src: &Path,
        dest: &Path,
        progress: &RecordProgress,
        cancel: &CancellationSignal,
    ) -> Result<u64> {
        if is_nested(src, dest) {
            return Err(CopyError::PathResolution(format!(
                "destination {} is inside source {}",
                dest.display(),
                src.display()
            )));
        }

        let started = Instant::now();
        let total = scan_tree_size(src)?;
        debug!(
            src = %src.display(),
            total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pre-scanned directory"
        );
        if total == 0 {
            progress.report_percent(100);
        }

        let mut callback = self.open_callback(total, progress);
        let mut tree = TreeCopy {
            callback: callback.as_ref(),
            cancel,
            copied: 0,
        };
        let result = tree.copy_dir(src, dest).map(|()| tree.copied);

        if let Some(callback) = callback.as_mut() {
            callback.release();
            log_watch_error(callback);
        }
        result
    }

    fn open_callback(&self, total: u64, progress: &RecordProgress) -> Option<CopyCallback> {
        let opened = WatchBackend::open(self.config.watch_backend, self.config.poll_interval())
            .and_then(|backend| CopyCallback::start(backend, total, progress.clone()));

        match opened {
            Ok(callback) => Some(callback),
            Err(e) => {
                warn!("Copy progress watcher unavailable, continuing without it: {}", e);
                None
            }
        }
    }
}

/// Recursive copy state for one subtree
struct TreeCopy<'c> {
    callback: Option<&'c CopyCallback>,
    cancel: &'c CancellationSignal,
    copied: u64,
}

impl TreeCopy<'_> {
    fn copy_dir(&mut self, src: &Path, dest: &Path) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(CopyError::Cancelled);
        }

        fs::create_dir_all(dest).map_err(|e| CopyError::local(dest, e))?;
        if let Some(callback) = self.callback {
            if let Err(e) = callback.watch_dir(dest, None) {
                warn!("Progress watch unavailable for {}: {}", dest.display(), e);
            }
        }

        let entries = fs::read_dir(src).map_err(|e| CopyError::local(src, e))?;
        for entry in entries {
            if self.cancel.is_cancelled() {
                return Err(CopyError::Cancelled);
            }

            let entry = entry.map_err(|e| CopyError::local(src, e))?;
            let src_path = entry.path();
            let dest_path = dest.join(entry.file_name());
            let file_type = entry
                .file_type()
                .map_err(|e| CopyError::local(&src_path, e))?;

            if file_type.is_symlink() {
                debug!(path = %src_path.display(), "skipping symbolic link");
            } else if file_type.is_dir() {
                self.copy_dir(&src_path, &dest_path)?;
            } else {
                self.copied += fs::copy(&src_path, &dest_path)
                    .map_err(|e| CopyError::local(&dest_path, e))?;
            }
        }

        Ok(())
    }
}

/// Total size of regular files below `root`. Symbolic links are not followed.
pub fn scan_tree_size(root: &Path) -> Result<u64> {
    let mut total = 0u64;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| CopyError::local(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| CopyError::local(&dir, e))?;
            let meta = entry
                .metadata()
                .map_err(|e| CopyError::local(entry.path(), e))?;
            if meta.is_dir() {
                pending.push(entry.path());
            } else if meta.is_file() {
                total += meta.len();
            }
        }
    }

    Ok(total)
}

fn is_nested(src: &Path, dest: &Path) -> bool {
    let src = path::canonicalize(&src.to_string_lossy());
    let dest = path::canonicalize(&dest.to_string_lossy());
    Path::new(&dest).starts_with(&src)
}

fn log_watch_error(callback: &CopyCallback) {
    if let Some(code) = callback.error_code() {
        warn!(code, "Progress watcher stopped early; byte counts may be incomplete");
    }
}
