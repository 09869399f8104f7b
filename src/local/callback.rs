//! Watch-driven progress state for one local copy
//!
//! [`CopyCallback`] owns the watch backend, the background thread that reads
//! it, and the byte counters that thread updates. Dropping it wakes the
//! thread, joins it and removes every registered watch, exactly once.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::watch::{ReadOutcome, WatchBackend, WatchEvent, WatchHandle};
use crate::error::{CopyError, Result};
use crate::progress::{file_percentage, RecordProgress};

/// Per watched directory: bytes already counted for each entry
#[derive(Debug)]
pub struct ReceiveInfo {
    /// Watched directory
    pub path: PathBuf,
    /// Only this entry counts, when set (single-file copies into a shared directory)
    pub target: Option<OsString>,
    /// Entry name to bytes already folded into the progress total
    pub received: HashMap<OsString, u64>,
}

impl ReceiveInfo {
    fn new(path: PathBuf, target: Option<OsString>) -> Self {
        Self {
            path,
            target,
            received: HashMap::new(),
        }
    }

    /// Newly written bytes for `name` since the last event, recording its size
    fn take_delta(&mut self, name: &OsString) -> u64 {
        if self.target.as_ref().is_some_and(|target| target != name) {
            return 0;
        }

        let size = match std::fs::metadata(self.path.join(name)) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return 0,
        };

        let counted = self.received.entry(name.clone()).or_insert(0);
        let delta = size.saturating_sub(*counted);
        *counted = (*counted).max(size);
        delta
    }
}

/// Counters shared between the copying thread and the watch thread
#[derive(Debug, Default)]
pub struct CopyState {
    /// Registered watches and their receive bookkeeping
    pub watches: HashMap<WatchHandle, ReceiveInfo>,
    /// Pre-scanned total bytes
    pub total_size: u64,
    /// Bytes observed so far, never above `total_size`
    pub progress_size: u64,
    /// Last computed file-level percentage
    pub percentage: u32,
    /// Code of the error that stopped the watch thread, if any
    pub error_code: Option<i32>,
}

impl CopyState {
    fn apply(&mut self, events: &[WatchEvent]) -> u32 {
        for event in events {
            let Some(info) = self.watches.get_mut(&event.handle) else {
                continue;
            };
            let delta = info.take_delta(&event.name);
            if delta > 0 {
                self.progress_size = (self.progress_size + delta).min(self.total_size);
                trace!(
                    name = ?event.name,
                    delta,
                    progress = self.progress_size,
                    total = self.total_size,
                    "bytes received"
                );
            }
        }

        self.percentage = file_percentage(self.progress_size, self.total_size);
        self.percentage
    }
}

/// Watch backend, watch thread and progress counters of one local copy
#[derive(Debug)]
pub struct CopyCallback {
    backend: Arc<WatchBackend>,
    state: Arc<Mutex<CopyState>>,
    worker: Option<JoinHandle<()>>,
    released: bool,
}

impl CopyCallback {
    /// Spawn the watch thread over `backend`, expecting `total_size` bytes
    pub fn start(backend: WatchBackend, total_size: u64, progress: RecordProgress) -> Result<Self> {
        let backend = Arc::new(backend);
        let state = Arc::new(Mutex::new(CopyState {
            total_size,
            ..Default::default()
        }));

        let worker = {
            let backend = Arc::clone(&backend);
            let state = Arc::clone(&state);
            std::thread::Builder::new()
                .name(format!("copy-watch-{}", progress.index()))
                .spawn(move || run_watch_loop(&backend, &state, &progress))
                .map_err(|e| CopyError::Watch(format!("failed to spawn watch thread: {e}")))?
        };

        Ok(Self {
            backend,
            state,
            worker: Some(worker),
            released: false,
        })
    }

    /// Watch `dir`; with `target` set only that entry is counted
    pub fn watch_dir(&self, dir: &Path, target: Option<OsString>) -> Result<()> {
        let handle = self.backend.register_watch(dir)?;
        debug!(dir = %dir.display(), ?handle, "watching destination directory");
        self.state
            .lock()
            .watches
            .insert(handle, ReceiveInfo::new(dir.to_path_buf(), target));
        Ok(())
    }

    /// Bytes observed so far
    pub fn progress_size(&self) -> u64 {
        self.state.lock().progress_size
    }

    /// Pre-scanned total
    pub fn total_size(&self) -> u64 {
        self.state.lock().total_size
    }

    /// Error code recorded by the watch thread, if it stopped on an error
    pub fn error_code(&self) -> Option<i32> {
        self.state.lock().error_code
    }

    /// Wake and join the watch thread, then remove every watch.
    ///
    /// Idempotent; also run from `Drop`.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Err(e) = self.backend.wake() {
            warn!("Failed to wake watch thread: {}", e);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Watch thread panicked");
            }
        }

        let handles: Vec<WatchHandle> = self.state.lock().watches.drain().map(|(h, _)| h).collect();
        for handle in handles {
            if let Err(e) = self.backend.remove_watch(handle.clone()) {
                debug!(?handle, "remove_watch failed: {}", e);
            }
        }
        debug!("copy callback released");
    }
}

impl Drop for CopyCallback {
    fn drop(&mut self) {
        self.release();
    }
}

fn run_watch_loop(backend: &WatchBackend, state: &Mutex<CopyState>, progress: &RecordProgress) {
    debug!(index = progress.index(), "watch thread started");
    loop {
        match backend.read_events() {
            Ok(ReadOutcome::Events(events)) => {
                let percentage = state.lock().apply(&events);
                progress.report_percent(percentage);
            }
            Ok(ReadOutcome::Woken) => break,
            Err(e) => {
                warn!("Watch thread stopped: {}", e);
                state.lock().error_code = Some(e.code());
                break;
            }
        }
    }
    debug!(index = progress.index(), "watch thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchBackendKind;
    use crate::local::watch::WatchEventKind;
    use crate::progress::ProgressAggregator;
    use std::time::Duration;

    fn polling_backend() -> WatchBackend {
        WatchBackend::open(WatchBackendKind::Polling, Duration::from_millis(5)).unwrap()
    }

    #[test]
    fn test_receive_info_counts_deltas_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let name = OsString::from("f.bin");
        let mut info = ReceiveInfo::new(dir.path().to_path_buf(), None);

        std::fs::write(dir.path().join("f.bin"), vec![0u8; 100]).unwrap();
        assert_eq!(info.take_delta(&name), 100);
        assert_eq!(info.take_delta(&name), 0);

        std::fs::write(dir.path().join("f.bin"), vec![0u8; 150]).unwrap();
        assert_eq!(info.take_delta(&name), 50);
    }

    #[test]
    fn test_receive_info_target_filter() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("other"), b"data").unwrap();
        let mut info = ReceiveInfo::new(dir.path().to_path_buf(), Some("mine".into()));

        assert_eq!(info.take_delta(&OsString::from("other")), 0);
    }

    #[test]
    fn test_progress_is_capped_at_total() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("big"), vec![0u8; 500]).unwrap();

        let handle = WatchHandle::Polling(dir.path().to_path_buf());
        let mut state = CopyState {
            total_size: 200,
            ..Default::default()
        };
        state
            .watches
            .insert(handle.clone(), ReceiveInfo::new(dir.path().to_path_buf(), None));

        let event = WatchEvent {
            handle,
            kind: WatchEventKind::Modified,
            name: "big".into(),
        };
        assert_eq!(state.apply(&[event]), 100);
        assert_eq!(state.progress_size, 200);
    }

    #[test]
    fn test_release_is_idempotent_and_joins() {
        let dir = tempfile::TempDir::new().unwrap();
        let aggregator = Arc::new(ProgressAggregator::new(None, 1));
        let progress = RecordProgress::new(aggregator, 1);

        let mut callback = CopyCallback::start(polling_backend(), 10, progress).unwrap();
        callback.watch_dir(dir.path(), None).unwrap();
        std::fs::write(dir.path().join("x"), vec![1u8; 10]).unwrap();

        callback.release();
        assert!(callback.worker.is_none());
        assert!(callback.state.lock().watches.is_empty());
        callback.release();
        assert!(callback.progress_size() <= callback.total_size());
    }
}
