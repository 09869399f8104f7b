//! Filesystem Watch Backends
//!
//! The local copy engine learns about destination writes through a small
//! capability: register a directory, block reading events, remove the
//! registration, and wake a blocked reader. Two backends implement it and are
//! selected by configuration:
//!
//! - **Inotify** (Linux): nonblocking inotify descriptor plus an eventfd used
//!   as the wake signal, multiplexed with `poll(2)`.
//! - **Polling**: `notify`'s poll watcher, one non-recursive watch per
//!   directory. Its events and the wake sentinel share one channel.
//!
//! All methods take `&self` so one backend can be shared between the copying
//! thread (registering directories) and the watch thread (reading events).

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use notify::{EventKind, PollWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::WatchBackendKind;
use crate::error::{CopyError, Result};

#[cfg(target_os = "linux")]
pub use self::inotify_backend::InotifyWatcher;

/// Registration handle returned by [`WatchBackend::register_watch`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchHandle {
    /// inotify watch descriptor
    #[cfg(target_os = "linux")]
    Inotify(nix::sys::inotify::WatchDescriptor),
    /// Directory registered with the polling backend
    Polling(PathBuf),
}

/// What happened to a file inside a watched directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// Entry created or moved in
    Created,
    /// Content written
    Modified,
    /// Writer closed the file
    ClosedWrite,
}

/// One notification: which watch, what happened, which entry
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// Watch the event belongs to
    pub handle: WatchHandle,
    /// Event kind
    pub kind: WatchEventKind,
    /// Entry name relative to the watched directory
    pub name: OsString,
}

/// Result of a blocking read
#[derive(Debug)]
pub enum ReadOutcome {
    /// At least one event arrived
    Events(Vec<WatchEvent>),
    /// [`WatchBackend::wake`] was called; the reader should stop
    Woken,
}

/// Platform-selected notification backend
#[derive(Debug)]
pub enum WatchBackend {
    /// Kernel inotify
    #[cfg(target_os = "linux")]
    Inotify(InotifyWatcher),
    /// Interval-based directory scanning
    Polling(PollingWatcher),
}

impl WatchBackend {
    /// Open the backend selected by `kind`
    pub fn open(kind: WatchBackendKind, poll_interval: Duration) -> Result<Self> {
        match kind {
            #[cfg(target_os = "linux")]
            WatchBackendKind::Auto | WatchBackendKind::Inotify => {
                Ok(Self::Inotify(InotifyWatcher::open()?))
            }
            #[cfg(not(target_os = "linux"))]
            WatchBackendKind::Inotify => Err(CopyError::Watch(
                "inotify is not available on this platform".to_string(),
            )),
            #[cfg(not(target_os = "linux"))]
            WatchBackendKind::Auto => Ok(Self::Polling(PollingWatcher::new(poll_interval)?)),
            WatchBackendKind::Polling => Ok(Self::Polling(PollingWatcher::new(poll_interval)?)),
        }
    }

    /// Start watching `dir` for writes to its direct children
    pub fn register_watch(&self, dir: &Path) -> Result<WatchHandle> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Inotify(w) => w.register_watch(dir),
            Self::Polling(w) => w.register_watch(dir),
        }
    }

    /// Block until events arrive or the backend is woken
    pub fn read_events(&self) -> Result<ReadOutcome> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Inotify(w) => w.read_events(),
            Self::Polling(w) => w.read_events(),
        }
    }

    /// Stop watching a directory
    pub fn remove_watch(&self, handle: WatchHandle) -> Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Inotify(w) => w.remove_watch(handle),
            Self::Polling(w) => w.remove_watch(handle),
        }
    }

    /// Wake a blocked [`read_events`](Self::read_events) call.
    ///
    /// The wake is sticky: every later read returns [`ReadOutcome::Woken`]
    /// once pending events are drained.
    pub fn wake(&self) -> Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Inotify(w) => w.wake(),
            Self::Polling(w) => w.wake(),
        }
    }
}

// =============================================================================
// inotify backend
// =============================================================================

#[cfg(target_os = "linux")]
mod inotify_backend {
    use std::fmt;
    use std::os::fd::AsFd;
    use std::path::Path;

    use nix::errno::Errno;
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use nix::sys::eventfd::{EfdFlags, EventFd};
    use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, InotifyEvent};
    use tracing::trace;

    use super::{ReadOutcome, WatchEvent, WatchEventKind, WatchHandle};
    use crate::error::{CopyError, Result};

    /// inotify descriptor plus an eventfd wake signal
    pub struct InotifyWatcher {
        inotify: Inotify,
        wake_fd: EventFd,
    }

    impl InotifyWatcher {
        /// Create the inotify instance and its wake eventfd
        pub fn open() -> Result<Self> {
            let inotify = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)?;
            let wake_fd =
                EventFd::from_value_and_flags(0, EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_CLOEXEC)?;
            Ok(Self { inotify, wake_fd })
        }

        pub(super) fn register_watch(&self, dir: &Path) -> Result<WatchHandle> {
            let mask = AddWatchFlags::IN_CREATE
                | AddWatchFlags::IN_MODIFY
                | AddWatchFlags::IN_CLOSE_WRITE
                | AddWatchFlags::IN_MOVED_TO;
            let wd = self.inotify.add_watch(dir, mask).map_err(|errno| {
                CopyError::Watch(format!("add_watch {} failed: {}", dir.display(), errno))
            })?;
            Ok(WatchHandle::Inotify(wd))
        }

        pub(super) fn read_events(&self) -> Result<ReadOutcome> {
            loop {
                let (events_ready, woken) = {
                    let mut fds = [
                        PollFd::new(self.inotify.as_fd(), PollFlags::POLLIN),
                        PollFd::new(self.wake_fd.as_fd(), PollFlags::POLLIN),
                    ];
                    match poll(&mut fds, PollTimeout::NONE) {
                        Ok(_) => {}
                        Err(Errno::EINTR) => continue,
                        Err(errno) => return Err(errno.into()),
                    }
                    (is_readable(&fds[0]), is_readable(&fds[1]))
                };

                // Pending writes are drained before honoring the wake.
                if events_ready {
                    match self.inotify.read_events() {
                        Ok(raw) => {
                            let events: Vec<WatchEvent> =
                                raw.into_iter().filter_map(map_event).collect();
                            if !events.is_empty() {
                                return Ok(ReadOutcome::Events(events));
                            }
                        }
                        Err(Errno::EAGAIN) => {}
                        Err(errno) => return Err(errno.into()),
                    }
                }

                if woken {
                    return Ok(ReadOutcome::Woken);
                }
            }
        }

        pub(super) fn remove_watch(&self, handle: WatchHandle) -> Result<()> {
            match handle {
                WatchHandle::Inotify(wd) => match self.inotify.rm_watch(wd) {
                    // The kernel drops the watch itself when the directory goes away.
                    Ok(()) | Err(Errno::EINVAL) => Ok(()),
                    Err(errno) => Err(errno.into()),
                },
                WatchHandle::Polling(_) => Err(CopyError::Watch(
                    "polling handle passed to inotify backend".to_string(),
                )),
            }
        }

        pub(super) fn wake(&self) -> Result<()> {
            match self.wake_fd.write(1) {
                // Counter saturated: a wake is already pending.
                Ok(_) | Err(Errno::EAGAIN) => Ok(()),
                Err(errno) => Err(errno.into()),
            }
        }
    }

    impl fmt::Debug for InotifyWatcher {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("InotifyWatcher").finish_non_exhaustive()
        }
    }

    fn is_readable(fd: &PollFd<'_>) -> bool {
        fd.revents()
            .is_some_and(|revents| revents.intersects(PollFlags::POLLIN | PollFlags::POLLERR))
    }

    fn map_event(event: InotifyEvent) -> Option<WatchEvent> {
        let name = event.name?;
        if event.mask.contains(AddWatchFlags::IN_ISDIR) {
            return None;
        }

        let kind = if event
            .mask
            .intersects(AddWatchFlags::IN_CREATE | AddWatchFlags::IN_MOVED_TO)
        {
            WatchEventKind::Created
        } else if event.mask.contains(AddWatchFlags::IN_CLOSE_WRITE) {
            WatchEventKind::ClosedWrite
        } else if event.mask.contains(AddWatchFlags::IN_MODIFY) {
            WatchEventKind::Modified
        } else {
            return None;
        };

        trace!(?name, ?kind, "inotify event");
        Some(WatchEvent {
            handle: WatchHandle::Inotify(event.wd),
            kind,
            name,
        })
    }
}

// =============================================================================
// Polling backend
// =============================================================================

/// Message on the polling backend's channel
enum PollSignal {
    Fs(notify::Event),
    Wake,
}

/// `notify::PollWatcher` per backend, with one non-recursive watch per
/// directory level. Notifications and the wake sentinel share one channel,
/// so everything observed before a wake is delivered before it.
pub struct PollingWatcher {
    watcher: Mutex<PollWatcher>,
    signal_tx: Sender<PollSignal>,
    signal_rx: Receiver<PollSignal>,
    woken: AtomicBool,
}

impl PollingWatcher {
    /// Create a watcher scanning every `interval`
    pub fn new(interval: Duration) -> Result<Self> {
        let (signal_tx, signal_rx) = unbounded();
        let handler_tx = signal_tx.clone();
        let watcher = PollWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let _ = handler_tx.send(PollSignal::Fs(event));
                }
                Err(e) => warn!("Polling watcher error: {}", e),
            },
            notify::Config::default().with_poll_interval(interval),
        )
        .map_err(|e| CopyError::Watch(format!("failed to start poll watcher: {e}")))?;

        Ok(Self {
            watcher: Mutex::new(watcher),
            signal_tx,
            signal_rx,
            woken: AtomicBool::new(false),
        })
    }

    fn register_watch(&self, dir: &Path) -> Result<WatchHandle> {
        if !dir.is_dir() {
            return Err(CopyError::Watch(format!(
                "not a directory: {}",
                dir.display()
            )));
        }

        // Entries present at registration are baselined by the watcher.
        self.watcher
            .lock()
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| CopyError::Watch(format!("watch {} failed: {}", dir.display(), e)))?;
        debug!(dir = %dir.display(), "polling watch registered");
        Ok(WatchHandle::Polling(dir.to_path_buf()))
    }

    fn read_events(&self) -> Result<ReadOutcome> {
        loop {
            if self.woken.load(Ordering::SeqCst) {
                return Ok(ReadOutcome::Woken);
            }

            let first = self
                .signal_rx
                .recv()
                .map_err(|_| CopyError::Watch("poll channel closed".to_string()))?;

            let mut events = Vec::new();
            let mut next = Some(first);
            while let Some(signal) = next {
                match signal {
                    PollSignal::Fs(event) => events.extend(map_event(event)),
                    PollSignal::Wake => {
                        self.woken.store(true, Ordering::SeqCst);
                        break;
                    }
                }
                next = self.signal_rx.try_recv().ok();
            }

            if !events.is_empty() {
                return Ok(ReadOutcome::Events(events));
            }
        }
    }

    fn remove_watch(&self, handle: WatchHandle) -> Result<()> {
        match handle {
            WatchHandle::Polling(dir) => match self.watcher.lock().unwatch(&dir) {
                Ok(()) => Ok(()),
                Err(e) if matches!(e.kind, notify::ErrorKind::WatchNotFound) => Ok(()),
                Err(e) => Err(CopyError::Watch(format!(
                    "unwatch {} failed: {}",
                    dir.display(),
                    e
                ))),
            },
            #[cfg(target_os = "linux")]
            WatchHandle::Inotify(_) => Err(CopyError::Watch(
                "inotify handle passed to polling backend".to_string(),
            )),
        }
    }

    fn wake(&self) -> Result<()> {
        self.signal_tx
            .send(PollSignal::Wake)
            .map_err(|_| CopyError::Watch("poll channel closed".to_string()))
    }
}

impl std::fmt::Debug for PollingWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingWatcher")
            .field("woken", &self.woken.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Map a notify event onto per-directory watch events.
///
/// The handle is the parent directory; directories themselves are skipped.
fn map_event(event: notify::Event) -> Vec<WatchEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => WatchEventKind::Created,
        EventKind::Modify(_) => WatchEventKind::Modified,
        _ => return Vec::new(),
    };

    event
        .paths
        .into_iter()
        .filter(|path| !path.is_dir())
        .filter_map(|path| {
            let name = path.file_name()?.to_os_string();
            let parent = path.parent()?.to_path_buf();
            trace!(?name, ?kind, "polling event");
            Some(WatchEvent {
                handle: WatchHandle::Polling(parent),
                kind,
                name,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn read_until_name(backend: &WatchBackend, wanted: &str) -> bool {
        for _ in 0..50 {
            match backend.read_events().unwrap() {
                ReadOutcome::Events(events) => {
                    if events.iter().any(|e| e.name == wanted) {
                        return true;
                    }
                }
                ReadOutcome::Woken => return false,
            }
        }
        false
    }

    #[test]
    fn test_polling_reports_new_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let backend = WatchBackend::open(WatchBackendKind::Polling, Duration::from_millis(5))
            .unwrap();
        let handle = backend.register_watch(dir.path()).unwrap();

        std::fs::write(dir.path().join("a.bin"), vec![1u8; 64]).unwrap();
        assert!(read_until_name(&backend, "a.bin"));

        backend.remove_watch(handle).unwrap();
    }

    #[test]
    fn test_polling_baselines_existing_files() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("old.bin"), b"old").unwrap();

        let backend = WatchBackend::open(WatchBackendKind::Polling, Duration::from_millis(5))
            .unwrap();
        backend.register_watch(dir.path()).unwrap();
        backend.wake().unwrap();

        assert!(matches!(backend.read_events().unwrap(), ReadOutcome::Woken));
    }

    #[test]
    fn test_map_modify_event_to_parent_handle() {
        let dir = tempfile::TempDir::new().unwrap();
        let event = notify::Event {
            kind: EventKind::Modify(notify::event::ModifyKind::Metadata(
                notify::event::MetadataKind::WriteTime,
            )),
            paths: vec![dir.path().join("A.txt")],
            attrs: Default::default(),
        };

        let mapped = map_event(event);
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].handle, WatchHandle::Polling(dir.path().to_path_buf()));
        assert_eq!(mapped[0].kind, WatchEventKind::Modified);
        assert_eq!(mapped[0].name, "A.txt");
    }

    #[test]
    fn test_map_skips_directories_and_removals() {
        let dir = tempfile::TempDir::new().unwrap();
        let created_dir = notify::Event {
            kind: EventKind::Create(notify::event::CreateKind::Folder),
            paths: vec![dir.path().to_path_buf()],
            attrs: Default::default(),
        };
        let removed = notify::Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![dir.path().join("gone.txt")],
            attrs: Default::default(),
        };

        assert!(map_event(created_dir).is_empty());
        assert!(map_event(removed).is_empty());
    }

    #[test]
    fn test_polling_delivers_queued_events_before_wake() {
        let dir = tempfile::TempDir::new().unwrap();
        let watcher = PollingWatcher::new(Duration::from_secs(60)).unwrap();
        let event = notify::Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![dir.path().join("late.bin")],
            attrs: Default::default(),
        };
        watcher.signal_tx.send(PollSignal::Fs(event)).unwrap();
        watcher.wake().unwrap();

        match watcher.read_events().unwrap() {
            ReadOutcome::Events(events) => assert_eq!(events[0].name, "late.bin"),
            ReadOutcome::Woken => panic!("wake overtook a queued event"),
        }
        assert!(matches!(watcher.read_events().unwrap(), ReadOutcome::Woken));
        assert!(matches!(watcher.read_events().unwrap(), ReadOutcome::Woken));
    }

    #[test]
    fn test_polling_rejects_missing_directory() {
        let backend = WatchBackend::open(WatchBackendKind::Polling, Duration::from_millis(5))
            .unwrap();
        assert!(backend.register_watch(Path::new("/definitely/not/here")).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_inotify_reports_write() {
        let dir = tempfile::TempDir::new().unwrap();
        let backend = WatchBackend::open(WatchBackendKind::Inotify, Duration::from_millis(5))
            .unwrap();
        let handle = backend.register_watch(dir.path()).unwrap();

        std::fs::write(dir.path().join("b.bin"), vec![7u8; 128]).unwrap();
        assert!(read_until_name(&backend, "b.bin"));

        backend.remove_watch(handle).unwrap();
    }

    #[test]
    fn test_wake_unblocks_reader_thread() {
        for kind in [WatchBackendKind::Auto, WatchBackendKind::Polling] {
            let dir = tempfile::TempDir::new().unwrap();
            let backend =
                Arc::new(WatchBackend::open(kind, Duration::from_millis(5)).unwrap());
            backend.register_watch(dir.path()).unwrap();

            let reader = {
                let backend = Arc::clone(&backend);
                std::thread::spawn(move || loop {
                    if let ReadOutcome::Woken = backend.read_events().unwrap() {
                        break;
                    }
                })
            };

            backend.wake().unwrap();
            reader.join().unwrap();
        }
    }
}
