//! Remote Transfer Session
//!
//! Drives one cross-device file transfer through a [`RemoteTransferService`].
//!
//! The service is asynchronous: `prepare_session` returns once the transfer
//! is accepted, and the outcome arrives later on one of the service's own
//! threads through [`SessionCallback`]. The calling thread blocks on a
//! bounded channel that the first terminal callback completes:
//!
//! ```text
//!   Idle ──prepare_session──> Preparing ──on_file_receive──> Transferring
//!                                │                               │
//!                          Err(prepare)               on_finished / on_failed
//!                                ▼                               ▼
//!                              Failed                  Finished / Failed
//! ```
//!
//! The wait wakes every `cancel_poll_interval` to check the cancellation
//! signal. On cancel the callback target is detached, the service is told to
//! abort, and the record ends as cancelled.
//!
//! Unless the destination authority is remote-owned, the service writes into
//! a private staging directory and the finished file is promoted into the
//! final path with one local copy.

pub mod staging;

use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use staging::StagingDir;

use crate::cancel::CancellationSignal;
use crate::config::TransferConfig;
use crate::error::{CopyError, Result};
use crate::local::LocalCopyEngine;
use crate::path;
use crate::progress::RecordProgress;

/// Errors returned synchronously by the remote transfer service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The service refused the request
    #[error("request rejected with code {0}")]
    Rejected(i32),

    /// The service cannot be reached at all
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl From<RemoteError> for CopyError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Rejected(code) => CopyError::RemoteSession {
                code,
                message: "prepare_session rejected".to_string(),
            },
            RemoteError::Unavailable(reason) => CopyError::TransportFault(reason),
        }
    }
}

/// Cross-device transfer service
#[cfg_attr(test, mockall::automock)]
pub trait RemoteTransferService: Send + Sync {
    /// Start transferring `src_uri` to `dest_uri` on the device named by
    /// `routing_id`. Progress and the outcome are delivered via `callback`.
    fn prepare_session(
        &self,
        src_uri: &str,
        dest_uri: &str,
        routing_id: &str,
        callback: Arc<SessionCallback>,
    ) -> std::result::Result<(), RemoteError>;

    /// Abort a transfer previously started with `prepare_session`
    fn cancel_transfer(&self, src_uri: &str, dest_uri: &str)
        -> std::result::Result<(), RemoteError>;
}

/// Terminal result of a remote session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Transfer completed
    Finished {
        /// Service-side session identifier
        session_id: String,
    },
    /// Transfer failed on the service side
    Failed {
        /// Service-side session identifier
        session_id: String,
        /// Service error code
        code: i32,
    },
}

struct CallbackTarget {
    progress: RecordProgress,
    outcome_tx: Sender<SessionOutcome>,
}

/// Callback surface handed to the remote service.
///
/// Once a terminal callback fires, or the session detaches after a cancel,
/// later calls are ignored.
pub struct SessionCallback {
    target: Mutex<Option<CallbackTarget>>,
}

impl SessionCallback {
    pub(crate) fn new(progress: RecordProgress, outcome_tx: Sender<SessionOutcome>) -> Self {
        Self {
            target: Mutex::new(Some(CallbackTarget {
                progress,
                outcome_tx,
            })),
        }
    }

    /// Byte progress of the file being received
    pub fn on_file_receive(&self, total: u64, processed: u64) {
        if total == 0 {
            return;
        }
        if let Some(target) = self.target.lock().as_ref() {
            target.progress.report_bytes(processed, total);
        }
    }

    /// Transfer completed
    pub fn on_finished(&self, session_id: &str) {
        let Some(target) = self.target.lock().take() else {
            debug!(session_id, "on_finished after session detached");
            return;
        };
        target.progress.report_percent(100);
        let _ = target.outcome_tx.try_send(SessionOutcome::Finished {
            session_id: session_id.to_string(),
        });
    }

    /// Transfer failed with `code`
    pub fn on_failed(&self, session_id: &str, code: i32) {
        let Some(target) = self.target.lock().take() else {
            debug!(session_id, code, "on_failed after session detached");
            return;
        };
        let _ = target.outcome_tx.try_send(SessionOutcome::Failed {
            session_id: session_id.to_string(),
            code,
        });
    }

    /// Whether callbacks are still delivered
    pub fn is_attached(&self) -> bool {
        self.target.lock().is_some()
    }

    pub(crate) fn detach(&self) {
        self.target.lock().take();
    }
}

impl std::fmt::Debug for SessionCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCallback")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not started
    Idle,
    /// `prepare_session` in flight
    Preparing,
    /// Waiting for the outcome
    Transferring,
    /// Outcome received and the file is in place
    Finished,
    /// Prepare failed, the service reported failure, or the wait was cancelled
    Failed,
}

/// One cross-device transfer
pub struct RemoteTransferSession<'a> {
    service: &'a dyn RemoteTransferService,
    config: &'a TransferConfig,
    state: SessionState,
}

impl<'a> RemoteTransferSession<'a> {
    /// Create an idle session
    pub fn new(service: &'a dyn RemoteTransferService, config: &'a TransferConfig) -> Self {
        Self {
            service,
            config,
            state: SessionState::Idle,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Transfer `src_uri` into `dest_path` (addressed as `dest_uri`).
    ///
    /// Blocks until the service reports an outcome or `cancel` fires.
    pub fn run(
        &mut self,
        src_uri: &str,
        dest_uri: &str,
        dest_path: &Path,
        progress: &RecordProgress,
        cancel: &CancellationSignal,
    ) -> Result<()> {
        self.state = SessionState::Preparing;

        let authority = path::uri_authority(dest_uri);
        let staging = if self.config.is_remote_owned(&authority) {
            None
        } else {
            match StagingDir::create(&self.config.staging_root) {
                Ok(staging) => Some(staging),
                Err(e) => {
                    self.state = SessionState::Failed;
                    return Err(e);
                }
            }
        };

        let (session_dest_uri, staged_file) = match &staging {
            Some(staging) => {
                let name = path::file_name(&dest_path.to_string_lossy());
                let staged = staging.path().join(name);
                (path::path_to_uri(&authority, &staged), Some(staged))
            }
            None => (dest_uri.to_string(), None),
        };

        let routing_id = path::extract_routing_id(src_uri);
        let (outcome_tx, outcome_rx) = crossbeam_channel::bounded(1);
        let callback = Arc::new(SessionCallback::new(progress.clone(), outcome_tx));

        debug!(
            src_uri,
            dest_uri = %session_dest_uri,
            routing_id = %routing_id,
            staged = staged_file.is_some(),
            "preparing remote session"
        );
        if let Err(e) = self.service.prepare_session(
            src_uri,
            &session_dest_uri,
            &routing_id,
            Arc::clone(&callback),
        ) {
            warn!("prepare_session failed for {}: {}", src_uri, e);
            callback.detach();
            self.state = SessionState::Failed;
            return Err(e.into());
        }

        self.state = SessionState::Transferring;
        let outcome = self.wait_outcome(&outcome_rx, &callback, src_uri, &session_dest_uri, cancel);

        let result = match outcome {
            Ok(SessionOutcome::Finished { session_id }) => {
                info!(session_id = %session_id, src_uri, "remote transfer finished");
                match staged_file {
                    Some(staged) => self.promote(&staged, dest_path, progress, cancel),
                    None => Ok(()),
                }
            }
            Ok(SessionOutcome::Failed { session_id, code }) => Err(CopyError::RemoteSession {
                code,
                message: format!("session {session_id} failed"),
            }),
            Err(e) => Err(e),
        };

        self.state = match result {
            Ok(()) => SessionState::Finished,
            Err(_) => SessionState::Failed,
        };
        drop(staging);
        result
    }

    fn wait_outcome(
        &self,
        outcome_rx: &Receiver<SessionOutcome>,
        callback: &SessionCallback,
        src_uri: &str,
        dest_uri: &str,
        cancel: &CancellationSignal,
    ) -> Result<SessionOutcome> {
        let interval = self.config.cancel_poll_interval();
        loop {
            match outcome_rx.recv_timeout(interval) {
                Ok(outcome) => return Ok(outcome),
                Err(RecvTimeoutError::Timeout) => {
                    if !cancel.is_cancelled() {
                        continue;
                    }
                    callback.detach();
                    if let Ok(outcome) = outcome_rx.try_recv() {
                        return Ok(outcome);
                    }

                    info!(src_uri, "cancelling remote transfer");
                    if let Err(e) = self.service.cancel_transfer(src_uri, dest_uri) {
                        warn!("cancel_transfer failed for {}: {}", src_uri, e);
                    }
                    return Err(CopyError::Cancelled);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CopyError::RemoteSession {
                        code: -1,
                        message: "session callback dropped without an outcome".to_string(),
                    });
                }
            }
        }
    }

    fn promote(
        &self,
        staged: &Path,
        dest_path: &Path,
        progress: &RecordProgress,
        cancel: &CancellationSignal,
    ) -> Result<()> {
        debug!(
            staged = %staged.display(),
            dest = %dest_path.display(),
            "promoting staged file"
        );
        LocalCopyEngine::new(self.config)
            .copy(staged, dest_path, progress, cancel)
            .map(|_| ())
    }
}

impl std::fmt::Debug for RemoteTransferSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTransferSession")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
