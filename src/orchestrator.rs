//! Copy Orchestrator
//!
//! Entry point of the engine. Walks the URI-bearing records of a paste in
//! order, resolves each one against the destination root, applies the
//! conflict policy and routes the byte transfer to either the
//! [`LocalCopyEngine`] or a [`RemoteTransferSession`].
//!
//! Successful records get their URI rewritten to the destination; failed or
//! cancelled records are removed from the set. Records without a URI are left
//! alone. Progress for the whole call flows through one
//! [`ProgressAggregator`] owned by that call.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cancel::{CancelHook, CancellationSignal};
use crate::config::TransferConfig;
use crate::error::{classify_error, CopyError, Result};
use crate::local::LocalCopyEngine;
use crate::path;
use crate::progress::{ProgressAggregator, ProgressListener, RecordProgress};
use crate::records::RecordSet;
use crate::remote::{RemoteTransferService, RemoteTransferSession};

/// What to do when the destination already exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Replace the existing destination
    #[default]
    Overwrite,
    /// Leave it and drop the record
    Skip,
}

/// Per-call transfer parameters
#[derive(Clone, Default)]
pub struct TransferParams {
    /// File URI of the destination file or directory
    pub destination_root: String,
    /// Conflict handling
    pub conflict_policy: ConflictPolicy,
    /// Receives overall percentages
    pub progress_listener: Option<ProgressListener>,
    /// Polled for cancellation
    pub cancel_hook: Option<CancelHook>,
}

impl TransferParams {
    /// Parameters copying into `destination_root`
    pub fn new(destination_root: impl Into<String>) -> Self {
        Self {
            destination_root: destination_root.into(),
            ..Default::default()
        }
    }

    /// Set the conflict policy
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Set the progress listener
    pub fn with_progress_listener(mut self, listener: ProgressListener) -> Self {
        self.progress_listener = Some(listener);
        self
    }

    /// Set the cancellation hook
    pub fn with_cancel_hook(mut self, hook: CancelHook) -> Self {
        self.cancel_hook = Some(hook);
        self
    }
}

impl std::fmt::Debug for TransferParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferParams")
            .field("destination_root", &self.destination_root)
            .field("conflict_policy", &self.conflict_policy)
            .field("progress_listener", &self.progress_listener.is_some())
            .field("cancel_hook", &self.cancel_hook.is_some())
            .finish()
    }
}

/// Which engine moves a record's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferRoute {
    /// Same device
    Local,
    /// Cross-device through the remote service
    Remote,
}

/// Resolved description of one record's transfer
#[derive(Debug, Clone)]
pub struct CopyInfo {
    /// Original record URI
    pub src_uri: String,
    /// URI the record will carry after a successful transfer
    pub dest_uri: String,
    /// Real source path
    pub src_path: PathBuf,
    /// Real destination path
    pub dest_path: PathBuf,
    /// Source is a regular file
    pub is_file: bool,
    /// Source paths covered by this record (the file itself, or a directory's entries)
    pub file_paths: Vec<PathBuf>,
    /// Chosen engine
    pub route: TransferRoute,
    /// Code of the failure that ended this record, if any
    pub error_code: Option<i32>,
}

/// How one record ended
#[derive(Debug)]
pub enum RecordOutcome {
    /// Transferred; the record now carries `dest_uri`
    Copied {
        /// Rewritten URI
        dest_uri: String,
    },
    /// Destination existed under [`ConflictPolicy::Skip`]
    Skipped,
    /// Transfer failed
    Failed(CopyError),
    /// Cancelled before or during the transfer
    Cancelled,
}

/// Outcome of one URI-bearing record
#[derive(Debug)]
pub struct RecordReport {
    /// 1-based position among URI-bearing records
    pub index: usize,
    /// Original record URI
    pub src_uri: String,
    /// How it ended
    pub outcome: RecordOutcome,
}

/// Terminal status of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Every record was attempted
    Completed,
    /// Cancellation was observed
    Cancelled,
}

/// Summary of one [`CopyOrchestrator::copy`] call
#[derive(Debug)]
pub struct TransferReport {
    /// Terminal status
    pub status: TransferStatus,
    /// Per-record outcomes in order
    pub records: Vec<RecordReport>,
}

impl TransferReport {
    /// Records transferred
    pub fn copied(&self) -> usize {
        self.count(|o| matches!(o, RecordOutcome::Copied { .. }))
    }

    /// Records skipped by the conflict policy
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, RecordOutcome::Skipped))
    }

    /// Records that failed
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RecordOutcome::Failed(_)))
    }

    /// Records dropped by cancellation
    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, RecordOutcome::Cancelled))
    }

    fn count(&self, pred: impl Fn(&RecordOutcome) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Copies pasted file records into a destination
pub struct CopyOrchestrator {
    config: TransferConfig,
    remote: Option<Arc<dyn RemoteTransferService>>,
}

impl CopyOrchestrator {
    /// Orchestrator without a remote service; remote records fail
    pub fn new(config: TransferConfig) -> Self {
        Self {
            config,
            remote: None,
        }
    }

    /// Attach the cross-device transfer service
    pub fn with_remote_service(mut self, service: Arc<dyn RemoteTransferService>) -> Self {
        self.remote = Some(service);
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Transfer every URI-bearing record of `records` into
    /// `params.destination_root`, rewriting or removing records in place.
    ///
    /// Record-level failures are reported in the returned
    /// [`TransferReport`]. The call itself only fails for invalid parameters
    /// (before any progress is emitted) or when the remote service became
    /// unavailable; in that case the final 100% has still been emitted.
    pub fn copy(
        &self,
        records: &mut dyn RecordSet,
        params: &TransferParams,
    ) -> Result<TransferReport> {
        if records.record_count() == 0 {
            return Err(CopyError::InvalidParameter("record set is empty".to_string()));
        }
        if path::uri_to_path(&params.destination_root).is_empty() {
            return Err(CopyError::InvalidParameter(format!(
                "destination root is not a file URI: {:?}",
                params.destination_root
            )));
        }

        let cancel = match &params.cancel_hook {
            Some(hook) => CancellationSignal::with_hook(Arc::clone(hook)),
            None => CancellationSignal::new(),
        };

        let uri_records = (0..records.record_count())
            .filter(|&i| records.uri_at(i).is_some())
            .count();
        let aggregator = Arc::new(ProgressAggregator::new(
            params.progress_listener.clone(),
            uri_records,
        ));
        aggregator.begin();

        info!(
            records = records.record_count(),
            uri_records,
            destination = %params.destination_root,
            policy = ?params.conflict_policy,
            "starting paste transfer"
        );

        let mut reports = Vec::with_capacity(uri_records);
        let mut transport_fault: Option<String> = None;
        let mut cursor = 0;
        let mut index = 0;

        while cursor < records.record_count() {
            let Some(src_uri) = records.uri_at(cursor) else {
                cursor += 1;
                continue;
            };
            index += 1;
            let progress = RecordProgress::new(Arc::clone(&aggregator), index);

            let outcome =
                self.transfer_record(&src_uri, params, &progress, &cancel, &mut transport_fault);

            match &outcome {
                RecordOutcome::Copied { dest_uri } => {
                    records.set_uri(cursor, dest_uri.clone());
                    cursor += 1;
                }
                _ => records.remove_at(cursor),
            }
            reports.push(RecordReport {
                index,
                src_uri,
                outcome,
            });
        }

        aggregator.finish();

        let status = if cancel.is_cancelled() {
            TransferStatus::Cancelled
        } else {
            TransferStatus::Completed
        };
        let report = TransferReport {
            status,
            records: reports,
        };
        info!(
            status = ?report.status,
            copied = report.copied(),
            skipped = report.skipped(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            "paste transfer done"
        );

        match transport_fault {
            Some(reason) => Err(CopyError::TransportFault(reason)),
            None => Ok(report),
        }
    }

    fn transfer_record(
        &self,
        src_uri: &str,
        params: &TransferParams,
        progress: &RecordProgress,
        cancel: &CancellationSignal,
        transport_fault: &mut Option<String>,
    ) -> RecordOutcome {
        if cancel.is_cancelled() {
            debug!(index = progress.index(), src_uri, "cancelled before start");
            return RecordOutcome::Cancelled;
        }

        let mut info = match resolve(src_uri, params) {
            Ok(info) => info,
            Err(CopyError::FileConflict(dest)) => {
                info!(src_uri, dest = %dest.display(), "destination exists, skipping");
                return RecordOutcome::Skipped;
            }
            Err(e) => return self.record_failed(progress.index(), src_uri, e),
        };
        debug!(?info, "resolved record");

        let result = match info.route {
            TransferRoute::Local => LocalCopyEngine::new(&self.config)
                .copy(&info.src_path, &info.dest_path, progress, cancel)
                .map(|bytes| {
                    debug!(bytes, dest = %info.dest_path.display(), "local copy complete");
                }),
            TransferRoute::Remote => self.transfer_remote(&info, progress, cancel, transport_fault),
        };

        match result {
            Ok(()) => {
                progress.report_percent(100);
                info!(index = progress.index(), dest_uri = %info.dest_uri, "record transferred");
                RecordOutcome::Copied {
                    dest_uri: info.dest_uri,
                }
            }
            Err(CopyError::Cancelled) => {
                info!(index = progress.index(), src_uri, "record cancelled");
                RecordOutcome::Cancelled
            }
            Err(e) => {
                info.error_code = Some(e.code());
                debug!(copy_info = ?info, "record ended with error");
                if !e.is_record_scoped() && transport_fault.is_none() {
                    *transport_fault = Some(match &e {
                        CopyError::TransportFault(reason) => reason.clone(),
                        other => other.to_string(),
                    });
                }
                self.record_failed(progress.index(), src_uri, e)
            }
        }
    }

    fn transfer_remote(
        &self,
        info: &CopyInfo,
        progress: &RecordProgress,
        cancel: &CancellationSignal,
        transport_fault: &Option<String>,
    ) -> Result<()> {
        if !info.is_file {
            return Err(CopyError::UnsupportedRemoteDirectory(info.src_path.clone()));
        }
        if let Some(reason) = transport_fault {
            return Err(CopyError::TransportFault(reason.clone()));
        }
        let Some(service) = self.remote.as_deref() else {
            return Err(CopyError::RemoteSession {
                code: -1,
                message: "no remote transfer service configured".to_string(),
            });
        };

        RemoteTransferSession::new(service, &self.config).run(
            &info.src_uri,
            &info.dest_uri,
            &info.dest_path,
            progress,
            cancel,
        )
    }

    fn record_failed(&self, index: usize, src_uri: &str, error: CopyError) -> RecordOutcome {
        warn!(
            index,
            src_uri,
            error_type = ?classify_error(&error),
            code = error.code(),
            "record transfer failed: {}",
            error
        );
        RecordOutcome::Failed(error)
    }
}

impl std::fmt::Debug for CopyOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyOrchestrator")
            .field("config", &self.config)
            .field("remote", &self.remote.is_some())
            .finish()
    }
}

/// Resolve the source and destination of `src_uri` under `params`.
///
/// Returns [`CopyError::FileConflict`] when the destination exists and the
/// policy is [`ConflictPolicy::Skip`].
pub fn resolve(src_uri: &str, params: &TransferParams) -> Result<CopyInfo> {
    let src = path::uri_to_path(src_uri);
    if src.is_empty() {
        return Err(CopyError::PathResolution(format!(
            "not a file URI: {src_uri}"
        )));
    }
    let src_path = PathBuf::from(&src);
    let is_file = path::is_file(&src_path);
    if !is_file && !path::is_directory(&src_path) {
        return Err(CopyError::PathResolution(format!(
            "source does not exist: {src}"
        )));
    }

    let authority = path::uri_authority(&params.destination_root);
    let root_path = PathBuf::from(path::uri_to_path(&params.destination_root));
    let dest_path = if path::is_directory(&root_path) {
        root_path.join(path::file_name(&src))
    } else {
        root_path
    };
    if dest_path == src_path {
        return Err(CopyError::PathResolution(format!(
            "source and destination are the same: {src}"
        )));
    }

    if params.conflict_policy == ConflictPolicy::Skip && fs::symlink_metadata(&dest_path).is_ok()
    {
        return Err(CopyError::FileConflict(dest_path));
    }

    let file_paths = if is_file {
        vec![src_path.clone()]
    } else {
        let mut entries: Vec<PathBuf> = fs::read_dir(&src_path)
            .map_err(|e| CopyError::local(&src_path, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();
        entries
    };

    let route = if path::is_remote_addressed(src_uri) {
        TransferRoute::Remote
    } else {
        TransferRoute::Local
    };

    Ok(CopyInfo {
        src_uri: src_uri.to_string(),
        dest_uri: path::path_to_uri(&authority, &dest_path),
        src_path,
        dest_path,
        is_file,
        file_paths,
        route,
        error_code: None,
    })
}
