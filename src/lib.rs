//! # lamco-clipboard-transfer
//!
//! File-content transfer engine for pasted clipboard data.
//!
//! When a paste references files that live in another sandbox or on another
//! device, their content has to be copied somewhere the pasting app can read
//! it. This crate does that copy, reports one blended progress percentage
//! for the whole paste and honors cancellation throughout.
//!
//! # Architecture
//!
//! ```text
//! CopyOrchestrator
//!   ├─> PathResolver (URI ⇄ path, local vs remote routing)
//!   ├─> LocalCopyEngine (fs copy + watch thread for progress)
//!   ├─> RemoteTransferSession (remote service handshake, staging)
//!   ├─> ProgressAggregator (per-call, monotonic overall percentage)
//!   └─> CancellationSignal (polled before and during every transfer)
//! ```
//!
//! # Data Flow
//!
//! **Local Path:** Record → PathResolver → LocalCopyEngine → destination
//!
//! **Remote Path:** Record → PathResolver → RemoteTransferService → staging → destination
//!
//! **Progress Path:** watch thread / service callback → ProgressAggregator → listener

#![warn(missing_docs)]
#![warn(clippy::all)]

// =============================================================================
// Engine
// =============================================================================

/// Paste entry point
///
/// Iterates the URI-bearing records of a paste, applies the conflict policy,
/// routes each record to the local or remote engine and rewrites or drops it
/// depending on the outcome.
pub mod orchestrator;

/// Same-device copy of files and directory trees
///
/// Progress is derived from filesystem change notifications on the
/// destination rather than from the copy loop:
/// - **Inotify** on Linux (inotify fd + eventfd wake, multiplexed with poll)
/// - **Polling** everywhere else (periodic size scans)
pub mod local;

/// Cross-device transfer through a remote transfer service
pub mod remote;

/// Overall progress computation
pub mod progress;

/// Cancellation source shared by all engines
pub mod cancel;

/// URI and path helpers
pub mod path;

/// Clipboard record model seam
pub mod records;

// =============================================================================
// Ambient
// =============================================================================

/// Engine configuration
pub mod config;

/// Error types
pub mod error;

/// Tracing subscriber setup for host processes
pub mod logging;

// =============================================================================
// Re-exports
// =============================================================================

pub use cancel::{CancelHook, CancellationSignal};
pub use config::{Config, TransferConfig};
pub use error::{CopyError, Result};
pub use orchestrator::{
    ConflictPolicy, CopyOrchestrator, RecordOutcome, TransferParams, TransferReport,
    TransferStatus,
};
pub use progress::{ProgressInfo, ProgressListener};
pub use records::{PasteData, PasteRecord, RecordSet};
pub use remote::{RemoteError, RemoteTransferService, SessionCallback};
