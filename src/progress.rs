//! Progress Aggregation
//!
//! Folds per-record, per-file byte progress into one overall percentage.
//!
//! ```text
//!  0%            20%                                                100%
//!  ├── setup ────┼──────────── transfer band (weight 0.8) ───────────┤
//!                │ record 1 │ record 2 │   ...   │ record N │
//! ```
//!
//! For record `i` (1-based) of `N` with file-level percent `p`, the transfer
//! band position is `((i - 1) * 100 + p) / N`. Reported values never go
//! backwards, and the final report is always exactly 100.
//!
//! One aggregator is created per orchestrator call and shared (via `Arc`)
//! with the watch thread and remote callback threads of that call only.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

/// Percentage consumed by setup before any byte moves
pub const SETUP_BAND_PERCENT: u32 = 20;

/// Share of the overall range given to byte transfer
pub const TRANSFER_BAND_WEIGHT: f64 = 0.8;

/// Progress snapshot handed to the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressInfo {
    /// Overall completion, 0-100
    pub percentage: u32,
}

/// Caller-supplied progress sink
pub type ProgressListener = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// File-level percentage from byte counts.
///
/// Computed on kilobytes and rounded, clamped to 0-100. A zero-byte file is
/// complete as soon as it is seen.
pub fn file_percentage(processed: u64, total: u64) -> u32 {
    if total == 0 {
        return 100;
    }
    let processed_kb = processed as f64 / 1024.0;
    let total_kb = total as f64 / 1024.0;
    let percent = (100.0 * processed_kb / total_kb).round();
    percent.clamp(0.0, 100.0) as u32
}

#[derive(Debug, Default)]
struct AggregateState {
    total_records: usize,
    current_index: usize,
    last_reported: Option<u32>,
    finished: bool,
}

/// Maps record/file progress onto one monotonic overall percentage
pub struct ProgressAggregator {
    listener: Option<ProgressListener>,
    state: Mutex<AggregateState>,
}

impl ProgressAggregator {
    /// Create an aggregator for a run over `total_records` URI-bearing records
    pub fn new(listener: Option<ProgressListener>, total_records: usize) -> Self {
        Self {
            listener,
            state: Mutex::new(AggregateState {
                total_records,
                ..Default::default()
            }),
        }
    }

    /// Emit the setup band, marking the start of byte transfer
    pub fn begin(&self) {
        let mut state = self.state.lock();
        self.emit(&mut state, SETUP_BAND_PERCENT);
    }

    /// Report file-level progress `file_percent` for record `index` (1-based).
    ///
    /// Updates for a record before the current one are ignored.
    pub fn update(&self, index: usize, file_percent: u32) {
        let mut state = self.state.lock();
        if state.finished || index == 0 || index < state.current_index {
            return;
        }
        state.current_index = index;

        let overall = overall_percentage(index, state.total_records, file_percent);
        self.emit(&mut state, overall);
    }

    /// Emit the final 100% report. Always delivered, even if 100 was seen before.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.finished = true;
        state.last_reported = Some(100);
        if let Some(listener) = &self.listener {
            listener(ProgressInfo { percentage: 100 });
        }
    }

    /// Last percentage delivered to the listener
    pub fn last_reported(&self) -> Option<u32> {
        self.state.lock().last_reported
    }

    fn emit(&self, state: &mut AggregateState, percentage: u32) {
        if state.last_reported.is_some_and(|last| percentage <= last) {
            return;
        }
        state.last_reported = Some(percentage);
        trace!(percentage, index = state.current_index, "progress");

        // Delivered under the lock so watch-thread and caller-thread reports
        // reach the listener in order.
        if let Some(listener) = &self.listener {
            listener(ProgressInfo { percentage });
        }
    }
}

impl fmt::Debug for ProgressAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressAggregator")
            .field("has_listener", &self.listener.is_some())
            .field("state", &*self.state.lock())
            .finish()
    }
}

fn overall_percentage(index: usize, total_records: usize, file_percent: u32) -> u32 {
    if total_records == 0 {
        return SETUP_BAND_PERCENT;
    }
    let file_percent = file_percent.min(100) as f64;
    let band = ((index - 1) as f64 * 100.0 + file_percent) / total_records as f64;
    let overall = SETUP_BAND_PERCENT as f64 + band * TRANSFER_BAND_WEIGHT;
    (overall.round() as u32).min(100)
}

/// Progress handle bound to one record of a run
#[derive(Debug, Clone)]
pub struct RecordProgress {
    aggregator: Arc<ProgressAggregator>,
    index: usize,
}

impl RecordProgress {
    /// Bind `aggregator` to record `index` (1-based)
    pub fn new(aggregator: Arc<ProgressAggregator>, index: usize) -> Self {
        Self { aggregator, index }
    }

    /// Record index this handle reports for
    pub fn index(&self) -> usize {
        self.index
    }

    /// Report a file-level percentage
    pub fn report_percent(&self, file_percent: u32) {
        self.aggregator.update(self.index, file_percent);
    }

    /// Report byte counts for the active file or subtree
    pub fn report_bytes(&self, processed: u64, total: u64) {
        self.report_percent(file_percentage(processed, total));
    }
}
