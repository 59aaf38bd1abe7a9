//! Shared dashboard state: cow counts, status log and progress gauge.
//!
//! All display state lives in one object with a single mutation entry
//! point per field, so the last-writer-wins behavior of overlapping
//! submission cycles is an explicit contract rather than a side effect of
//! update ordering. The view layer only ever reads snapshots.

use crate::detect_client::DetectionResult;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

/// Progress checkpoint: no payload produced yet.
pub const PROGRESS_IDLE: u8 = 0;
/// Progress checkpoint: frame encoded.
pub const PROGRESS_ENCODED: u8 = 50;
/// Progress checkpoint: payload submitted, response pending.
pub const PROGRESS_SUBMITTED: u8 = 75;
/// Progress checkpoint: result aggregated.
pub const PROGRESS_COMPLETED: u8 = 100;

/// One entry in the status log.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusEntry {
    /// Monotonically increasing entry number
    pub sequence: u64,

    /// Human-readable event description
    pub message: String,
}

/// The three displayed cow counts.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CowCounts {
    pub total: u32,
    pub standing: u32,
    pub laying: u32,
}

impl From<&DetectionResult> for CowCounts {
    fn from(result: &DetectionResult) -> Self {
        Self {
            total: result.total,
            standing: result.standing,
            laying: result.laying,
        }
    }
}

/// Outcome of applying a detection result to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Counts were replaced with the new values
    Applied,
    /// Result came from a cycle older than the newest applied one and the
    /// stale guard is enabled
    Stale,
    /// The pipeline has been stopped; the result was discarded
    Inactive,
}

/// Read-only view of the dashboard state.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub counts: CowCounts,
    pub progress: u8,
    pub status_log: Vec<StatusEntry>,
}

struct StatusLog {
    entries: VecDeque<StatusEntry>,
    /// 0 = unbounded
    capacity: usize,
}

impl StatusLog {
    fn push(&mut self, entry: StatusEntry) {
        if self.capacity > 0 && self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }
}

/// Shared state read by the view layer and mutated by the pipeline.
pub struct DashboardState {
    counts: RwLock<CowCounts>,
    log: RwLock<StatusLog>,
    next_sequence: AtomicU64,
    progress: AtomicU8,
    /// Newest applied cycle + 1; 0 means no result applied yet
    last_applied_cycle: AtomicU64,
    reject_stale_results: bool,
    active: AtomicBool,
}

impl DashboardState {
    /// Create a new state object.
    ///
    /// `status_log_capacity` bounds the retained log entries; 0 keeps the
    /// log unbounded. `reject_stale_results` enables the cycle-ordering
    /// guard on [`apply_result`](Self::apply_result).
    pub fn new(status_log_capacity: usize, reject_stale_results: bool) -> Self {
        Self {
            counts: RwLock::new(CowCounts::default()),
            log: RwLock::new(StatusLog {
                entries: VecDeque::new(),
                capacity: status_log_capacity,
            }),
            next_sequence: AtomicU64::new(0),
            progress: AtomicU8::new(PROGRESS_IDLE),
            last_applied_cycle: AtomicU64::new(0),
            reject_stale_results,
            active: AtomicBool::new(true),
        }
    }

    /// Append a status entry; returns its sequence number.
    pub fn push_status(&self, message: impl Into<String>) -> u64 {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        self.log.write().push(StatusEntry {
            sequence,
            message: message.into(),
        });
        sequence
    }

    /// Current progress gauge value.
    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::SeqCst)
    }

    /// Current displayed counts.
    pub fn counts(&self) -> CowCounts {
        *self.counts.read()
    }

    /// Number of retained status entries.
    pub fn status_log_len(&self) -> usize {
        self.log.read().entries.len()
    }

    /// Reset the progress gauge for a new cycle.
    pub fn begin_cycle(&self) {
        self.progress.store(PROGRESS_IDLE, Ordering::SeqCst);
    }

    /// Mark the encode stage complete.
    pub fn mark_encoded(&self) {
        self.progress.store(PROGRESS_ENCODED, Ordering::SeqCst);
    }

    /// Mark the payload as submitted (response pending).
    pub fn mark_submitted(&self) {
        self.progress.store(PROGRESS_SUBMITTED, Ordering::SeqCst);
    }

    /// Mark the cycle complete.
    pub fn mark_completed(&self) {
        self.progress.store(PROGRESS_COMPLETED, Ordering::SeqCst);
    }

    /// Replace the displayed counts with a cycle's detection result.
    ///
    /// Replacement is unconditional on arrival order unless the stale
    /// guard is enabled, in which case results from cycles older than the
    /// newest applied one are discarded. Once [`deactivate`](Self::deactivate)
    /// has been called, results are discarded regardless.
    pub fn apply_result(&self, cycle: u64, result: &DetectionResult) -> ApplyOutcome {
        if !self.active.load(Ordering::SeqCst) {
            return ApplyOutcome::Inactive;
        }

        let marker = cycle + 1;
        if self.reject_stale_results {
            let newest = self.last_applied_cycle.load(Ordering::SeqCst);
            if marker < newest {
                return ApplyOutcome::Stale;
            }
        }

        *self.counts.write() = CowCounts::from(result);
        self.last_applied_cycle.fetch_max(marker, Ordering::SeqCst);
        ApplyOutcome::Applied
    }

    /// Stop accepting detection results; used at shutdown so in-flight
    /// submissions cannot mutate the counts afterwards.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Whether results are still being accepted.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Take a read-only snapshot of the full state.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            counts: self.counts(),
            progress: self.progress(),
            status_log: self.log.read().entries.iter().cloned().collect(),
        }
    }

    /// The trailing `limit` status entries (all of them when `limit` is 0).
    pub fn status_tail(&self, limit: usize) -> Vec<StatusEntry> {
        let log = self.log.read();
        let skip = if limit > 0 && log.entries.len() > limit {
            log.entries.len() - limit
        } else {
            0
        };
        log.entries.iter().skip(skip).cloned().collect()
    }
}
