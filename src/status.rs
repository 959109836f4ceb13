//! Shared run status: an explicit, snapshot-able view of the pipeline's
//! progress held by the run object and read by the trigger surface.

use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Pipeline phase currently in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// No run in progress.
    #[default]
    Idle,
    /// Walking the source tree.
    Discovering,
    /// Computing rebuild/skip/delete decisions.
    Deciding,
    /// Converting decisions into the task DAG.
    Planning,
    /// Running tasks under the worker pool.
    Executing,
    /// Run finished (see counters for the outcome).
    Completed,
}

/// A point-in-time view of run progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexingStatus {
    /// Current phase.
    pub phase: RunPhase,
    /// Files found by discovery.
    pub files_discovered: usize,
    /// Directories found by discovery.
    pub directories_discovered: usize,
    /// File tasks completed (analyzed or confirmed cached).
    pub files_completed: usize,
    /// File tasks failed.
    pub files_failed: usize,
    /// LLM calls made so far.
    pub llm_calls: usize,
    /// Seconds elapsed since the run started.
    pub duration_secs: f64,
    /// Most recent error message, if any.
    pub last_error: Option<String>,
}

impl IndexingStatus {
    /// Completion percentage over discovered files (100 when nothing to do).
    #[must_use]
    pub fn completion_percentage(&self) -> f64 {
        if self.files_discovered == 0 {
            return 100.0;
        }
        let done = self.files_completed + self.files_failed;
        #[allow(clippy::cast_precision_loss)]
        {
            (done as f64 / self.files_discovered as f64) * 100.0
        }
    }
}

/// Thread-safe owner of the mutable status.
pub struct StatusHandle {
    inner: RwLock<IndexingStatus>,
    started: RwLock<Option<Instant>>,
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHandle {
    /// Fresh idle status.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexingStatus::default()),
            started: RwLock::new(None),
        }
    }

    /// Reset counters and mark the run started.
    pub fn begin_run(&self) {
        *self.inner.write() = IndexingStatus {
            phase: RunPhase::Discovering,
            ..IndexingStatus::default()
        };
        *self.started.write() = Some(Instant::now());
    }

    /// Advance to a new phase.
    pub fn set_phase(&self, phase: RunPhase) {
        self.inner.write().phase = phase;
    }

    /// Record discovery totals.
    pub fn record_discovery(&self, files: usize, directories: usize) {
        let mut inner = self.inner.write();
        inner.files_discovered += files;
        inner.directories_discovered += directories;
    }

    /// Record a finished file task.
    pub fn record_file_completed(&self) {
        self.inner.write().files_completed += 1;
    }

    /// Record a failed file task and remember the error.
    pub fn record_file_failed(&self, error: &str) {
        let mut inner = self.inner.write();
        inner.files_failed += 1;
        inner.last_error = Some(error.to_string());
    }

    /// Record a non-file failure (directory task, verification).
    pub fn record_error(&self, error: &str) {
        self.inner.write().last_error = Some(error.to_string());
    }

    /// Count one LLM call.
    pub fn record_llm_call(&self) {
        self.inner.write().llm_calls += 1;
    }

    /// Point-in-time copy with the duration refreshed.
    #[must_use]
    pub fn snapshot(&self) -> IndexingStatus {
        let mut snapshot = self.inner.read().clone();
        if let Some(started) = *self.started.read() {
            snapshot.duration_secs = started.elapsed().as_secs_f64();
        }
        snapshot
    }
}
