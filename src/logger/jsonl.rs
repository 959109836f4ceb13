//! JSONL run logger: append-only line-delimited JSON for agent-friendly
//! log consumption.
//!
//! Each line is a self-contained JSON object. Lines are assembled in memory
//! and written with a single `write_all` so a tailing process never sees a
//! partial line.
//!
//! Three-level fallback chain:
//! 1. Primary file path
//! 2. stderr with a `[KBX-LOG]` prefix
//! 3. Silent discard (an indexing run must never crash for logging failures)

#![allow(missing_docs)]

use std::fs::{self, OpenOptions, rename};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::timestamps;

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Run lifecycle and task events emitted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStart,
    DiscoveryComplete,
    DecisionsComplete,
    PlanReady,
    TaskCompleted,
    TaskFailed,
    OrphanDeleted,
    RunComplete,
    Warning,
    Error,
}

/// A single JSONL log entry — all fields optional except `ts`, `event`,
/// `severity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    /// Event type identifier.
    pub event: EventType,
    /// Severity level.
    pub severity: Severity,
    /// Affected filesystem path (when applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Task identifier (task events).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Duration of the action in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Whether the action succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// KBI error code if the action failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Human-readable error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Freeform details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: timestamps::format_rfc3339(std::time::SystemTime::now()),
            event,
            severity,
            path: None,
            task_id: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    pub fn with_path(mut self, path: &Path) -> Self {
        self.path = Some(path.to_string_lossy().into_owned());
        self
    }

    pub fn with_task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_error(mut self, code: &str, message: impl Into<String>) -> Self {
        self.error_code = Some(code.to_string());
        self.error_message = Some(message.into());
        self
    }
}

/// Degradation state of the JSONL writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    /// Writing to the primary path.
    Normal,
    /// Primary failed; writing to stderr.
    Stderr,
    /// Everything failed or logging is disabled: discard.
    Discard,
}

struct WriterInner {
    state: WriterState,
    path: Option<PathBuf>,
    max_size_bytes: u64,
}

/// Thread-safe JSONL run logger.
pub struct RunLogger {
    inner: Mutex<WriterInner>,
}

impl RunLogger {
    /// Logger writing to `path`, rotating once at `max_size_bytes`.
    pub fn new(path: PathBuf, max_size_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(WriterInner {
                state: WriterState::Normal,
                path: Some(path),
                max_size_bytes,
            }),
        }
    }

    /// Logger that discards info events; warnings and above reach stderr.
    pub fn disabled() -> Self {
        Self {
            inner: Mutex::new(WriterInner {
                state: WriterState::Discard,
                path: None,
                max_size_bytes: 0,
            }),
        }
    }

    /// Append one entry, degrading on write failure rather than erroring.
    pub fn log(&self, entry: &LogEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(_) => return,
        };

        let mut inner = self.inner.lock();
        match inner.state {
            WriterState::Normal => {
                if Self::append_line(&mut inner, &line).is_err() {
                    inner.state = WriterState::Stderr;
                    eprintln!("[KBX-LOG] {line}");
                }
            }
            WriterState::Stderr => eprintln!("[KBX-LOG] {line}"),
            WriterState::Discard => {
                if entry.severity != Severity::Info {
                    eprintln!("[KBX-LOG] {line}");
                }
            }
        }
    }

    /// Shorthand for a warning attached to a path.
    pub fn warn_path(&self, path: &Path, message: impl Into<String>) {
        self.log(
            &LogEntry::new(EventType::Warning, Severity::Warning)
                .with_path(path)
                .with_details(message),
        );
    }

    fn append_line(inner: &mut WriterInner, line: &str) -> std::io::Result<()> {
        let Some(path) = inner.path.clone() else {
            return Err(std::io::Error::other("no log path"));
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::rotate_if_needed(&path, inner.max_size_bytes)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        file.write_all(buf.as_bytes())
    }

    fn rotate_if_needed(path: &Path, max_size_bytes: u64) -> std::io::Result<()> {
        if max_size_bytes == 0 {
            return Ok(());
        }
        match fs::metadata(path) {
            Ok(meta) if meta.len() >= max_size_bytes => {
                let mut rotated = path.as_os_str().to_owned();
                rotated.push(".1");
                rename(path, PathBuf::from(rotated))
            }
            _ => Ok(()),
        }
    }
}
