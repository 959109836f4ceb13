//! Append-only JSONL run-event logging with graceful degradation.

pub mod jsonl;

pub use jsonl::{EventType, LogEntry, RunLogger, Severity};
