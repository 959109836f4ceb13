//! Centralized staleness analysis: every file, directory, and stray
//! artifact gets an immutable decision with a machine-readable reason
//! before any work is planned.

pub mod engine;
pub mod report;

pub use engine::DecisionEngine;
pub use report::{
    DecisionOutcome, DecisionReason, DecisionReport, DecisionSummary, DeletionDecision,
    RebuildDecision,
};
