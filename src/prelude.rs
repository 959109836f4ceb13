//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use kb_indexer::prelude::*;
//! ```

// Core
pub use crate::core::config::{IndexingConfig, IndexingMode};
pub use crate::core::errors::{KbError, Result};

// Pipeline
pub use crate::decision::{DecisionEngine, DecisionOutcome, DecisionReason, DecisionReport};
pub use crate::discovery::{DirectoryNode, DiscoveredTree, FileNode, discover};
pub use crate::execute::{ExecutionEngine, ExecutionResults, RunState};
pub use crate::indexer::{Indexer, RunOutcome};
pub use crate::plan::{AtomicTask, ExecutionPlan, PlanGenerator, TaskType};

// Components
pub use crate::cache::AnalysisCache;
pub use crate::handlers::{Handler, HandlerRegistry};
pub use crate::status::{IndexingStatus, RunPhase};
pub use crate::summarizer::{OutlineSummarizer, Summarizer};
