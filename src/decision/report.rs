//! Immutable decision models and the per-run decision report.
//!
//! Decisions are built once by the decision engine, read by the plan
//! generator, and never mutated afterward (cascade propagation replaces a
//! directory decision wholesale rather than editing it). Every decision
//! carries a closed-enum reason plus human-readable reasoning, so any run
//! can be audited from its report alone.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Verdict attached to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// The artifact must be regenerated.
    Rebuild,
    /// The artifact is up to date.
    Skip,
    /// The artifact is stray and should be removed.
    Delete,
    /// Freshness could not be evaluated; planned conservatively as rebuild.
    Error,
}

impl fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rebuild => write!(f, "REBUILD"),
            Self::Skip => write!(f, "SKIP"),
            Self::Delete => write!(f, "DELETE"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Machine-readable reason behind a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    // Rebuild reasons.
    KnowledgeFileMissing,
    SourceFilesNewer,
    /// Listed for report compatibility; unreachable under the current
    /// write order (caches are written before their directory's KB within
    /// one run) and never emitted.
    CachedAnalysesNewer,
    SubdirectoryKnowledgeNewer,
    CacheStale,
    ChildDirectoryRebuilt,
    ComprehensiveStaleness,
    // Skip reasons.
    CacheFresh,
    UpToDate,
    EmptyDirectory,
    // Delete reasons.
    OrphanedKnowledgeFile,
    OrphanedAnalysisCache,
    ExcludedSource,
    // Error reasons.
    DecisionError,
}

impl DecisionReason {
    /// Whether this reason seeds cascading rebuilds of ancestor KBs.
    ///
    /// Only content-driven reasons seed cascades; a cascade mark itself is
    /// never re-expanded.
    #[must_use]
    pub const fn is_content_driven(&self) -> bool {
        matches!(
            self,
            Self::KnowledgeFileMissing
                | Self::SourceFilesNewer
                | Self::CachedAnalysesNewer
                | Self::SubdirectoryKnowledgeNewer
                | Self::CacheStale
                | Self::ComprehensiveStaleness
        )
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::KnowledgeFileMissing => "knowledge_file_missing",
            Self::SourceFilesNewer => "source_files_newer",
            Self::CachedAnalysesNewer => "cached_analyses_newer",
            Self::SubdirectoryKnowledgeNewer => "subdirectory_knowledge_newer",
            Self::CacheStale => "cache_stale",
            Self::ChildDirectoryRebuilt => "child_directory_rebuilt",
            Self::ComprehensiveStaleness => "comprehensive_staleness",
            Self::CacheFresh => "cache_fresh",
            Self::UpToDate => "up_to_date",
            Self::EmptyDirectory => "empty_directory",
            Self::OrphanedKnowledgeFile => "orphaned_knowledge_file",
            Self::OrphanedAnalysisCache => "orphaned_analysis_cache",
            Self::ExcludedSource => "excluded_source",
            Self::DecisionError => "decision_error",
        };
        write!(f, "{s}")
    }
}

/// Immutable rebuild/skip verdict for one file or directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildDecision {
    /// The file or directory the decision covers.
    pub path: PathBuf,
    /// The verdict.
    pub outcome: DecisionOutcome,
    /// Closed-enum reason.
    pub reason: DecisionReason,
    /// Human-readable reasoning for audit trails.
    pub reasoning: String,
    /// Structured context (timestamps, artifact paths, trigger paths).
    pub metadata: serde_json::Value,
}

/// Immutable deletion verdict for one stray artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionDecision {
    /// The artifact to remove.
    pub path: PathBuf,
    /// Why the artifact is stray.
    pub reason: DecisionReason,
    /// The executor refuses to act unless this is set.
    pub is_safe_to_delete: bool,
    /// Whether the target is a directory (removed only when empty).
    pub is_directory: bool,
    /// Human-readable reasoning.
    pub reasoning: String,
}

/// Summary counts over one report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct DecisionSummary {
    pub files_total: usize,
    pub files_rebuild: usize,
    pub files_skip: usize,
    pub files_error: usize,
    pub directories_total: usize,
    pub directories_rebuild: usize,
    pub directories_skip: usize,
    pub directories_error: usize,
    pub deletions: usize,
}

#[allow(missing_docs)]
impl DecisionSummary {
    #[must_use]
    pub fn total(&self) -> usize {
        self.files_total + self.directories_total + self.deletions
    }
}

/// The union of all decisions for one run, keyed by path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionReport {
    file_decisions: BTreeMap<PathBuf, RebuildDecision>,
    directory_decisions: BTreeMap<PathBuf, RebuildDecision>,
    deletion_decisions: Vec<DeletionDecision>,
    // Pre-computed sets kept in lockstep with the maps.
    files_to_rebuild: BTreeSet<PathBuf>,
    files_to_delete: BTreeSet<PathBuf>,
    directories_to_delete: BTreeSet<PathBuf>,
}

impl DecisionReport {
    /// Empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a file decision. Error outcomes count as rebuilds —
    /// conservative planning.
    pub fn insert_file(&mut self, decision: RebuildDecision) {
        if matches!(
            decision.outcome,
            DecisionOutcome::Rebuild | DecisionOutcome::Error
        ) {
            self.files_to_rebuild.insert(decision.path.clone());
        } else {
            self.files_to_rebuild.remove(&decision.path);
        }
        self.file_decisions.insert(decision.path.clone(), decision);
    }

    /// Record (or overwrite, for cascades) a directory decision.
    pub fn insert_directory(&mut self, decision: RebuildDecision) {
        self.directory_decisions
            .insert(decision.path.clone(), decision);
    }

    /// Record a deletion decision.
    pub fn insert_deletion(&mut self, decision: DeletionDecision) {
        if decision.is_directory {
            self.directories_to_delete.insert(decision.path.clone());
        } else {
            self.files_to_delete.insert(decision.path.clone());
        }
        self.deletion_decisions.push(decision);
    }

    /// Reverse index: the decision covering `path`, file or directory.
    #[must_use]
    pub fn decision_for(&self, path: &Path) -> Option<&RebuildDecision> {
        self.file_decisions
            .get(path)
            .or_else(|| self.directory_decisions.get(path))
    }

    /// The directory decision for `path`, if any.
    #[must_use]
    pub fn directory_decision(&self, path: &Path) -> Option<&RebuildDecision> {
        self.directory_decisions.get(path)
    }

    /// All file decisions, ordered by path.
    pub fn file_decisions(&self) -> impl Iterator<Item = &RebuildDecision> {
        self.file_decisions.values()
    }

    /// All directory decisions, ordered by path.
    pub fn directory_decisions(&self) -> impl Iterator<Item = &RebuildDecision> {
        self.directory_decisions.values()
    }

    /// All deletion decisions, in discovery order.
    #[must_use]
    pub fn deletion_decisions(&self) -> &[DeletionDecision] {
        &self.deletion_decisions
    }

    /// Files whose caches must be regenerated (rebuild or error outcomes).
    #[must_use]
    pub fn files_to_rebuild(&self) -> &BTreeSet<PathBuf> {
        &self.files_to_rebuild
    }

    /// Stray artifact files to delete.
    #[must_use]
    pub fn files_to_delete(&self) -> &BTreeSet<PathBuf> {
        &self.files_to_delete
    }

    /// Stray artifact directories to delete.
    #[must_use]
    pub fn directories_to_delete(&self) -> &BTreeSet<PathBuf> {
        &self.directories_to_delete
    }

    /// Summary counts.
    #[must_use]
    pub fn summary(&self) -> DecisionSummary {
        let mut summary = DecisionSummary {
            files_total: self.file_decisions.len(),
            directories_total: self.directory_decisions.len(),
            deletions: self.deletion_decisions.len(),
            ..DecisionSummary::default()
        };
        for decision in self.file_decisions.values() {
            match decision.outcome {
                DecisionOutcome::Rebuild => summary.files_rebuild += 1,
                DecisionOutcome::Skip => summary.files_skip += 1,
                DecisionOutcome::Error => summary.files_error += 1,
                DecisionOutcome::Delete => {}
            }
        }
        for decision in self.directory_decisions.values() {
            match decision.outcome {
                DecisionOutcome::Rebuild => summary.directories_rebuild += 1,
                DecisionOutcome::Skip => summary.directories_skip += 1,
                DecisionOutcome::Error => summary.directories_error += 1,
                DecisionOutcome::Delete => {}
            }
        }
        summary
    }
}
