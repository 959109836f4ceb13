//! The decision engine: four phases over the discovered trees.
//!
//! 1. File decisions — cache freshness per file.
//! 2. Directory decisions — KB freshness vs constituents, leaf-first.
//! 3. Deletion decisions — handler-scoped orphan scans with reverse
//!    mapping validation.
//! 4. Cascading propagation — content-driven directory rebuilds force
//!    every ancestor up to the source root.
//!
//! A filesystem error while evaluating one node yields an ERROR decision;
//! it never aborts the analysis.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;

use crate::cache::AnalysisCache;
use crate::core::config::IndexingMode;
use crate::core::timestamps;
use crate::decision::report::{
    DecisionOutcome, DecisionReason, DecisionReport, DeletionDecision, RebuildDecision,
};
use crate::discovery::{DirectoryNode, DiscoveredTree};
use crate::handlers::{ArtifactKind, Handler, HandlerRegistry};
use crate::logger::RunLogger;

/// Centralized staleness analysis over one run's discovered trees.
pub struct DecisionEngine<'a> {
    mode: IndexingMode,
    cache: &'a AnalysisCache,
    logger: &'a RunLogger,
}

impl<'a> DecisionEngine<'a> {
    /// Build an engine for the given mode.
    #[must_use]
    pub fn new(mode: IndexingMode, cache: &'a AnalysisCache, logger: &'a RunLogger) -> Self {
        Self {
            mode,
            cache,
            logger,
        }
    }

    /// Produce the decision report covering every file, every directory,
    /// and every stray artifact in the handlers' output areas.
    #[must_use]
    pub fn decide(
        &self,
        trees: &[DiscoveredTree],
        registry: &HandlerRegistry,
        source_root: &Path,
    ) -> DecisionReport {
        let mut report = DecisionReport::new();

        for tree in trees {
            self.decide_files(&tree.root, &tree.handler, source_root, &mut report);
            self.decide_directories(&tree.root, &mut report);
        }

        self.decide_deletions(registry, source_root, &mut report);

        for tree in trees {
            Self::cascade(&tree.root, &mut report);
        }

        report
    }

    // ──────────────────── phase 1: files ────────────────────

    fn decide_files(
        &self,
        root: &DirectoryNode,
        handler: &Handler,
        source_root: &Path,
        report: &mut DecisionReport,
    ) {
        root.visit_files(&mut |_, file| {
            let decision = if self.mode == IndexingMode::Full {
                RebuildDecision {
                    path: file.file_path.clone(),
                    outcome: DecisionOutcome::Rebuild,
                    reason: DecisionReason::ComprehensiveStaleness,
                    reasoning: "full rebuild requested".to_string(),
                    metadata: json!({ "mode": self.mode.to_string() }),
                }
            } else {
                // The handler routed at discovery owns this file's cache
                // layout; never re-resolve it here.
                match handler.cache_path_for(&file.file_path, source_root) {
                    Ok(cache_path) => {
                        let (fresh, verdict) = self.cache.is_fresh(&cache_path, &file.file_path);
                        let (outcome, reason) = if fresh {
                            (DecisionOutcome::Skip, DecisionReason::CacheFresh)
                        } else {
                            (DecisionOutcome::Rebuild, DecisionReason::CacheStale)
                        };
                        RebuildDecision {
                            path: file.file_path.clone(),
                            outcome,
                            reason,
                            reasoning: verdict,
                            metadata: json!({
                                "cache_path": cache_path.to_string_lossy(),
                                "handler": handler.name(),
                            }),
                        }
                    }
                    Err(err) => {
                        self.logger
                            .warn_path(&file.file_path, format!("file decision failed: {err}"));
                        RebuildDecision {
                            path: file.file_path.clone(),
                            outcome: DecisionOutcome::Error,
                            reason: DecisionReason::DecisionError,
                            reasoning: err.to_string(),
                            metadata: json!({ "error_code": err.code() }),
                        }
                    }
                }
            };
            report.insert_file(decision);
        });
    }

    // ──────────────────── phase 2: directories ────────────────────

    fn decide_directories(&self, root: &DirectoryNode, report: &mut DecisionReport) {
        root.visit_post_order(&mut |node| {
            let decision = self.directory_decision(node);
            report.insert_directory(decision);
        });
    }

    fn directory_decision(&self, node: &DirectoryNode) -> RebuildDecision {
        if node.is_empty() {
            return RebuildDecision {
                path: node.dir_path.clone(),
                outcome: DecisionOutcome::Skip,
                reason: DecisionReason::EmptyDirectory,
                reasoning: "no included files in subtree".to_string(),
                metadata: json!({ "kb_path": node.kb_path.to_string_lossy() }),
            };
        }

        if matches!(self.mode, IndexingMode::Full | IndexingMode::FullKbRebuild) {
            return RebuildDecision {
                path: node.dir_path.clone(),
                outcome: DecisionOutcome::Rebuild,
                reason: DecisionReason::ComprehensiveStaleness,
                reasoning: format!("{} rebuild requested", self.mode),
                metadata: json!({ "kb_path": node.kb_path.to_string_lossy() }),
            };
        }

        let kb_mtime = match timestamps::mtime_if_exists(&node.kb_path) {
            Ok(Some(mtime)) => mtime,
            Ok(None) => {
                return RebuildDecision {
                    path: node.dir_path.clone(),
                    outcome: DecisionOutcome::Rebuild,
                    reason: DecisionReason::KnowledgeFileMissing,
                    reasoning: format!("knowledge file missing: {}", node.kb_path.display()),
                    metadata: json!({ "kb_path": node.kb_path.to_string_lossy() }),
                };
            }
            Err(err) => {
                self.logger
                    .warn_path(&node.dir_path, format!("directory decision failed: {err}"));
                return RebuildDecision {
                    path: node.dir_path.clone(),
                    outcome: DecisionOutcome::Error,
                    reason: DecisionReason::DecisionError,
                    reasoning: err.to_string(),
                    metadata: json!({ "error_code": err.code() }),
                };
            }
        };

        // First constituent strictly newer than the KB wins.
        for file in &node.files {
            if !timestamps::artifact_is_fresh(kb_mtime, file.mtime) {
                return RebuildDecision {
                    path: node.dir_path.clone(),
                    outcome: DecisionOutcome::Rebuild,
                    reason: DecisionReason::SourceFilesNewer,
                    reasoning: timestamps::freshness_reason(false, kb_mtime, file.mtime),
                    metadata: json!({
                        "kb_path": node.kb_path.to_string_lossy(),
                        "trigger": file.file_path.to_string_lossy(),
                    }),
                };
            }
        }

        // The directory's own mtime moves when entries appear or vanish;
        // this is how a deleted source file invalidates its directory KB.
        if !timestamps::artifact_is_fresh(kb_mtime, node.mtime) {
            return RebuildDecision {
                path: node.dir_path.clone(),
                outcome: DecisionOutcome::Rebuild,
                reason: DecisionReason::SourceFilesNewer,
                reasoning: format!(
                    "directory entry list changed; {}",
                    timestamps::freshness_reason(false, kb_mtime, node.mtime)
                ),
                metadata: json!({
                    "kb_path": node.kb_path.to_string_lossy(),
                    "trigger": node.dir_path.to_string_lossy(),
                }),
            };
        }

        for sub in &node.subdirs {
            match timestamps::mtime_if_exists(&sub.kb_path) {
                Ok(Some(sub_kb_mtime)) => {
                    if !timestamps::artifact_is_fresh(kb_mtime, sub_kb_mtime) {
                        return RebuildDecision {
                            path: node.dir_path.clone(),
                            outcome: DecisionOutcome::Rebuild,
                            reason: DecisionReason::SubdirectoryKnowledgeNewer,
                            reasoning: timestamps::freshness_reason(false, kb_mtime, sub_kb_mtime),
                            metadata: json!({
                                "kb_path": node.kb_path.to_string_lossy(),
                                "trigger": sub.kb_path.to_string_lossy(),
                            }),
                        };
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    return RebuildDecision {
                        path: node.dir_path.clone(),
                        outcome: DecisionOutcome::Error,
                        reason: DecisionReason::DecisionError,
                        reasoning: err.to_string(),
                        metadata: json!({ "error_code": err.code() }),
                    };
                }
            }
        }

        RebuildDecision {
            path: node.dir_path.clone(),
            outcome: DecisionOutcome::Skip,
            reason: DecisionReason::UpToDate,
            reasoning: format!(
                "knowledge file current as of {}",
                timestamps::format_timestamp(kb_mtime)
            ),
            metadata: json!({ "kb_path": node.kb_path.to_string_lossy() }),
        }
    }

    // ──────────────────── phase 3: deletions ────────────────────

    fn decide_deletions(
        &self,
        registry: &HandlerRegistry,
        source_root: &Path,
        report: &mut DecisionReport,
    ) {
        for handler in registry.handlers() {
            for candidate in handler.enumerate_cleanup_candidates(source_root) {
                let (mapped, orphan_reason) = match candidate.kind {
                    ArtifactKind::AnalysisCache => (
                        handler.reverse_map_cache(&candidate.path, source_root),
                        DecisionReason::OrphanedAnalysisCache,
                    ),
                    ArtifactKind::KnowledgeFile => (
                        handler.reverse_map_kb(&candidate.path, source_root),
                        DecisionReason::OrphanedKnowledgeFile,
                    ),
                };

                let Some(source) = mapped else {
                    self.logger.warn_path(
                        &candidate.path,
                        "unrecognized artifact shape; leaving in place",
                    );
                    continue;
                };

                let source_present = match candidate.kind {
                    ArtifactKind::AnalysisCache => source.is_file(),
                    ArtifactKind::KnowledgeFile => source.is_dir(),
                };

                let decision = if !source_present {
                    Some((
                        orphan_reason,
                        format!("source no longer exists: {}", source.display()),
                    ))
                } else if !handler.should_include(&source, source_root) {
                    Some((
                        DecisionReason::ExcludedSource,
                        format!("source is excluded: {}", source.display()),
                    ))
                } else {
                    None
                };

                if let Some((reason, reasoning)) = decision {
                    report.insert_deletion(DeletionDecision {
                        path: candidate.path,
                        reason,
                        is_safe_to_delete: true,
                        is_directory: false,
                        reasoning,
                    });
                }
            }

            // Directories left empty once the flagged files are gone.
            let include_root = matches!(handler, Handler::GitClone(_));
            let doomed_files: BTreeSet<PathBuf> = report.files_to_delete().clone();
            for root in handler.cleanup_roots(source_root) {
                Self::sweep_empty_dirs(&root, include_root, &doomed_files, report);
            }
        }
    }

    /// Flag `dir` for deletion when everything beneath it is already
    /// flagged. Returns whether `dir` will be empty after deletions run.
    fn sweep_empty_dirs(
        dir: &Path,
        include_self: bool,
        doomed_files: &BTreeSet<PathBuf>,
        report: &mut DecisionReport,
    ) -> bool {
        let Ok(entries) = fs::read_dir(dir) else {
            return false;
        };
        let mut all_gone = true;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
            if is_dir {
                if !Self::sweep_empty_dirs(&path, true, doomed_files, report) {
                    all_gone = false;
                }
            } else if !doomed_files.contains(&path) {
                all_gone = false;
            }
        }
        if all_gone && include_self && !report.directories_to_delete().contains(dir) {
            report.insert_deletion(DeletionDecision {
                path: dir.to_path_buf(),
                reason: DecisionReason::OrphanedKnowledgeFile,
                is_safe_to_delete: true,
                is_directory: true,
                reasoning: "directory empty after orphan deletion".to_string(),
            });
        }
        all_gone
    }

    // ──────────────────── phase 4: cascade ────────────────────

    /// Propagate content-driven rebuilds to every ancestor. Returns whether
    /// the subtree rooted at `node` contains a content-driven directory
    /// rebuild (only those seed cascades; a cascade mark is not re-expanded).
    fn cascade(node: &DirectoryNode, report: &mut DecisionReport) -> bool {
        let mut child_seeded = false;
        for sub in &node.subdirs {
            if Self::cascade(sub, report) {
                child_seeded = true;
            }
        }

        let self_seeds = report.directory_decision(&node.dir_path).is_some_and(|d| {
            d.outcome == DecisionOutcome::Rebuild && d.reason.is_content_driven()
        });

        if child_seeded && !self_seeds {
            let should_override = report
                .directory_decision(&node.dir_path)
                .is_some_and(|d| d.outcome == DecisionOutcome::Skip);
            if should_override {
                report.insert_directory(RebuildDecision {
                    path: node.dir_path.clone(),
                    outcome: DecisionOutcome::Rebuild,
                    reason: DecisionReason::ChildDirectoryRebuilt,
                    reasoning: "a descendant directory's knowledge file is being rebuilt"
                        .to_string(),
                    metadata: json!({ "kb_path": node.kb_path.to_string_lossy() }),
                });
            }
        }

        child_seeded || self_seeds
    }
}
