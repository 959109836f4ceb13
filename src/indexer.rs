//! The run object tying the pipeline together:
//! discovery → decision → plan → (preview) → execute.
//!
//! The trigger surface holds an `Indexer` and reads its status handle;
//! there is no global mutable state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crate::cache::AnalysisCache;
use crate::core::config::IndexingConfig;
use crate::core::errors::Result;
use crate::core::paths;
use crate::decision::{DecisionEngine, DecisionReport, DecisionSummary};
use crate::discovery::{self, DiscoveredTree};
use crate::execute::{ExecutionEngine, ExecutionResults, RunState};
use crate::handlers::{Handler, HandlerRegistry};
use crate::logger::{EventType, LogEntry, RunLogger, Severity};
use crate::plan::{ExecutionPlan, PlanGenerator};
use crate::status::{IndexingStatus, RunPhase, StatusHandle};
use crate::summarizer::{OutlineSummarizer, Summarizer};

/// Outcome of one indexing run.
#[derive(Debug)]
pub struct RunOutcome {
    /// Overall verdict from the task success rate.
    pub state: RunState,
    /// Decision counts for the run.
    pub decisions: DecisionSummary,
    /// Task-level results.
    pub results: ExecutionResults,
    /// Wall-clock duration of the whole run.
    pub duration: Duration,
    /// Failed task ids with truncated error messages (at most 10).
    pub failures: Vec<String>,
}

/// One indexing run's orchestrator.
pub struct Indexer {
    config: IndexingConfig,
    registry: HandlerRegistry,
    cache: AnalysisCache,
    summarizer: Arc<dyn Summarizer>,
    logger: RunLogger,
    status: Arc<StatusHandle>,
    cancel: Arc<AtomicBool>,
}

impl Indexer {
    /// Build an indexer with the deterministic offline summarizer.
    pub fn new(config: IndexingConfig) -> Result<Self> {
        Self::with_summarizer(config, Arc::new(OutlineSummarizer))
    }

    /// Build an indexer around an injected summarizer implementation.
    pub fn with_summarizer(
        config: IndexingConfig,
        summarizer: Arc<dyn Summarizer>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = HandlerRegistry::from_config(&config)?;
        let logger = config.log.path.clone().map_or_else(RunLogger::disabled, |path| {
            RunLogger::new(path, config.log.max_size_bytes)
        });
        Ok(Self {
            config,
            registry,
            cache: AnalysisCache::new(),
            summarizer,
            logger,
            status: Arc::new(StatusHandle::new()),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The configuration this run object was built with.
    #[must_use]
    pub fn config(&self) -> &IndexingConfig {
        &self.config
    }

    /// The handler registry.
    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// The analysis cache component.
    #[must_use]
    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    /// Shared status handle for the trigger surface.
    #[must_use]
    pub fn status_handle(&self) -> Arc<StatusHandle> {
        Arc::clone(&self.status)
    }

    /// Point-in-time status snapshot.
    #[must_use]
    pub fn status(&self) -> IndexingStatus {
        self.status.snapshot()
    }

    /// Cooperative cancellation flag; set it to stop dispatching tasks.
    #[must_use]
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run the full pipeline against `target`.
    pub fn index(&self, target: &Path) -> Result<RunOutcome> {
        let run_started = std::time::Instant::now();
        let source_root = paths::absolutize(target);
        self.status.begin_run();
        self.logger.log(
            &LogEntry::new(EventType::RunStart, Severity::Info)
                .with_path(&source_root)
                .with_details(format!("mode={}", self.config.engine.mode)),
        );

        let trees = self.discover_trees(&source_root)?;
        self.logger.log(
            &LogEntry::new(EventType::DiscoveryComplete, Severity::Info)
                .with_path(&source_root)
                .with_details(format!("{} trees", trees.len())),
        );

        self.status.set_phase(RunPhase::Deciding);
        let engine = DecisionEngine::new(self.config.engine.mode, &self.cache, &self.logger);
        let report = engine.decide(&trees, &self.registry, &source_root);
        let decisions = report.summary();
        self.logger.log(
            &LogEntry::new(EventType::DecisionsComplete, Severity::Info).with_details(format!(
                "files {}/{} rebuild, dirs {}/{} rebuild, {} deletions",
                decisions.files_rebuild,
                decisions.files_total,
                decisions.directories_rebuild,
                decisions.directories_total,
                decisions.deletions,
            )),
        );

        self.status.set_phase(RunPhase::Planning);
        let generator = PlanGenerator::new(&self.config.engine, &self.cache, &self.logger);
        let plan = generator.generate(&trees, &report, &source_root)?;
        self.logger.log(
            &LogEntry::new(EventType::PlanReady, Severity::Info).with_details(format!(
                "{} tasks, {} expensive",
                plan.len(),
                plan.expensive_task_count(),
            )),
        );

        self.status.set_phase(RunPhase::Executing);
        let executor = ExecutionEngine::new(
            &self.config,
            &self.cache,
            Arc::clone(&self.summarizer),
            &self.logger,
            &self.status,
            Arc::clone(&self.cancel),
        );
        let results = executor.execute(&plan);

        self.status.set_phase(RunPhase::Completed);
        let state = results.overall();
        let failures = results.failure_lines(10);
        self.logger.log(
            &LogEntry::new(EventType::RunComplete, Severity::Info)
                .with_path(&source_root)
                .with_details(format!(
                    "state={state}, {} completed, {} failed, {} llm calls",
                    results.completed.len(),
                    results.failed.len(),
                    results.llm_call_count,
                )),
        );

        Ok(RunOutcome {
            state,
            decisions,
            results,
            duration: run_started.elapsed(),
            failures,
        })
    }

    /// Decision report plus validated plan, without executing anything.
    /// Backs the preview surface; guaranteed side-effect free.
    pub fn plan(&self, target: &Path) -> Result<(DecisionReport, ExecutionPlan)> {
        let source_root = paths::absolutize(target);
        self.status.begin_run();
        let trees = self.discover_trees(&source_root)?;
        self.status.set_phase(RunPhase::Deciding);
        let engine = DecisionEngine::new(self.config.engine.mode, &self.cache, &self.logger);
        let report = engine.decide(&trees, &self.registry, &source_root);
        self.status.set_phase(RunPhase::Planning);
        let generator = PlanGenerator::new(&self.config.engine, &self.cache, &self.logger);
        let plan = generator.generate(&trees, &report, &source_root)?;
        self.status.set_phase(RunPhase::Idle);
        Ok((report, plan))
    }

    /// Discover every tree in scope: the target's own tree, plus each
    /// vendored repository when the target is the project root.
    fn discover_trees(&self, source_root: &Path) -> Result<Vec<DiscoveredTree>> {
        let mut trees = Vec::new();

        let Some(root_handler) = self.registry.handler_for(source_root) else {
            // Warn-and-skip: a run over nothing is empty, not an error.
            self.logger
                .warn_path(source_root, "no handler claims this path; nothing to index");
            return Ok(trees);
        };

        let root_tree = discovery::discover(source_root, root_handler, &self.logger)?;
        self.status
            .record_discovery(root_tree.file_count(), root_tree.directory_count());
        let is_project_root = matches!(root_handler, Handler::Project(_));
        trees.push(DiscoveredTree {
            handler: root_handler.clone(),
            root: root_tree,
        });

        // Vendored repositories live under the output directory, which the
        // project walk excludes; they get their own trees.
        if is_project_root {
            if let Some(clone_handler) = self
                .registry
                .handlers()
                .iter()
                .find(|h| matches!(h, Handler::GitClone(_)))
            {
                for repo_root in self.clone_repo_roots(clone_handler, source_root) {
                    match discovery::discover(&repo_root, clone_handler, &self.logger) {
                        Ok(tree) => {
                            self.status
                                .record_discovery(tree.file_count(), tree.directory_count());
                            trees.push(DiscoveredTree {
                                handler: clone_handler.clone(),
                                root: tree,
                            });
                        }
                        Err(err) => {
                            self.logger
                                .warn_path(&repo_root, format!("repository skipped: {err}"));
                        }
                    }
                }
            }
        }

        Ok(trees)
    }

    fn clone_repo_roots(&self, handler: &Handler, source_root: &Path) -> Vec<PathBuf> {
        match handler {
            Handler::GitClone(h) => h.repo_roots(source_root),
            Handler::Project(_) => Vec::new(),
        }
    }
}
