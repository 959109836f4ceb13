//! The execution engine: dependency-respecting task execution under a
//! bounded worker pool.
//!
//! A single scheduler thread owns the `pending`/`running`/`completed`/
//! `failed` sets; workers receive self-contained tasks over a channel and
//! report outcomes back. Dependencies are the only synchronization
//! primitive — no two tasks in one plan write the same artifact, so
//! workers never share mutable state.

mod runner;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use serde::Serialize;

use crate::cache::AnalysisCache;
use crate::core::config::IndexingConfig;
use crate::logger::{EventType, LogEntry, RunLogger, Severity};
use crate::plan::{AtomicTask, ExecutionPlan, TaskType};
use crate::status::StatusHandle;
use crate::summarizer::Summarizer;

/// Overall verdict of a run, from its task success rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Success rate ≥ 0.9.
    Completed,
    /// Success rate in [0.5, 0.9).
    CompletedWithFailures,
    /// Success rate below 0.5.
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::CompletedWithFailures => write!(f, "completed_with_failures"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of one executed (or blocked) task.
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Task identifier.
    pub task_id: String,
    /// Task type.
    pub task_type: TaskType,
    /// The task's target path.
    pub target_path: PathBuf,
    /// Error message when the task failed.
    pub error: Option<String>,
    /// Wall-clock execution time (zero for blocked tasks).
    pub duration: Duration,
    /// LLM calls the task made.
    pub llm_calls: usize,
}

/// Aggregated results of one execution.
#[derive(Debug, Default)]
pub struct ExecutionResults {
    /// Successfully executed tasks.
    pub completed: Vec<TaskResult>,
    /// Failed tasks, including those blocked by failed dependencies.
    pub failed: Vec<TaskResult>,
    /// Total wall-clock duration.
    pub duration: Duration,
    /// Total LLM calls.
    pub llm_call_count: usize,
    /// Whether execution was cancelled before dispatching everything.
    pub cancelled: bool,
}

impl ExecutionResults {
    /// Fraction of finished tasks that succeeded (1.0 when nothing ran).
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.completed.len() + self.failed.len();
        if total == 0 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.completed.len() as f64 / total as f64
        }
    }

    /// Map the success rate onto the overall run state.
    #[must_use]
    pub fn overall(&self) -> RunState {
        let rate = self.success_rate();
        if rate >= 0.9 {
            RunState::Completed
        } else if rate >= 0.5 {
            RunState::CompletedWithFailures
        } else {
            RunState::Failed
        }
    }

    /// Failed task ids with their (truncated) error messages.
    #[must_use]
    pub fn failure_lines(&self, limit: usize) -> Vec<String> {
        self.failed
            .iter()
            .take(limit)
            .map(|result| {
                let raw = result.error.as_deref().unwrap_or_default();
                let mut message: String = raw.chars().take(200).collect();
                if raw.chars().count() > 200 {
                    message.push('…');
                }
                format!("{}: {message}", result.task_id)
            })
            .collect()
    }
}

/// Outcome sent from a worker back to the scheduler.
struct WorkerOutcome {
    task_id: String,
    task_type: TaskType,
    target_path: PathBuf,
    error: Option<String>,
    duration: Duration,
    llm_calls: usize,
}

/// Dependency-respecting plan executor.
pub struct ExecutionEngine<'a> {
    config: &'a IndexingConfig,
    cache: &'a AnalysisCache,
    summarizer: Arc<dyn Summarizer>,
    logger: &'a RunLogger,
    status: &'a StatusHandle,
    cancel: Arc<AtomicBool>,
}

impl<'a> ExecutionEngine<'a> {
    /// Build an engine over shared run components. `cancel` is the
    /// cooperative cancellation flag owned by the run object.
    #[must_use]
    pub fn new(
        config: &'a IndexingConfig,
        cache: &'a AnalysisCache,
        summarizer: Arc<dyn Summarizer>,
        logger: &'a RunLogger,
        status: &'a StatusHandle,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            cache,
            summarizer,
            logger,
            status,
            cancel,
        }
    }

    /// Cooperative cancellation token: set it to stop dispatching new
    /// tasks. Running tasks are allowed to complete.
    #[must_use]
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Execute the plan, returning aggregated results.
    #[must_use]
    pub fn execute(&self, plan: &ExecutionPlan) -> ExecutionResults {
        let started = Instant::now();
        let mut results = ExecutionResults::default();

        // Dependents index for failure propagation.
        let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for task in plan.tasks() {
            for dep in &task.dependencies {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(task.task_id.clone());
            }
        }

        // Pending tasks in deterministic dispatch order.
        let mut pending: VecDeque<&AtomicTask> = plan.execution_order().into();
        let mut completed: BTreeSet<String> = BTreeSet::new();
        let mut failed: BTreeSet<String> = BTreeSet::new();

        let workers = self.config.engine.max_concurrent_operations.max(1);
        let (work_tx, work_rx) = channel::bounded::<AtomicTask>(workers);
        let (result_tx, result_rx) = channel::unbounded::<WorkerOutcome>();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    while let Ok(task) = work_rx.recv() {
                        let outcome = self.run_one(&task);
                        if result_tx.send(outcome).is_err() {
                            return;
                        }
                    }
                });
            }
            drop(work_rx);
            drop(result_tx);

            let mut running = 0usize;
            let mut stop_dispatch = false;

            loop {
                if self.cancel.load(Ordering::Relaxed) {
                    stop_dispatch = true;
                    results.cancelled = true;
                }

                // Dispatch every ready task up to the pool width.
                if !stop_dispatch {
                    let mut index = 0;
                    while running < workers && index < pending.len() {
                        let ready = pending[index]
                            .dependencies
                            .iter()
                            .all(|dep| completed.contains(dep));
                        if ready {
                            if let Some(task) = pending.remove(index) {
                                if work_tx.send(task.clone()).is_err() {
                                    stop_dispatch = true;
                                    break;
                                }
                                running += 1;
                            }
                        } else {
                            index += 1;
                        }
                    }
                }

                if running == 0 {
                    break;
                }

                // Wait for the first running task to finish.
                let Ok(outcome) = result_rx.recv() else {
                    break;
                };
                running -= 1;

                let is_file_task = matches!(
                    outcome.task_type,
                    TaskType::AnalyzeFileLlm | TaskType::SkipFileCached
                );
                results.llm_call_count += outcome.llm_calls;
                for _ in 0..outcome.llm_calls {
                    self.status.record_llm_call();
                }

                match outcome.error {
                    None => {
                        completed.insert(outcome.task_id.clone());
                        if is_file_task {
                            self.status.record_file_completed();
                        }
                        self.logger.log(
                            &LogEntry::new(EventType::TaskCompleted, Severity::Info)
                                .with_task(&outcome.task_id)
                                .with_path(&outcome.target_path),
                        );
                        results.completed.push(TaskResult {
                            task_id: outcome.task_id,
                            task_type: outcome.task_type,
                            target_path: outcome.target_path,
                            error: None,
                            duration: outcome.duration,
                            llm_calls: outcome.llm_calls,
                        });
                    }
                    Some(error) => {
                        failed.insert(outcome.task_id.clone());
                        if is_file_task {
                            self.status.record_file_failed(&error);
                        } else {
                            self.status.record_error(&error);
                        }
                        self.logger.log(
                            &LogEntry::new(EventType::TaskFailed, Severity::Warning)
                                .with_task(&outcome.task_id)
                                .with_path(&outcome.target_path)
                                .with_error("KBI-4101", error.clone()),
                        );
                        let failed_id = outcome.task_id.clone();
                        results.failed.push(TaskResult {
                            task_id: outcome.task_id,
                            task_type: outcome.task_type,
                            target_path: outcome.target_path,
                            error: Some(error),
                            duration: outcome.duration,
                            llm_calls: outcome.llm_calls,
                        });

                        self.block_dependents(
                            &failed_id,
                            &dependents,
                            &mut pending,
                            &mut failed,
                            &mut results,
                        );

                        if !self.config.engine.continue_on_file_errors {
                            stop_dispatch = true;
                        }
                    }
                }
            }

            drop(work_tx);
        });

        results.duration = started.elapsed();
        results
    }

    /// Mark every transitive dependent of `root` as failed without
    /// executing it. Independent tasks are untouched.
    fn block_dependents(
        &self,
        root: &str,
        dependents: &BTreeMap<String, Vec<String>>,
        pending: &mut VecDeque<&AtomicTask>,
        failed: &mut BTreeSet<String>,
        results: &mut ExecutionResults,
    ) {
        let mut queue: VecDeque<String> = VecDeque::from([root.to_string()]);
        while let Some(current) = queue.pop_front() {
            let Some(children) = dependents.get(&current) else {
                continue;
            };
            for child in children {
                if failed.contains(child) {
                    continue;
                }
                let Some(position) = pending.iter().position(|t| &t.task_id == child) else {
                    continue;
                };
                let Some(task) = pending.remove(position) else {
                    continue;
                };
                failed.insert(child.clone());
                let error = format!("dependency failed: {current}");
                if matches!(
                    task.task_type,
                    TaskType::AnalyzeFileLlm | TaskType::SkipFileCached
                ) {
                    self.status.record_file_failed(&error);
                }
                self.logger.log(
                    &LogEntry::new(EventType::TaskFailed, Severity::Warning)
                        .with_task(&task.task_id)
                        .with_path(&task.target_path)
                        .with_error("KBI-4102", error.clone()),
                );
                results.failed.push(TaskResult {
                    task_id: task.task_id.clone(),
                    task_type: task.task_type,
                    target_path: task.target_path.clone(),
                    error: Some(error),
                    duration: Duration::ZERO,
                    llm_calls: 0,
                });
                queue.push_back(child.clone());
            }
        }
    }

    fn run_one(&self, task: &AtomicTask) -> WorkerOutcome {
        let started = Instant::now();
        let (result, llm_calls) =
            runner::run_task(task, self.cache, &self.summarizer, self.config, self.logger);
        WorkerOutcome {
            task_id: task.task_id.clone(),
            task_type: task.task_type,
            target_path: task.target_path.clone(),
            error: result.err().map(|e| e.to_string()),
            duration: started.elapsed(),
            llm_calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, ok: bool) -> TaskResult {
        TaskResult {
            task_id: id.to_string(),
            task_type: TaskType::SkipFileCached,
            target_path: PathBuf::from("/p"),
            error: (!ok).then(|| "boom".to_string()),
            duration: Duration::ZERO,
            llm_calls: 0,
        }
    }

    #[test]
    fn overall_state_thresholds() {
        let mut results = ExecutionResults::default();
        assert_eq!(results.overall(), RunState::Completed);

        for i in 0..9 {
            results.completed.push(result(&format!("c{i}"), true));
        }
        results.failed.push(result("f0", false));
        assert_eq!(results.overall(), RunState::Completed);

        results.failed.push(result("f1", false));
        assert_eq!(results.overall(), RunState::CompletedWithFailures);

        for i in 2..12 {
            results.failed.push(result(&format!("f{i}"), false));
        }
        assert_eq!(results.overall(), RunState::Failed);
    }

    #[test]
    fn failure_lines_truncate_long_messages() {
        let mut results = ExecutionResults::default();
        let mut bad = result("big", false);
        bad.error = Some("x".repeat(500));
        results.failed.push(bad);
        let lines = results.failure_lines(10);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].len() < 260);
        assert!(lines[0].ends_with('…'));
    }

    #[test]
    fn run_state_display() {
        assert_eq!(RunState::Completed.to_string(), "completed");
        assert_eq!(
            RunState::CompletedWithFailures.to_string(),
            "completed_with_failures"
        );
        assert_eq!(RunState::Failed.to_string(), "failed");
    }
}
