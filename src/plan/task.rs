//! Atomic task model and the validated execution plan.
//!
//! Tasks are self-contained: everything the executor needs travels in the
//! task's metadata, so execution never consults discovery state. Task ids
//! derive deterministically from target paths, making them stable
//! dependency references across runs of identical input.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::core::errors::{KbError, Result};
use crate::core::paths;

/// Task priorities: higher runs earlier within a ready batch.
pub mod priority {
    /// Orphan deletions execute first.
    pub const DELETE: i32 = 100;
    /// Cache-structure preparation follows deletions.
    pub const STRUCTURE: i32 = 90;
    /// Per-file analysis tasks.
    pub const FILE: i32 = 50;
    /// Per-directory knowledge tasks.
    pub const DIRECTORY: i32 = 40;
    /// Post-hoc verification runs last.
    pub const VERIFY: i32 = 10;
}

/// Type of operation, used for execution dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum TaskType {
    AnalyzeFileLlm,
    SkipFileCached,
    CreateDirectoryKb,
    SkipDirectoryFresh,
    DeleteOrphanedFile,
    DeleteOrphanedDirectory,
    CreateCacheStructure,
    VerifyCacheFreshness,
    VerifyKbFreshness,
}

impl TaskType {
    /// Stable identifier fragment and display name.
    #[must_use]
    pub const fn slug(&self) -> &'static str {
        match self {
            Self::AnalyzeFileLlm => "analyze_file_llm",
            Self::SkipFileCached => "skip_file_cached",
            Self::CreateDirectoryKb => "create_directory_kb",
            Self::SkipDirectoryFresh => "skip_directory_fresh",
            Self::DeleteOrphanedFile => "delete_orphaned_file",
            Self::DeleteOrphanedDirectory => "delete_orphaned_directory",
            Self::CreateCacheStructure => "create_cache_structure",
            Self::VerifyCacheFreshness => "verify_cache_freshness",
            Self::VerifyKbFreshness => "verify_kb_freshness",
        }
    }

    /// Whether the task involves an LLM call.
    #[must_use]
    pub const fn is_expensive(&self) -> bool {
        matches!(self, Self::AnalyzeFileLlm | Self::CreateDirectoryKb)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug())
    }
}

/// Reference to a child file carried inside a directory-KB task.
#[derive(Debug, Clone)]
pub struct ChildFileRef {
    /// Source file path.
    pub file_path: PathBuf,
    /// Its analysis cache path (handler-resolved at plan time).
    pub cache_path: PathBuf,
    /// Source mtime at discovery.
    pub mtime: SystemTime,
}

/// Reference to a child subdirectory carried inside a directory-KB task.
#[derive(Debug, Clone)]
pub struct ChildKbRef {
    /// Subdirectory path.
    pub dir_path: PathBuf,
    /// Its handler-determined KB path.
    pub kb_path: PathBuf,
}

/// Everything a task needs at execution time.
#[derive(Debug, Clone)]
pub enum TaskMetadata {
    /// Inputs for `AnalyzeFileLlm`.
    FileAnalysis {
        /// The file to read and analyze.
        source_path: PathBuf,
        /// The root the portable-path header is relative to.
        source_root: PathBuf,
        /// Where the cache artifact is written.
        cache_path: PathBuf,
        /// Size captured at discovery.
        size: u64,
        /// Mtime captured at discovery.
        mtime: SystemTime,
    },
    /// Inputs for `CreateDirectoryKb`.
    DirectoryKb {
        /// Where the knowledge file is written.
        kb_path: PathBuf,
        /// The source root of the owning tree.
        source_root: PathBuf,
        /// Child files with their cache paths and mtimes.
        child_files: Vec<ChildFileRef>,
        /// Child subdirectories with their KB paths.
        child_kbs: Vec<ChildKbRef>,
    },
    /// Inputs for `CreateCacheStructure`.
    CacheStructure {
        /// Every directory that will receive artifacts.
        directories: Vec<PathBuf>,
    },
    /// Inputs for deletion tasks.
    Deletion {
        /// Refuse to act unless set.
        is_safe_to_delete: bool,
    },
    /// Inputs for `VerifyCacheFreshness`.
    VerifyCache {
        /// The cache artifact to check.
        cache_path: PathBuf,
        /// The source it must be at least as new as.
        source_path: PathBuf,
    },
    /// Inputs for `VerifyKbFreshness`.
    VerifyKb {
        /// The knowledge file to check.
        kb_path: PathBuf,
        /// Every input it must be at least as new as.
        inputs: Vec<PathBuf>,
    },
    /// No inputs (skip tasks).
    None,
}

/// A single self-contained unit of work.
#[derive(Debug, Clone)]
pub struct AtomicTask {
    /// Unique, path-derived identifier.
    pub task_id: String,
    /// Operation type.
    pub task_type: TaskType,
    /// The artifact or source path the task is about.
    pub target_path: PathBuf,
    /// Ids of tasks that must complete first.
    pub dependencies: BTreeSet<String>,
    /// Higher runs earlier within a ready batch.
    pub priority: i32,
    /// Estimated seconds for completion.
    pub estimated_duration: f64,
    /// Creation sequence number; the deterministic tiebreaker.
    pub created_at: u64,
    /// Execution inputs.
    pub metadata: TaskMetadata,
}

impl AtomicTask {
    /// Deterministic task id: the type slug plus the path slug.
    #[must_use]
    pub fn id_for(task_type: TaskType, path: &Path) -> String {
        format!("{}__{}", task_type.slug(), paths::path_slug(path))
    }

    /// One-line human description for previews and logs.
    #[must_use]
    pub fn description(&self) -> String {
        let target = paths::truncate_for_display(&self.target_path, 60);
        match self.task_type {
            TaskType::AnalyzeFileLlm => format!("analyze {target}"),
            TaskType::SkipFileCached => format!("skip cached {target}"),
            TaskType::CreateDirectoryKb => format!("build KB for {target}"),
            TaskType::SkipDirectoryFresh => format!("skip fresh KB {target}"),
            TaskType::DeleteOrphanedFile => format!("delete orphan {target}"),
            TaskType::DeleteOrphanedDirectory => format!("remove empty {target}"),
            TaskType::CreateCacheStructure => "create cache directories".to_string(),
            TaskType::VerifyCacheFreshness => format!("verify cache {target}"),
            TaskType::VerifyKbFreshness => format!("verify KB {target}"),
        }
    }
}

/// A validated, acyclic set of atomic tasks with a cached dependency-level
/// map.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    tasks: Vec<AtomicTask>,
    index: BTreeMap<String, usize>,
    levels: BTreeMap<String, usize>,
}

impl ExecutionPlan {
    /// Build a plan, validating that every dependency id exists and the
    /// graph has no cycle. Either failure aborts planning.
    pub fn new(tasks: Vec<AtomicTask>) -> Result<Self> {
        let mut index = BTreeMap::new();
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.task_id.clone(), i).is_some() {
                return Err(KbError::PlanValidation {
                    details: format!("duplicate task id {}", task.task_id),
                });
            }
        }

        for task in &tasks {
            for dep in &task.dependencies {
                if !index.contains_key(dep) {
                    return Err(KbError::PlanValidation {
                        details: format!(
                            "task {} depends on non-existent task {dep}",
                            task.task_id
                        ),
                    });
                }
            }
        }

        detect_cycles(&tasks, &index)?;
        let levels = compute_levels(&tasks, &index);
        Ok(Self {
            tasks,
            index,
            levels,
        })
    }

    /// All tasks, in creation order.
    #[must_use]
    pub fn tasks(&self) -> &[AtomicTask] {
        &self.tasks
    }

    /// Look up a task by id.
    #[must_use]
    pub fn get(&self, task_id: &str) -> Option<&AtomicTask> {
        self.index.get(task_id).map(|&i| &self.tasks[i])
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the plan is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Dependency depth of a task (0 for tasks with no dependencies).
    #[must_use]
    pub fn dependency_level(&self, task_id: &str) -> usize {
        self.levels.get(task_id).copied().unwrap_or(0)
    }

    /// Topological execution order: by level, then priority descending,
    /// then creation order — deterministic for identical inputs.
    #[must_use]
    pub fn execution_order(&self) -> Vec<&AtomicTask> {
        let mut ordered: Vec<&AtomicTask> = self.tasks.iter().collect();
        ordered.sort_by_key(|t| {
            (
                self.dependency_level(&t.task_id),
                std::cmp::Reverse(t.priority),
                t.created_at,
            )
        });
        ordered
    }

    /// Tasks grouped by dependency level; everything within one group may
    /// run concurrently.
    #[must_use]
    pub fn parallel_groups(&self) -> Vec<Vec<&AtomicTask>> {
        let mut groups: BTreeMap<usize, Vec<&AtomicTask>> = BTreeMap::new();
        for task in self.execution_order() {
            groups
                .entry(self.dependency_level(&task.task_id))
                .or_default()
                .push(task);
        }
        groups.into_values().collect()
    }

    /// Size of the largest dependency level.
    #[must_use]
    pub fn max_parallel_width(&self) -> usize {
        self.parallel_groups()
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
    }

    /// Task counts keyed by type.
    #[must_use]
    pub fn task_count_by_type(&self) -> BTreeMap<TaskType, usize> {
        let mut counts = BTreeMap::new();
        for task in &self.tasks {
            *counts.entry(task.task_type).or_insert(0) += 1;
        }
        counts
    }

    /// Number of tasks that will call the LLM.
    #[must_use]
    pub fn expensive_task_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.task_type.is_expensive())
            .count()
    }

    /// Sum of estimated durations.
    #[must_use]
    pub fn total_estimated_duration(&self) -> f64 {
        self.tasks.iter().map(|t| t.estimated_duration).sum()
    }

    /// Human-readable plan listing. Has no side effects.
    #[must_use]
    pub fn preview(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        let _ = writeln!(
            out,
            "Execution plan: {} tasks ({} expensive), estimated {:.1}s",
            self.len(),
            self.expensive_task_count(),
            self.total_estimated_duration(),
        );
        for (task_type, count) in self.task_count_by_type() {
            let _ = writeln!(out, "  {task_type}: {count}");
        }
        let groups = self.parallel_groups();
        let _ = writeln!(
            out,
            "Dependency levels: {} (max parallel width {})",
            groups.len(),
            self.max_parallel_width(),
        );
        let _ = writeln!(out, "Tasks:");
        for task in self.execution_order() {
            let deps = if task.dependencies.is_empty() {
                "-".to_string()
            } else {
                task.dependencies
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            let _ = writeln!(
                out,
                "  [L{}] {} — {}\n        deps: {deps}",
                self.dependency_level(&task.task_id),
                task.task_id,
                task.description(),
            );
        }
        out
    }
}

/// Three-colour DFS cycle detection.
fn detect_cycles(tasks: &[AtomicTask], index: &BTreeMap<String, usize>) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Colour {
        White,
        Grey,
        Black,
    }

    fn visit(
        i: usize,
        tasks: &[AtomicTask],
        index: &BTreeMap<String, usize>,
        colours: &mut [Colour],
    ) -> Result<()> {
        colours[i] = Colour::Grey;
        for dep in &tasks[i].dependencies {
            let j = index[dep];
            match colours[j] {
                Colour::Grey => {
                    return Err(KbError::PlanValidation {
                        details: format!(
                            "circular dependency involving task {}",
                            tasks[j].task_id
                        ),
                    });
                }
                Colour::White => visit(j, tasks, index, colours)?,
                Colour::Black => {}
            }
        }
        colours[i] = Colour::Black;
        Ok(())
    }

    let mut colours = vec![Colour::White; tasks.len()];
    for i in 0..tasks.len() {
        if colours[i] == Colour::White {
            visit(i, tasks, index, &mut colours)?;
        }
    }
    Ok(())
}

/// Dependency level per task: 0 without dependencies, else one more than
/// the deepest dependency. Assumes acyclicity (validated first).
fn compute_levels(tasks: &[AtomicTask], index: &BTreeMap<String, usize>) -> BTreeMap<String, usize> {
    fn level_of(
        i: usize,
        tasks: &[AtomicTask],
        index: &BTreeMap<String, usize>,
        memo: &mut Vec<Option<usize>>,
    ) -> usize {
        if let Some(level) = memo[i] {
            return level;
        }
        let level = tasks[i]
            .dependencies
            .iter()
            .map(|dep| level_of(index[dep], tasks, index, memo) + 1)
            .max()
            .unwrap_or(0);
        memo[i] = Some(level);
        level
    }

    let mut memo = vec![None; tasks.len()];
    let mut levels = BTreeMap::new();
    for (i, task) in tasks.iter().enumerate() {
        levels.insert(task.task_id.clone(), level_of(i, tasks, index, &mut memo));
    }
    levels
}
