//! Plan generation: one pass over the decision report and the discovered
//! trees, producing a complete, validated task DAG.
//!
//! Dependency shape: deletions and the structure task run first and gate
//! every file task; each directory task waits for its own file tasks plus
//! the directory task of each direct child subdirectory, which yields
//! leaf-first execution without any explicit ordering logic.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::cache::AnalysisCache;
use crate::core::config::EngineConfig;
use crate::core::errors::Result;
use crate::decision::{DecisionOutcome, DecisionReport};
use crate::discovery::{DirectoryNode, DiscoveredTree};
use crate::handlers::Handler;
use crate::logger::RunLogger;
use crate::plan::task::{
    AtomicTask, ChildFileRef, ChildKbRef, ExecutionPlan, TaskMetadata, TaskType, priority,
};

/// Converts a `DecisionReport` plus discovered trees into an `ExecutionPlan`.
pub struct PlanGenerator<'a> {
    config: &'a EngineConfig,
    cache: &'a AnalysisCache,
    logger: &'a RunLogger,
}

struct PlanBuilder {
    tasks: Vec<AtomicTask>,
    sequence: u64,
}

impl PlanBuilder {
    fn push(
        &mut self,
        task_type: TaskType,
        target_path: PathBuf,
        dependencies: BTreeSet<String>,
        prio: i32,
        estimated_duration: f64,
        metadata: TaskMetadata,
    ) -> String {
        let task_id = AtomicTask::id_for(task_type, &target_path);
        self.tasks.push(AtomicTask {
            task_id: task_id.clone(),
            task_type,
            target_path,
            dependencies,
            priority: prio,
            estimated_duration,
            created_at: self.sequence,
            metadata,
        });
        self.sequence += 1;
        task_id
    }
}

impl<'a> PlanGenerator<'a> {
    /// Build a generator over the given configuration.
    #[must_use]
    pub fn new(config: &'a EngineConfig, cache: &'a AnalysisCache, logger: &'a RunLogger) -> Self {
        Self {
            config,
            cache,
            logger,
        }
    }

    /// Generate and validate the plan.
    pub fn generate(
        &self,
        trees: &[DiscoveredTree],
        report: &DecisionReport,
        source_root: &Path,
    ) -> Result<ExecutionPlan> {
        let mut builder = PlanBuilder {
            tasks: Vec::new(),
            sequence: 0,
        };

        // Deletions first: no dependencies, highest priority. The report
        // flags child directories before their parents, so creation order
        // already favors depth-first removal.
        let mut gate_ids: BTreeSet<String> = BTreeSet::new();
        for deletion in report.deletion_decisions() {
            let task_type = if deletion.is_directory {
                TaskType::DeleteOrphanedDirectory
            } else {
                TaskType::DeleteOrphanedFile
            };
            let id = builder.push(
                task_type,
                deletion.path.clone(),
                BTreeSet::new(),
                priority::DELETE,
                0.1,
                TaskMetadata::Deletion {
                    is_safe_to_delete: deletion.is_safe_to_delete,
                },
            );
            gate_ids.insert(id);
        }

        // One structure task covering every directory any tree will write
        // into; turns concurrent mkdir into a single upfront operation.
        let mut directories: BTreeSet<PathBuf> = BTreeSet::new();
        for tree in trees {
            directories.extend(self.cache.cache_directories(
                &tree.root,
                source_root,
                &tree.handler,
            )?);
        }
        let structure_id = builder.push(
            TaskType::CreateCacheStructure,
            source_root.to_path_buf(),
            BTreeSet::new(),
            priority::STRUCTURE,
            0.5,
            TaskMetadata::CacheStructure {
                directories: directories.into_iter().collect(),
            },
        );
        gate_ids.insert(structure_id);

        for tree in trees {
            self.plan_directory(
                &tree.root,
                &tree.handler,
                source_root,
                report,
                &gate_ids,
                &mut builder,
            );
        }

        ExecutionPlan::new(builder.tasks)
    }

    /// Plan one directory subtree; returns the directory task id.
    fn plan_directory(
        &self,
        node: &DirectoryNode,
        handler: &Handler,
        source_root: &Path,
        report: &DecisionReport,
        gate_ids: &BTreeSet<String>,
        builder: &mut PlanBuilder,
    ) -> String {
        // Children first so the directory task can reference their ids.
        let mut dir_deps: BTreeSet<String> = BTreeSet::new();
        for sub in &node.subdirs {
            let child_id =
                self.plan_directory(sub, handler, source_root, report, gate_ids, builder);
            dir_deps.insert(child_id);
        }

        let mut child_files: Vec<ChildFileRef> = Vec::new();
        for file in &node.files {
            let cache_path = match handler.cache_path_for(&file.file_path, source_root) {
                Ok(path) => path,
                Err(err) => {
                    // Fatal for this path only; the run continues without it.
                    self.logger
                        .warn_path(&file.file_path, format!("unplannable file: {err}"));
                    continue;
                }
            };
            child_files.push(ChildFileRef {
                file_path: file.file_path.clone(),
                cache_path: cache_path.clone(),
                mtime: file.mtime,
            });

            let rebuild = report
                .decision_for(&file.file_path)
                .is_none_or(|d| d.outcome != DecisionOutcome::Skip);
            let file_id = if rebuild {
                let analyze_id = builder.push(
                    TaskType::AnalyzeFileLlm,
                    file.file_path.clone(),
                    gate_ids.clone(),
                    priority::FILE,
                    self.config.estimated_file_analysis_secs,
                    TaskMetadata::FileAnalysis {
                        source_path: file.file_path.clone(),
                        source_root: source_root.to_path_buf(),
                        cache_path: cache_path.clone(),
                        size: file.size,
                        mtime: file.mtime,
                    },
                );
                builder.push(
                    TaskType::VerifyCacheFreshness,
                    cache_path.clone(),
                    BTreeSet::from([analyze_id.clone()]),
                    priority::VERIFY,
                    0.1,
                    TaskMetadata::VerifyCache {
                        cache_path,
                        source_path: file.file_path.clone(),
                    },
                );
                analyze_id
            } else {
                builder.push(
                    TaskType::SkipFileCached,
                    file.file_path.clone(),
                    gate_ids.clone(),
                    priority::FILE,
                    0.1,
                    TaskMetadata::None,
                )
            };
            dir_deps.insert(file_id);
        }

        let rebuild_dir = report
            .directory_decision(&node.dir_path)
            .is_some_and(|d| {
                matches!(d.outcome, DecisionOutcome::Rebuild | DecisionOutcome::Error)
            });

        if rebuild_dir {
            let child_kbs: Vec<ChildKbRef> = node
                .subdirs
                .iter()
                .map(|sub| ChildKbRef {
                    dir_path: sub.dir_path.clone(),
                    kb_path: sub.kb_path.clone(),
                })
                .collect();
            let mut inputs: Vec<PathBuf> =
                child_files.iter().map(|f| f.file_path.clone()).collect();
            inputs.extend(child_kbs.iter().map(|s| s.kb_path.clone()));

            let dir_id = builder.push(
                TaskType::CreateDirectoryKb,
                node.dir_path.clone(),
                dir_deps,
                priority::DIRECTORY,
                self.config.estimated_kb_build_secs,
                TaskMetadata::DirectoryKb {
                    kb_path: node.kb_path.clone(),
                    source_root: source_root.to_path_buf(),
                    child_files,
                    child_kbs,
                },
            );
            builder.push(
                TaskType::VerifyKbFreshness,
                node.kb_path.clone(),
                BTreeSet::from([dir_id.clone()]),
                priority::VERIFY,
                0.1,
                TaskMetadata::VerifyKb {
                    kb_path: node.kb_path.clone(),
                    inputs,
                },
            );
            dir_id
        } else {
            builder.push(
                TaskType::SkipDirectoryFresh,
                node.dir_path.clone(),
                dir_deps,
                priority::DIRECTORY,
                0.05,
                TaskMetadata::None,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{IndexingConfig, IndexingMode};
    use crate::decision::DecisionEngine;
    use crate::discovery;
    use crate::handlers::HandlerRegistry;
    use std::fs;

    fn plan_for(root: &Path, mode: IndexingMode) -> ExecutionPlan {
        let logger = RunLogger::disabled();
        let config = IndexingConfig::default();
        let registry = HandlerRegistry::from_config(&config).unwrap();
        let handler = registry.handler_for(&root.join("x")).unwrap().clone();
        let tree = discovery::discover(root, &handler, &logger).unwrap();
        let trees = vec![DiscoveredTree {
            handler,
            root: tree,
        }];
        let cache = AnalysisCache::new();
        let report = DecisionEngine::new(mode, &cache, &logger).decide(&trees, &registry, root);
        PlanGenerator::new(&config.engine, &cache, &logger)
            .generate(&trees, &report, root)
            .unwrap()
    }

    #[test]
    fn clean_build_produces_expected_tasks() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("a.py"), "x").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/b.py"), "x").unwrap();

        let plan = plan_for(root, IndexingMode::Incremental);
        let counts = plan.task_count_by_type();
        assert_eq!(counts[&TaskType::CreateCacheStructure], 1);
        assert_eq!(counts[&TaskType::AnalyzeFileLlm], 2);
        assert_eq!(counts[&TaskType::CreateDirectoryKb], 2);
        assert_eq!(counts[&TaskType::VerifyCacheFreshness], 2);
        assert_eq!(counts[&TaskType::VerifyKbFreshness], 2);
        assert!(!counts.contains_key(&TaskType::DeleteOrphanedFile));
        assert_eq!(plan.expensive_task_count(), 4);
    }

    #[test]
    fn file_tasks_gate_on_structure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("a.py"), "x").unwrap();

        let plan = plan_for(root, IndexingMode::Incremental);
        let analyze = plan
            .tasks()
            .iter()
            .find(|t| t.task_type == TaskType::AnalyzeFileLlm)
            .unwrap();
        let structure_id = AtomicTask::id_for(TaskType::CreateCacheStructure, root);
        assert!(analyze.dependencies.contains(&structure_id));
    }

    #[test]
    fn directory_tasks_depend_on_files_and_child_dirs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("a.py"), "x").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/b.py"), "x").unwrap();

        let plan = plan_for(root, IndexingMode::Incremental);
        let root_kb = plan
            .tasks()
            .iter()
            .find(|t| t.task_type == TaskType::CreateDirectoryKb && t.target_path == root)
            .unwrap();
        let file_id = AtomicTask::id_for(TaskType::AnalyzeFileLlm, &root.join("a.py"));
        let sub_id = AtomicTask::id_for(TaskType::CreateDirectoryKb, &root.join("sub"));
        assert!(root_kb.dependencies.contains(&file_id));
        assert!(root_kb.dependencies.contains(&sub_id));
        // Leaf-first by construction: sub's level strictly below root's.
        assert!(
            plan.dependency_level(&sub_id) < plan.dependency_level(&root_kb.task_id),
        );
    }

    #[test]
    fn skip_decisions_become_skip_tasks() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        let source = root.join("a.py");
        fs::write(&source, "x").unwrap();

        // Freshen everything: cache then KB, both in the future.
        let config = IndexingConfig::default();
        let registry = HandlerRegistry::from_config(&config).unwrap();
        let handler = registry.handler_for(&source).unwrap().clone();
        let cache = AnalysisCache::new();
        let cache_path = cache.cache_path(&source, root, &handler).unwrap();
        cache.write(&cache_path, &source, root, "body").unwrap();
        let kb_path = handler.kb_path_for(root, root).unwrap();
        fs::write(&kb_path, "kb").unwrap();
        let future =
            filetime::FileTime::from_unix_time(filetime::FileTime::now().unix_seconds() + 3600, 0);
        filetime::set_file_mtime(&kb_path, future).unwrap();

        let plan = plan_for(root, IndexingMode::Incremental);
        let counts = plan.task_count_by_type();
        assert_eq!(counts[&TaskType::SkipFileCached], 1);
        assert_eq!(counts[&TaskType::SkipDirectoryFresh], 1);
        assert!(!counts.contains_key(&TaskType::AnalyzeFileLlm));
        assert_eq!(plan.expensive_task_count(), 0);
    }

    #[test]
    fn deletions_gate_every_file_task() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("a.py"), "x").unwrap();
        let area = root.join(".knowledge/project-base");
        fs::create_dir_all(&area).unwrap();
        fs::write(area.join("gone.py.analysis.md"), "stale").unwrap();

        let plan = plan_for(root, IndexingMode::Incremental);
        let delete = plan
            .tasks()
            .iter()
            .find(|t| t.task_type == TaskType::DeleteOrphanedFile)
            .unwrap();
        assert_eq!(delete.priority, priority::DELETE);
        assert!(delete.dependencies.is_empty());

        let analyze = plan
            .tasks()
            .iter()
            .find(|t| t.task_type == TaskType::AnalyzeFileLlm)
            .unwrap();
        assert!(analyze.dependencies.contains(&delete.task_id));
    }

    #[test]
    fn directory_kb_metadata_is_self_contained() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("a.py"), "x").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/b.py"), "x").unwrap();

        let plan = plan_for(root, IndexingMode::Incremental);
        let root_kb = plan
            .tasks()
            .iter()
            .find(|t| t.task_type == TaskType::CreateDirectoryKb && t.target_path == root)
            .unwrap();
        let TaskMetadata::DirectoryKb {
            kb_path,
            child_files,
            child_kbs,
            ..
        } = &root_kb.metadata
        else {
            panic!("wrong metadata variant");
        };
        assert!(kb_path.ends_with("root_kb.md"));
        assert_eq!(child_files.len(), 1);
        assert!(child_files[0].cache_path.ends_with("a.py.analysis.md"));
        assert_eq!(child_kbs.len(), 1);
        assert!(child_kbs[0].kb_path.ends_with("sub/sub_kb.md"));
    }

    #[test]
    fn plans_always_validate() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("a/b/c/deep.py"), "x").unwrap();
        fs::write(root.join("top.py"), "x").unwrap();

        // ExecutionPlan::new validates; reaching here means no cycle and no
        // dangling dependency for an arbitrary nested tree.
        let plan = plan_for(root, IndexingMode::Full);
        assert!(plan.len() > 0);
    }
}
