//! Deletion detection: removed sources leave orphaned artifacts that get
//! flagged, deleted, and their directory KBs rebuilt.

mod common;

use std::fs;

use kb_indexer::decision::{DecisionOutcome, DecisionReason};
use kb_indexer::execute::RunState;
use kb_indexer::plan::TaskType;

use common::{default_indexer, set_mtime_back, write_source};

#[test]
fn removed_source_file_orphans_its_cache() {
    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path();
    let a = write_source(root, "a.py", "print('a')");
    write_source(root, "sub/b.py", "print('b')");

    default_indexer().index(root).unwrap();
    let cache_path = root.join(".knowledge/project-base/a.py.analysis.md");
    assert!(cache_path.exists());

    // The user deletes the source. Nudge the root KB a step into the past
    // so the directory mtime change is unambiguous on coarse filesystems.
    fs::remove_file(&a).unwrap();
    set_mtime_back(&root.join(".knowledge/project-base/root_kb.md"), 2);

    let rerun = default_indexer();
    let (report, _) = rerun.plan(root).unwrap();

    let deletion = report
        .deletion_decisions()
        .iter()
        .find(|d| d.path == cache_path)
        .expect("orphaned cache must be flagged");
    assert_eq!(deletion.reason, DecisionReason::OrphanedAnalysisCache);
    assert!(deletion.is_safe_to_delete);

    let root_decision = report.directory_decision(root).unwrap();
    assert_eq!(root_decision.outcome, DecisionOutcome::Rebuild);
    assert_eq!(root_decision.reason, DecisionReason::SourceFilesNewer);

    // Untouched sibling subtree skips.
    let sub_decision = report.directory_decision(&root.join("sub")).unwrap();
    assert_eq!(sub_decision.outcome, DecisionOutcome::Skip);

    let outcome = rerun.index(root).unwrap();
    assert_eq!(outcome.state, RunState::Completed);
    assert!(!cache_path.exists(), "orphan must be deleted");
    // One KB rebuild; the deleted file is gone from it.
    assert_eq!(outcome.results.llm_call_count, 1);
}

#[test]
fn removed_subtree_sweeps_empty_artifact_directories() {
    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path();
    write_source(root, "keep.py", "x");
    write_source(root, "dead/end.py", "x");

    default_indexer().index(root).unwrap();
    let dead_area = root.join(".knowledge/project-base/dead");
    assert!(dead_area.join("end.py.analysis.md").exists());

    fs::remove_dir_all(root.join("dead")).unwrap();
    set_mtime_back(&root.join(".knowledge/project-base/root_kb.md"), 2);

    // Single worker: file deletions dispatch ahead of the rmdir, so the
    // directory is empty when its turn comes (with a wider pool the rmdir
    // may lose the race, warn, and converge on the next run instead).
    let mut config = kb_indexer::core::config::IndexingConfig::default();
    config.engine.max_concurrent_operations = 1;
    let rerun = common::indexer_with(config);
    let (report, plan) = rerun.plan(root).unwrap();

    // Both the orphaned cache, the orphaned KB, and the emptied artifact
    // directory are flagged.
    assert!(
        report
            .files_to_delete()
            .contains(&dead_area.join("end.py.analysis.md"))
    );
    assert!(report.files_to_delete().contains(&dead_area.join("dead_kb.md")));
    assert!(report.directories_to_delete().contains(&dead_area));

    let counts = plan.task_count_by_type();
    assert_eq!(counts[&TaskType::DeleteOrphanedFile], 2);
    assert_eq!(counts[&TaskType::DeleteOrphanedDirectory], 1);

    rerun.index(root).unwrap();
    assert!(!dead_area.exists(), "artifact directory must be removed");
    assert!(root.join(".knowledge/project-base/keep.py.analysis.md").exists());
}

#[test]
fn deletion_tasks_run_before_analysis() {
    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path();
    write_source(root, "fresh.py", "x");
    let area = root.join(".knowledge/project-base");
    fs::create_dir_all(&area).unwrap();
    fs::write(area.join("stale.py.analysis.md"), "orphan").unwrap();

    let indexer = default_indexer();
    let outcome = indexer.index(root).unwrap();
    assert_eq!(outcome.state, RunState::Completed);

    // Completion order: the orphan deletion precedes every analysis.
    let delete_pos = outcome
        .results
        .completed
        .iter()
        .position(|r| r.task_type == TaskType::DeleteOrphanedFile)
        .expect("deletion must have run");
    let analyze_pos = outcome
        .results
        .completed
        .iter()
        .position(|r| r.task_type == TaskType::AnalyzeFileLlm)
        .expect("analysis must have run");
    assert!(delete_pos < analyze_pos);
}

#[test]
fn orphan_deletion_is_idempotent_across_reruns() {
    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path();
    write_source(root, "a.py", "x");
    let area = root.join(".knowledge/project-base");
    fs::create_dir_all(&area).unwrap();
    fs::write(area.join("ghost.py.analysis.md"), "orphan").unwrap();

    default_indexer().index(root).unwrap();
    assert!(!area.join("ghost.py.analysis.md").exists());

    // Second run: nothing left to delete, nothing to rebuild.
    let outcome = default_indexer().index(root).unwrap();
    assert_eq!(outcome.decisions.deletions, 0);
    assert_eq!(outcome.results.llm_call_count, 0);
}

#[test]
fn foreign_files_in_output_area_are_left_alone() {
    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path();
    write_source(root, "a.py", "x");
    let area = root.join(".knowledge/project-base");
    fs::create_dir_all(&area).unwrap();
    fs::write(area.join("NOTES.txt"), "human notes").unwrap();

    let outcome = default_indexer().index(root).unwrap();
    assert_eq!(outcome.decisions.deletions, 0);
    assert!(area.join("NOTES.txt").exists());
}
