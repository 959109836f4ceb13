//! Failure propagation: a failed analysis blocks its verification and
//! every ancestor KB, while independent subtrees complete normally.

mod common;

use kb_indexer::core::config::IndexingConfig;
use kb_indexer::execute::RunState;
use kb_indexer::plan::TaskType;

use common::{failing_indexer, write_source};

#[test]
fn failed_analysis_blocks_dependents_but_not_siblings() {
    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path();
    write_source(root, "good.py", "print('good')");
    write_source(root, "bad.py", "print('bad')");
    write_source(root, "sub/ok.py", "print('ok')");

    let (indexer, _) = failing_indexer(IndexingConfig::default(), "bad");
    let outcome = indexer.index(root).unwrap();

    assert_eq!(outcome.state, RunState::CompletedWithFailures);

    let failed_ids: Vec<&str> = outcome
        .results
        .failed
        .iter()
        .map(|r| r.task_id.as_str())
        .collect();

    // The analysis itself fails on the summarizer error.
    let analyze_bad = outcome
        .results
        .failed
        .iter()
        .find(|r| r.task_type == TaskType::AnalyzeFileLlm)
        .expect("bad.py analysis must fail");
    assert!(analyze_bad.target_path.ends_with("bad.py"));
    assert!(analyze_bad.error.as_deref().unwrap().contains("injected failure"));

    // Its verification and the root KB chain fail as blocked dependents.
    let blocked: Vec<_> = outcome
        .results
        .failed
        .iter()
        .filter(|r| {
            r.error
                .as_deref()
                .is_some_and(|e| e.starts_with("dependency failed"))
        })
        .collect();
    assert!(
        blocked
            .iter()
            .any(|r| r.task_type == TaskType::VerifyCacheFreshness),
        "verify task must be blocked: {failed_ids:?}"
    );
    assert!(
        blocked
            .iter()
            .any(|r| r.task_type == TaskType::CreateDirectoryKb && r.target_path == root),
        "root KB must be blocked: {failed_ids:?}"
    );
    assert!(
        blocked
            .iter()
            .any(|r| r.task_type == TaskType::VerifyKbFreshness),
        "root KB verification must be blocked: {failed_ids:?}"
    );

    // No partial cache for the failed file.
    assert!(!root.join(".knowledge/project-base/bad.py.analysis.md").exists());

    // Independent work completed: the sibling file and the sub subtree.
    assert!(root.join(".knowledge/project-base/good.py.analysis.md").exists());
    assert!(root.join(".knowledge/project-base/sub/ok.py.analysis.md").exists());
    assert!(root.join(".knowledge/project-base/sub/sub_kb.md").exists());
    assert!(!root.join(".knowledge/project-base/root_kb.md").exists());
}

#[test]
fn abort_on_first_error_stops_dispatching() {
    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path();
    write_source(root, "sub/ok.py", "x");
    write_source(root, "bad.py", "x");
    write_source(root, "good.py", "x");

    let mut config = IndexingConfig::default();
    config.engine.continue_on_file_errors = false;
    config.engine.max_concurrent_operations = 1;
    let (indexer, _) = failing_indexer(config, "bad");
    let outcome = indexer.index(root).unwrap();

    // With one worker and deterministic ordering, sub/ok.py is analyzed
    // first, bad.py fails, and good.py is never dispatched.
    assert!(root.join(".knowledge/project-base/sub/ok.py.analysis.md").exists());
    assert!(!root.join(".knowledge/project-base/good.py.analysis.md").exists());
    assert!(
        !outcome
            .results
            .completed
            .iter()
            .any(|r| r.target_path.ends_with("good.py"))
    );
}

#[test]
fn failed_run_converges_on_retry_once_the_fault_clears() {
    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path();
    write_source(root, "bad.py", "x");
    write_source(root, "good.py", "x");

    let (indexer, _) = failing_indexer(IndexingConfig::default(), "bad");
    indexer.index(root).unwrap();
    assert!(!root.join(".knowledge/project-base/root_kb.md").exists());

    // Retry with a healthy summarizer: only the missing pieces rebuild.
    let retry = common::default_indexer();
    let outcome = retry.index(root).unwrap();
    assert_eq!(outcome.state, RunState::Completed);
    // bad.py cache plus the root KB; good.py stays cached.
    assert_eq!(outcome.results.llm_call_count, 2);
    assert!(root.join(".knowledge/project-base/root_kb.md").exists());
}

#[test]
fn llm_failures_count_toward_call_totals() {
    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path();
    write_source(root, "bad.py", "x");

    let (indexer, summarizer) = failing_indexer(IndexingConfig::default(), "bad");
    let outcome = indexer.index(root).unwrap();

    assert_eq!(summarizer.calls(), 1);
    assert_eq!(outcome.results.llm_call_count, 1);
    assert_eq!(outcome.state, RunState::Failed);
}
