//! Per-task execution bodies.
//!
//! Each runner works only from the task's embedded metadata — the
//! discovery tree is out of reach by design. Artifact writes are atomic;
//! a failed or truncated LLM call leaves no partial artifact behind.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel as channel;

use crate::cache::{AnalysisCache, write_atomic};
use crate::core::config::IndexingConfig;
use crate::core::errors::{KbError, Result};
use crate::core::timestamps;
use crate::logger::RunLogger;
use crate::plan::{AtomicTask, TaskMetadata, TaskType};
use crate::summarizer::{
    DirectorySummaryRequest, FileAnalysisRequest, Summarizer, SummarizerResponse,
};

/// Execute one task. Returns the task result and the number of LLM calls
/// actually made.
pub(super) fn run_task(
    task: &AtomicTask,
    cache: &AnalysisCache,
    summarizer: &Arc<dyn Summarizer>,
    config: &IndexingConfig,
    logger: &RunLogger,
) -> (Result<()>, usize) {
    match task.task_type {
        TaskType::AnalyzeFileLlm => analyze_file(task, cache, summarizer, config),
        TaskType::SkipFileCached | TaskType::SkipDirectoryFresh => (Ok(()), 0),
        TaskType::CreateDirectoryKb => create_directory_kb(task, cache, summarizer, config),
        TaskType::DeleteOrphanedFile => (delete_orphaned_file(task, logger), 0),
        TaskType::DeleteOrphanedDirectory => (delete_orphaned_directory(task, logger), 0),
        TaskType::CreateCacheStructure => (create_cache_structure(task, cache), 0),
        TaskType::VerifyCacheFreshness => (verify_cache_freshness(task, cache), 0),
        TaskType::VerifyKbFreshness => (verify_kb_freshness(task), 0),
    }
}

fn metadata_mismatch(task: &AtomicTask) -> KbError {
    KbError::Runtime {
        details: format!(
            "task {} carries metadata for a different task type",
            task.task_id
        ),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.to_string_lossy().into_owned(), |n| {
            n.to_string_lossy().into_owned()
        })
}

/// Run a summarizer call on a detached thread so a hung backend cannot
/// wedge a worker past the configured timeout. A late result is discarded.
fn call_with_timeout<F>(
    summarizer: &Arc<dyn Summarizer>,
    timeout: Duration,
    call: F,
) -> Result<SummarizerResponse>
where
    F: FnOnce(&dyn Summarizer) -> Result<SummarizerResponse> + Send + 'static,
{
    let summarizer = Arc::clone(summarizer);
    let (tx, rx) = channel::bounded(1);
    std::thread::spawn(move || {
        let _ = tx.send(call(summarizer.as_ref()));
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(KbError::SummarizerTimeout {
            secs: timeout.as_secs(),
        }),
    }
}

fn analyze_file(
    task: &AtomicTask,
    cache: &AnalysisCache,
    summarizer: &Arc<dyn Summarizer>,
    config: &IndexingConfig,
) -> (Result<()>, usize) {
    let TaskMetadata::FileAnalysis {
        source_path,
        source_root,
        cache_path,
        ..
    } = &task.metadata
    else {
        return (Err(metadata_mismatch(task)), 0);
    };

    let bytes = match fs::read(source_path) {
        Ok(bytes) => bytes,
        Err(e) => return (Err(KbError::io(source_path, e)), 0),
    };
    let limit = usize::try_from(config.summarizer.max_file_bytes).unwrap_or(usize::MAX);
    let content = String::from_utf8_lossy(&bytes[..bytes.len().min(limit)]).into_owned();

    let conversation_id = format!("kbx/{}", task.task_id);
    let owned_path = source_path.clone();
    let convo = conversation_id.clone();
    let response = call_with_timeout(
        summarizer,
        Duration::from_secs(config.summarizer.llm_timeout_secs),
        move |s| {
            s.analyze_file(&FileAnalysisRequest {
                file_path: &owned_path,
                content: &content,
                conversation_id: &convo,
            })
        },
    );

    let result = response
        .and_then(|r| r.into_complete_text(&conversation_id))
        .and_then(|text| cache.write(cache_path, source_path, source_root, &text));
    (result, 1)
}

fn create_directory_kb(
    task: &AtomicTask,
    cache: &AnalysisCache,
    summarizer: &Arc<dyn Summarizer>,
    config: &IndexingConfig,
) -> (Result<()>, usize) {
    let TaskMetadata::DirectoryKb {
        kb_path,
        child_files,
        child_kbs,
        ..
    } = &task.metadata
    else {
        return (Err(metadata_mismatch(task)), 0);
    };

    // Gather child analyses; a missing cache means a dependency did not
    // actually produce its artifact, which is a hard failure here.
    let mut analyses: Vec<(String, String)> = Vec::with_capacity(child_files.len());
    for child in child_files {
        match cache.read_stripped(&child.cache_path) {
            Ok(Some(body)) => analyses.push((display_name(&child.file_path), body)),
            Ok(None) => {
                return (
                    Err(KbError::TaskFailed {
                        task_id: task.task_id.clone(),
                        details: format!(
                            "analysis cache missing for {}",
                            child.file_path.display()
                        ),
                    }),
                    0,
                );
            }
            Err(e) => return (Err(e), 0),
        }
    }

    let mut summaries: Vec<(String, String)> = Vec::new();
    for sub in child_kbs {
        match fs::read_to_string(&sub.kb_path) {
            Ok(body) => summaries.push((display_name(&sub.dir_path), body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return (Err(KbError::io(&sub.kb_path, e)), 0),
        }
    }

    let conversation_id = format!("kbx/{}", task.task_id);
    let owned_dir = task.target_path.clone();
    let convo = conversation_id.clone();
    let response = call_with_timeout(
        summarizer,
        Duration::from_secs(config.summarizer.llm_timeout_secs),
        move |s| {
            s.summarize_directory(&DirectorySummaryRequest {
                dir_path: &owned_dir,
                child_analyses: &analyses,
                child_summaries: &summaries,
                conversation_id: &convo,
            })
        },
    );

    let result = response
        .and_then(|r| r.into_complete_text(&conversation_id))
        .and_then(|text| {
            if let Some(parent) = kb_path.parent() {
                fs::create_dir_all(parent).map_err(|e| KbError::io(parent, e))?;
            }
            write_atomic(kb_path, text.as_bytes())
        });
    (result, 1)
}

fn delete_orphaned_file(task: &AtomicTask, logger: &RunLogger) -> Result<()> {
    let TaskMetadata::Deletion { is_safe_to_delete } = &task.metadata else {
        return Err(metadata_mismatch(task));
    };
    if !is_safe_to_delete {
        logger.warn_path(&task.target_path, "deletion not marked safe; leaving in place");
        return Ok(());
    }
    match fs::remove_file(&task.target_path) {
        Ok(()) => Ok(()),
        // Idempotent: a rerun or a concurrent cleanup already removed it.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(KbError::io(&task.target_path, e)),
    }
}

fn delete_orphaned_directory(task: &AtomicTask, logger: &RunLogger) -> Result<()> {
    let TaskMetadata::Deletion { is_safe_to_delete } = &task.metadata else {
        return Err(metadata_mismatch(task));
    };
    if !is_safe_to_delete {
        logger.warn_path(&task.target_path, "deletion not marked safe; leaving in place");
        return Ok(());
    }
    match fs::remove_dir(&task.target_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::DirectoryNotEmpty => {
            logger.warn_path(&task.target_path, "directory not empty; left in place");
            Ok(())
        }
        Err(e) => Err(KbError::io(&task.target_path, e)),
    }
}

fn create_cache_structure(task: &AtomicTask, cache: &AnalysisCache) -> Result<()> {
    let TaskMetadata::CacheStructure { directories } = &task.metadata else {
        return Err(metadata_mismatch(task));
    };
    cache.ensure_directories(directories)
}

fn verify_cache_freshness(task: &AtomicTask, cache: &AnalysisCache) -> Result<()> {
    let TaskMetadata::VerifyCache {
        cache_path,
        source_path,
    } = &task.metadata
    else {
        return Err(metadata_mismatch(task));
    };
    let (fresh, reason) = cache.is_fresh(cache_path, source_path);
    if fresh {
        Ok(())
    } else {
        Err(KbError::TaskFailed {
            task_id: task.task_id.clone(),
            details: format!("cache still stale after rebuild: {reason}"),
        })
    }
}

fn verify_kb_freshness(task: &AtomicTask) -> Result<()> {
    let TaskMetadata::VerifyKb { kb_path, inputs } = &task.metadata else {
        return Err(metadata_mismatch(task));
    };
    let kb_mtime = match timestamps::mtime_if_exists(kb_path) {
        Ok(Some(mtime)) => mtime,
        Ok(None) => {
            return Err(KbError::TaskFailed {
                task_id: task.task_id.clone(),
                details: format!("knowledge file missing after rebuild: {}", kb_path.display()),
            });
        }
        Err(e) => return Err(e),
    };
    for input in inputs {
        if let Ok(Some(input_mtime)) = timestamps::mtime_if_exists(input)
            && !timestamps::artifact_is_fresh(kb_mtime, input_mtime)
        {
            return Err(KbError::TaskFailed {
                task_id: task.task_id.clone(),
                details: format!(
                    "knowledge file still stale vs {}: {}",
                    input.display(),
                    timestamps::freshness_reason(false, kb_mtime, input_mtime)
                ),
            });
        }
    }
    Ok(())
}
