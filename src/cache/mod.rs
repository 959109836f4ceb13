//! On-disk analysis cache: one text file per source file, a metadata
//! envelope for audit plus the analysis body.
//!
//! Layout is handler-controlled; the cache never computes a path itself.
//! Freshness is the single strict predicate `mtime(cache) >= mtime(source)`.
//! Writes are atomic (temp file + rename) and parent directories are
//! pre-created by a dedicated plan task so concurrent workers never race
//! on mkdir.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;

use crate::core::errors::{KbError, Result};
use crate::core::{paths, timestamps};
use crate::discovery::DirectoryNode;
use crate::handlers::Handler;

/// First line of the metadata envelope.
pub const METADATA_START: &str = "<!-- CACHE_METADATA_START -->";
/// Last line of the metadata envelope.
pub const METADATA_END: &str = "<!-- CACHE_METADATA_END -->";
/// Envelope schema version.
pub const CACHE_VERSION: &str = "1.0";

/// Aggregate numbers for one handler's cache area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of analysis cache files present.
    pub file_count: usize,
    /// Total size of those files in bytes.
    pub total_size_bytes: u64,
}

/// The per-file analysis cache.
#[derive(Debug, Clone, Default)]
pub struct AnalysisCache;

impl AnalysisCache {
    /// Create the cache component.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Where the analysis for `file_path` lives. Pure delegation to the
    /// owning handler — there is no fallback layout.
    pub fn cache_path(
        &self,
        file_path: &Path,
        source_root: &Path,
        handler: &Handler,
    ) -> Result<PathBuf> {
        handler.cache_path_for(file_path, source_root)
    }

    /// Freshness verdict with a reason string carrying both timestamps.
    #[must_use]
    pub fn is_fresh(&self, cache_path: &Path, source_path: &Path) -> (bool, String) {
        let Ok(Some(cache_mtime)) = timestamps::mtime_if_exists(cache_path) else {
            return (false, format!("cache file missing: {}", cache_path.display()));
        };
        match timestamps::mtime(source_path) {
            Ok(source_mtime) => {
                let fresh = timestamps::artifact_is_fresh(cache_mtime, source_mtime);
                (
                    fresh,
                    timestamps::freshness_reason(fresh, cache_mtime, source_mtime),
                )
            }
            Err(err) => (false, format!("source unreadable: {err}")),
        }
    }

    /// Read a cache file with the metadata envelope removed.
    ///
    /// Returns `None` if the file does not exist. The stripped body is what
    /// gets embedded in knowledge files; the envelope must never leak.
    pub fn read_stripped(&self, cache_path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(cache_path) {
            Ok(raw) => Ok(Some(strip_envelope(&raw))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(KbError::io(cache_path, e)),
        }
    }

    /// Write the envelope plus analysis atomically.
    pub fn write(
        &self,
        cache_path: &Path,
        source_path: &Path,
        source_root: &Path,
        analysis: &str,
    ) -> Result<()> {
        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent).map_err(|e| KbError::io(parent, e))?;
        }
        let source_mtime = timestamps::mtime(source_path)?;
        let header = metadata_header(source_path, source_root, source_mtime);
        let mut content = String::with_capacity(header.len() + analysis.len() + 2);
        content.push_str(&header);
        content.push('\n');
        content.push_str(analysis);
        if !analysis.ends_with('\n') {
            content.push('\n');
        }
        write_atomic(cache_path, content.as_bytes())
    }

    /// Every directory that will receive cache or knowledge files for the
    /// given tree — input for the one upfront structure-creation task.
    pub fn cache_directories(
        &self,
        root: &DirectoryNode,
        source_root: &Path,
        handler: &Handler,
    ) -> Result<Vec<PathBuf>> {
        let mut dirs = std::collections::BTreeSet::new();
        collect_dirs(root, source_root, handler, &mut dirs)?;
        Ok(dirs.into_iter().collect())
    }

    /// Materialize a directory list (executor side of the structure task).
    pub fn ensure_directories(&self, directories: &[PathBuf]) -> Result<()> {
        for dir in directories {
            fs::create_dir_all(dir).map_err(|e| KbError::io(dir, e))?;
        }
        Ok(())
    }

    /// Count and size the cache files in a handler's output area.
    #[must_use]
    pub fn stats(&self, source_root: &Path, handler: &Handler) -> CacheStats {
        let mut stats = CacheStats::default();
        for candidate in handler.enumerate_cleanup_candidates(source_root) {
            if candidate.kind == crate::handlers::ArtifactKind::AnalysisCache {
                stats.file_count += 1;
                stats.total_size_bytes += fs::metadata(&candidate.path)
                    .map(|m| m.len())
                    .unwrap_or(0);
            }
        }
        stats
    }

    /// Delete every analysis cache in a handler's output area. Returns the
    /// number of files removed.
    pub fn clear(&self, source_root: &Path, handler: &Handler) -> Result<usize> {
        let mut removed = 0;
        for candidate in handler.enumerate_cleanup_candidates(source_root) {
            if candidate.kind == crate::handlers::ArtifactKind::AnalysisCache {
                match fs::remove_file(&candidate.path) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(KbError::io(&candidate.path, e)),
                }
            }
        }
        Ok(removed)
    }
}

fn collect_dirs(
    node: &DirectoryNode,
    source_root: &Path,
    handler: &Handler,
    dirs: &mut std::collections::BTreeSet<PathBuf>,
) -> Result<()> {
    // Empty subtrees produce no artifacts; creating their mirror
    // directories would only feed the next run's empty-orphan sweep.
    if node.is_empty() {
        return Ok(());
    }
    if let Some(parent) = node.kb_path.parent() {
        dirs.insert(parent.to_path_buf());
    }
    for file in &node.files {
        let cache = handler.cache_path_for(&file.file_path, source_root)?;
        if let Some(parent) = cache.parent() {
            dirs.insert(parent.to_path_buf());
        }
    }
    for sub in &node.subdirs {
        collect_dirs(sub, source_root, handler, dirs)?;
    }
    Ok(())
}

/// Build the audit envelope. The source path is recorded in portable form
/// (`{PROJECT_ROOT}`-relative) so artifacts survive checkout moves.
fn metadata_header(source_path: &Path, source_root: &Path, source_mtime: SystemTime) -> String {
    let portable = paths::to_portable(source_path, source_root);
    format!(
        "{METADATA_START}\n\
         <!-- Source File: {portable} -->\n\
         <!-- Cached On: {} -->\n\
         <!-- Source Modified: {} -->\n\
         <!-- Cache Version: {CACHE_VERSION} -->\n\
         {METADATA_END}\n",
        timestamps::format_rfc3339(SystemTime::now()),
        timestamps::format_rfc3339(source_mtime),
    )
}

/// Remove the metadata envelope, delimiter lines included, plus one
/// trailing blank line.
#[must_use]
pub fn strip_envelope(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_envelope = false;
    let mut just_closed = false;
    for line in raw.lines() {
        let trimmed = line.trim_end();
        if trimmed == METADATA_START {
            in_envelope = true;
            continue;
        }
        if trimmed == METADATA_END {
            in_envelope = false;
            just_closed = true;
            continue;
        }
        if in_envelope {
            continue;
        }
        if just_closed {
            just_closed = false;
            if trimmed.is_empty() {
                continue;
            }
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Write bytes to a sibling temp file, then rename into place. Atomic on
/// any filesystem with atomic rename, which is the only OS guarantee the
/// engine relies on.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| KbError::PathMapping {
        path: path.to_path_buf(),
        details: "artifact path has no parent directory".to_string(),
    })?;
    let file_name = path
        .file_name()
        .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
    let tmp_path = parent.join(format!(".{file_name}.tmp{}", std::process::id()));
    fs::write(&tmp_path, bytes).map_err(|e| KbError::io(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        KbError::io(path, e)
    })
}
