//! Project-tree handler: whole-codebase indexing with system exclusions.
//!
//! Layout, mirrored under `<root>/<output>/project-base/`:
//! - root directory KB: `root_kb.md`
//! - subdirectory KB: `<dirname>_kb.md` inside the mirrored directory
//! - file cache: `<name>.analysis.md` alongside

use std::fs;
use std::path::{Component, Path, PathBuf};

use regex::Regex;

use crate::core::errors::{KbError, Result};
use crate::handlers::{ArtifactCandidate, ArtifactKind};

/// Mirror directory name under the output root.
pub const PROJECT_AREA: &str = "project-base";

/// Name of the project-root knowledge file.
pub const ROOT_KB_NAME: &str = "root_kb.md";

/// Suffix of every per-file analysis cache.
pub const CACHE_SUFFIX: &str = ".analysis.md";

/// Suffix of every non-root knowledge file.
pub const KB_SUFFIX: &str = "_kb.md";

/// Directory names never indexed: VCS metadata, build outputs, dependency
/// and tool caches. The knowledge output directory itself is excluded by
/// name at runtime since it is configurable.
const SYSTEM_EXCLUSIONS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".jj",
    ".vscode",
    ".idea",
    ".coding_assistant",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".ruff_cache",
    "node_modules",
    "target",
    ".venv",
];

/// Handler for the project source tree. Universal fallback: claims any path.
#[derive(Debug, Clone)]
pub struct ProjectHandler {
    output_dir_name: String,
    extra_exclusions: Vec<Regex>,
}

impl ProjectHandler {
    /// Build a project handler for the given output directory name.
    #[must_use]
    pub fn new(output_dir_name: &str, extra_exclusions: Vec<Regex>) -> Self {
        Self {
            output_dir_name: output_dir_name.to_string(),
            extra_exclusions,
        }
    }

    /// The mirror area under the output root.
    #[must_use]
    pub fn output_area(&self, source_root: &Path) -> PathBuf {
        source_root.join(&self.output_dir_name).join(PROJECT_AREA)
    }

    /// Universal fallback: every path is claimable.
    #[must_use]
    pub fn can_handle(&self, _path: &Path) -> bool {
        true
    }

    /// KB location for a source directory.
    pub fn kb_path_for(&self, dir_path: &Path, source_root: &Path) -> Result<PathBuf> {
        let rel = dir_path
            .strip_prefix(source_root)
            .map_err(|_| KbError::PathMapping {
                path: dir_path.to_path_buf(),
                details: format!("not under source root {}", source_root.display()),
            })?;
        let area = self.output_area(source_root);
        if rel.as_os_str().is_empty() {
            return Ok(area.join(ROOT_KB_NAME));
        }
        let dir_name = dir_path
            .file_name()
            .ok_or_else(|| KbError::PathMapping {
                path: dir_path.to_path_buf(),
                details: "directory has no name component".to_string(),
            })?
            .to_string_lossy();
        Ok(area.join(rel).join(format!("{dir_name}{KB_SUFFIX}")))
    }

    /// Cache location for a source file.
    pub fn cache_path_for(&self, file_path: &Path, source_root: &Path) -> Result<PathBuf> {
        let rel = file_path
            .strip_prefix(source_root)
            .map_err(|_| KbError::PathMapping {
                path: file_path.to_path_buf(),
                details: format!("not under source root {}", source_root.display()),
            })?;
        let file_name = file_path
            .file_name()
            .ok_or_else(|| KbError::PathMapping {
                path: file_path.to_path_buf(),
                details: "file has no name component".to_string(),
            })?
            .to_string_lossy();
        let parent_rel = rel.parent().unwrap_or_else(|| Path::new(""));
        Ok(self
            .output_area(source_root)
            .join(parent_rel)
            .join(format!("{file_name}{CACHE_SUFFIX}")))
    }

    /// Exclusion filter: system directories, the output directory itself,
    /// and configured patterns.
    #[must_use]
    pub fn should_include(&self, path: &Path, source_root: &Path) -> bool {
        let rel = match path.strip_prefix(source_root) {
            Ok(rel) => rel,
            Err(_) => return false,
        };
        for component in rel.components() {
            if let Component::Normal(name) = component {
                let name = name.to_string_lossy();
                if name == self.output_dir_name.as_str()
                    || SYSTEM_EXCLUSIONS.contains(&name.as_ref())
                {
                    return false;
                }
            }
        }
        let display = path.to_string_lossy();
        !self.extra_exclusions.iter().any(|re| re.is_match(&display))
    }

    /// Recursively scan `project-base/` for artifacts.
    pub fn enumerate_cleanup_candidates(&self, source_root: &Path) -> Vec<ArtifactCandidate> {
        let mut out = Vec::new();
        collect_artifacts(&self.output_area(source_root), &mut out);
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }

    /// Output roots for the empty-directory sweep.
    #[must_use]
    pub fn cleanup_roots(&self, source_root: &Path) -> Vec<PathBuf> {
        vec![self.output_area(source_root)]
    }

    /// Map a KB artifact back to the source directory it summarizes.
    #[must_use]
    pub fn reverse_map_kb(&self, kb_path: &Path, source_root: &Path) -> Option<PathBuf> {
        let rel = kb_path.strip_prefix(self.output_area(source_root)).ok()?;
        let name = rel.file_name()?.to_string_lossy();
        let parent_rel = rel.parent().unwrap_or_else(|| Path::new(""));
        if name == ROOT_KB_NAME {
            if parent_rel.as_os_str().is_empty() {
                return Some(source_root.to_path_buf());
            }
            return None;
        }
        let stem = name.strip_suffix(KB_SUFFIX)?;
        // A directory KB is named after its own directory.
        let parent_name = parent_rel.file_name()?.to_string_lossy();
        if stem != parent_name {
            return None;
        }
        Some(source_root.join(parent_rel))
    }

    /// Map a cache artifact back to the source file it covers.
    #[must_use]
    pub fn reverse_map_cache(&self, cache_path: &Path, source_root: &Path) -> Option<PathBuf> {
        let rel = cache_path.strip_prefix(self.output_area(source_root)).ok()?;
        let name = rel.file_name()?.to_string_lossy();
        let original = name.strip_suffix(CACHE_SUFFIX)?;
        if original.is_empty() {
            return None;
        }
        let parent_rel = rel.parent().unwrap_or_else(|| Path::new(""));
        Some(source_root.join(parent_rel).join(original))
    }
}

/// Walk an output area collecting artifacts by name shape. Unrecognized
/// files are ignored; they are not ours to delete.
pub(crate) fn collect_artifacts(dir: &Path, out: &mut Vec<ArtifactCandidate>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.is_dir() {
            collect_artifacts(&path, out);
        } else if let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) {
            if name.ends_with(CACHE_SUFFIX) {
                out.push(ArtifactCandidate {
                    path,
                    kind: ArtifactKind::AnalysisCache,
                });
            } else if name == ROOT_KB_NAME || name.ends_with(KB_SUFFIX) {
                out.push(ArtifactCandidate {
                    path,
                    kind: ArtifactKind::KnowledgeFile,
                });
            }
        }
    }
}
