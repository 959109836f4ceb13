//! Vendored-repo handler: read-only repositories mirrored under
//! `<output>/git-clones/<repo>`.
//!
//! Artifacts never land inside the repository. Both KB and cache files go
//! in a sibling directory `<repo>.kb/` with mirrored structure; the repo
//! KB is `root_kb.md` at the top of that directory.

use std::fs;
use std::path::{Component, Path, PathBuf};

use regex::Regex;

use crate::core::errors::{KbError, Result};
use crate::handlers::ArtifactCandidate;
use crate::handlers::project::{CACHE_SUFFIX, KB_SUFFIX, ROOT_KB_NAME, collect_artifacts};

/// Directory under the output root holding vendored repositories.
pub const CLONES_AREA: &str = "git-clones";

/// Suffix of the sibling artifact directory of each repository.
pub const KB_DIR_SUFFIX: &str = ".kb";

/// Build artifacts and caches never worth summarizing inside a clone.
const CLONE_EXCLUSIONS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "target",
    "node_modules",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".tox",
    "build",
    "dist",
    ".venv",
];

/// Handler for vendored repositories.
#[derive(Debug, Clone)]
pub struct GitCloneHandler {
    output_dir_name: String,
    extra_exclusions: Vec<Regex>,
}

impl GitCloneHandler {
    /// Build a git-clone handler for the given output directory name.
    #[must_use]
    pub fn new(output_dir_name: &str, extra_exclusions: Vec<Regex>) -> Self {
        Self {
            output_dir_name: output_dir_name.to_string(),
            extra_exclusions,
        }
    }

    /// `<source_root>/<output>/git-clones`.
    #[must_use]
    pub fn clones_root(&self, source_root: &Path) -> PathBuf {
        source_root.join(&self.output_dir_name).join(CLONES_AREA)
    }

    /// Claims paths inside a vendored repository (never the `.kb` artifact
    /// side).
    #[must_use]
    pub fn can_handle(&self, path: &Path) -> bool {
        self.repo_root_of(path).is_some()
    }

    /// The repository root containing `path`, if `path` lies inside one.
    #[must_use]
    pub fn repo_root_of(&self, path: &Path) -> Option<PathBuf> {
        let mut components = path.components().peekable();
        let mut prefix = PathBuf::new();
        while let Some(component) = components.next() {
            prefix.push(component);
            if let Component::Normal(name) = component
                && name.to_string_lossy() == self.output_dir_name.as_str()
                && matches!(components.peek(), Some(Component::Normal(next)) if next.to_string_lossy() == CLONES_AREA)
            {
                components.next();
                prefix.push(CLONES_AREA);
                let repo = components.next()?;
                let Component::Normal(repo_name) = repo else {
                    return None;
                };
                if repo_name.to_string_lossy().ends_with(KB_DIR_SUFFIX) {
                    return None;
                }
                prefix.push(repo);
                return Some(prefix);
            }
        }
        None
    }

    /// The sibling artifact directory for a repository root.
    #[must_use]
    pub fn kb_dir_for(&self, repo_root: &Path) -> PathBuf {
        let repo_name = repo_root
            .file_name()
            .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
        repo_root.with_file_name(format!("{repo_name}{KB_DIR_SUFFIX}"))
    }

    /// KB location for a directory inside a vendored repo.
    pub fn kb_path_for(&self, dir_path: &Path, _source_root: &Path) -> Result<PathBuf> {
        let repo_root = self.repo_root_of(dir_path).ok_or_else(|| KbError::PathMapping {
            path: dir_path.to_path_buf(),
            details: "not inside a vendored repository".to_string(),
        })?;
        let kb_dir = self.kb_dir_for(&repo_root);
        let rel = dir_path
            .strip_prefix(&repo_root)
            .map_err(|_| KbError::PathMapping {
                path: dir_path.to_path_buf(),
                details: "escapes its repository root".to_string(),
            })?;
        if rel.as_os_str().is_empty() {
            return Ok(kb_dir.join(ROOT_KB_NAME));
        }
        let dir_name = dir_path
            .file_name()
            .ok_or_else(|| KbError::PathMapping {
                path: dir_path.to_path_buf(),
                details: "directory has no name component".to_string(),
            })?
            .to_string_lossy();
        Ok(kb_dir.join(rel).join(format!("{dir_name}{KB_SUFFIX}")))
    }

    /// Cache location for a file inside a vendored repo — always under the
    /// sibling `.kb` directory, never inside the repository.
    pub fn cache_path_for(&self, file_path: &Path, _source_root: &Path) -> Result<PathBuf> {
        let repo_root = self.repo_root_of(file_path).ok_or_else(|| KbError::PathMapping {
            path: file_path.to_path_buf(),
            details: "not inside a vendored repository".to_string(),
        })?;
        let kb_dir = self.kb_dir_for(&repo_root);
        let rel = file_path
            .strip_prefix(&repo_root)
            .map_err(|_| KbError::PathMapping {
                path: file_path.to_path_buf(),
                details: "escapes its repository root".to_string(),
            })?;
        let file_name = file_path
            .file_name()
            .ok_or_else(|| KbError::PathMapping {
                path: file_path.to_path_buf(),
                details: "file has no name component".to_string(),
            })?
            .to_string_lossy();
        let parent_rel = rel.parent().unwrap_or_else(|| Path::new(""));
        Ok(kb_dir
            .join(parent_rel)
            .join(format!("{file_name}{CACHE_SUFFIX}")))
    }

    /// Exclusion filter inside a repository.
    #[must_use]
    pub fn should_include(&self, path: &Path, _source_root: &Path) -> bool {
        let Some(repo_root) = self.repo_root_of(path) else {
            return false;
        };
        let Ok(rel) = path.strip_prefix(&repo_root) else {
            return false;
        };
        for component in rel.components() {
            if let Component::Normal(name) = component {
                if CLONE_EXCLUSIONS.contains(&name.to_string_lossy().as_ref()) {
                    return false;
                }
            }
        }
        let display = path.to_string_lossy();
        !self.extra_exclusions.iter().any(|re| re.is_match(&display))
    }

    /// Scan every `<repo>.kb/` directory for artifacts.
    pub fn enumerate_cleanup_candidates(&self, source_root: &Path) -> Vec<ArtifactCandidate> {
        let mut out = Vec::new();
        for kb_dir in self.cleanup_roots(source_root) {
            collect_artifacts(&kb_dir, &mut out);
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }

    /// Every vendored repository currently present (never the `.kb` side).
    #[must_use]
    pub fn repo_roots(&self, source_root: &Path) -> Vec<PathBuf> {
        let mut roots = Vec::new();
        let Ok(entries) = fs::read_dir(self.clones_root(source_root)) else {
            return roots;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_repo = path
                .file_name()
                .is_some_and(|n| !n.to_string_lossy().ends_with(KB_DIR_SUFFIX));
            if is_repo && path.is_dir() {
                roots.push(path);
            }
        }
        roots.sort();
        roots
    }

    /// Every `<repo>.kb` directory currently present.
    #[must_use]
    pub fn cleanup_roots(&self, source_root: &Path) -> Vec<PathBuf> {
        let mut roots = Vec::new();
        let Ok(entries) = fs::read_dir(self.clones_root(source_root)) else {
            return roots;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_kb_dir = path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().ends_with(KB_DIR_SUFFIX));
            if is_kb_dir && path.is_dir() {
                roots.push(path);
            }
        }
        roots.sort();
        roots
    }

    /// Map a KB artifact in a `.kb` directory back to its repo directory.
    #[must_use]
    pub fn reverse_map_kb(&self, kb_path: &Path, source_root: &Path) -> Option<PathBuf> {
        let (repo_root, rel) = self.split_artifact_path(kb_path, source_root)?;
        let name = rel.file_name()?.to_string_lossy();
        let parent_rel = rel.parent().unwrap_or_else(|| Path::new(""));
        if name == ROOT_KB_NAME {
            if parent_rel.as_os_str().is_empty() {
                return Some(repo_root);
            }
            return None;
        }
        let stem = name.strip_suffix(KB_SUFFIX)?;
        let parent_name = parent_rel.file_name()?.to_string_lossy();
        if stem != parent_name {
            return None;
        }
        Some(repo_root.join(parent_rel))
    }

    /// Map a cache artifact in a `.kb` directory back to its source file.
    #[must_use]
    pub fn reverse_map_cache(&self, cache_path: &Path, source_root: &Path) -> Option<PathBuf> {
        let (repo_root, rel) = self.split_artifact_path(cache_path, source_root)?;
        let name = rel.file_name()?.to_string_lossy();
        let original = name.strip_suffix(CACHE_SUFFIX)?;
        if original.is_empty() {
            return None;
        }
        let parent_rel = rel.parent().unwrap_or_else(|| Path::new(""));
        Some(repo_root.join(parent_rel).join(original))
    }

    /// Split an artifact path into (repo root, path relative to the `.kb`
    /// directory). `None` if the path is not inside a recognized `.kb` area.
    fn split_artifact_path(&self, artifact: &Path, source_root: &Path) -> Option<(PathBuf, PathBuf)> {
        let clones_root = self.clones_root(source_root);
        let rel = artifact.strip_prefix(&clones_root).ok()?;
        let mut components = rel.components();
        let Component::Normal(kb_dir_name) = components.next()? else {
            return None;
        };
        let kb_dir_name = kb_dir_name.to_string_lossy();
        let repo_name = kb_dir_name.strip_suffix(KB_DIR_SUFFIX)?;
        if repo_name.is_empty() {
            return None;
        }
        let repo_root = clones_root.join(repo_name);
        Some((repo_root, components.as_path().to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> GitCloneHandler {
        GitCloneHandler::new(".knowledge", Vec::new())
    }

    #[test]
    fn claims_paths_inside_repos_only() {
        let h = handler();
        assert!(h.can_handle(Path::new("/p/.knowledge/git-clones/foo/lib/x.rs")));
        assert!(h.can_handle(Path::new("/p/.knowledge/git-clones/foo")));
        assert!(!h.can_handle(Path::new("/p/src/lib.rs")));
        assert!(!h.can_handle(Path::new("/p/.knowledge/project-base/root_kb.md")));
        // Artifact side is not source.
        assert!(!h.can_handle(Path::new("/p/.knowledge/git-clones/foo.kb/root_kb.md")));
    }

    #[test]
    fn repo_root_detection() {
        let h = handler();
        assert_eq!(
            h.repo_root_of(Path::new("/p/.knowledge/git-clones/foo/lib/x.rs"))
                .unwrap(),
            Path::new("/p/.knowledge/git-clones/foo")
        );
        assert!(h.repo_root_of(Path::new("/p/.knowledge/git-clones")).is_none());
    }

    #[test]
    fn cache_paths_stay_out_of_the_repo() {
        let h = handler();
        let root = Path::new("/p");
        let cache = h
            .cache_path_for(Path::new("/p/.knowledge/git-clones/foo/lib/x.rs"), root)
            .unwrap();
        assert_eq!(
            cache,
            Path::new("/p/.knowledge/git-clones/foo.kb/lib/x.rs.analysis.md")
        );

        let readme = h
            .cache_path_for(Path::new("/p/.knowledge/git-clones/foo/README.md"), root)
            .unwrap();
        assert_eq!(
            readme,
            Path::new("/p/.knowledge/git-clones/foo.kb/README.md.analysis.md")
        );
    }

    #[test]
    fn repo_kb_is_root_kb_in_sibling_dir() {
        let h = handler();
        let root = Path::new("/p");
        let kb = h
            .kb_path_for(Path::new("/p/.knowledge/git-clones/foo"), root)
            .unwrap();
        assert_eq!(kb, Path::new("/p/.knowledge/git-clones/foo.kb/root_kb.md"));

        let nested = h
            .kb_path_for(Path::new("/p/.knowledge/git-clones/foo/lib"), root)
            .unwrap();
        assert_eq!(
            nested,
            Path::new("/p/.knowledge/git-clones/foo.kb/lib/lib_kb.md")
        );
    }

    #[test]
    fn path_outside_any_repo_is_a_mapping_error() {
        let h = handler();
        let err = h
            .cache_path_for(Path::new("/p/src/lib.rs"), Path::new("/p"))
            .unwrap_err();
        assert_eq!(err.code(), "KBI-2002");
    }

    #[test]
    fn excludes_vcs_and_build_dirs_inside_clones() {
        let h = handler();
        let root = Path::new("/p");
        assert!(!h.should_include(
            Path::new("/p/.knowledge/git-clones/foo/.git/HEAD"),
            root
        ));
        assert!(!h.should_include(
            Path::new("/p/.knowledge/git-clones/foo/target/debug/x"),
            root
        ));
        assert!(h.should_include(
            Path::new("/p/.knowledge/git-clones/foo/src/lib.rs"),
            root
        ));
    }

    #[test]
    fn reverse_map_cache_roundtrips() {
        let h = handler();
        let root = Path::new("/p");
        let source = Path::new("/p/.knowledge/git-clones/foo/lib/x.rs");
        let cache = h.cache_path_for(source, root).unwrap();
        assert_eq!(h.reverse_map_cache(&cache, root).unwrap(), source);
    }

    #[test]
    fn reverse_map_kb_roundtrips() {
        let h = handler();
        let root = Path::new("/p");
        let repo = Path::new("/p/.knowledge/git-clones/foo");
        let kb = h.kb_path_for(repo, root).unwrap();
        assert_eq!(h.reverse_map_kb(&kb, root).unwrap(), repo);

        let nested = Path::new("/p/.knowledge/git-clones/foo/lib");
        let nested_kb = h.kb_path_for(nested, root).unwrap();
        assert_eq!(h.reverse_map_kb(&nested_kb, root).unwrap(), nested);
    }

    #[test]
    fn reverse_map_rejects_paths_outside_kb_dirs() {
        let h = handler();
        let root = Path::new("/p");
        assert!(
            h.reverse_map_cache(
                Path::new("/p/.knowledge/git-clones/foo/x.rs.analysis.md"),
                root
            )
            .is_none()
        );
        assert!(
            h.reverse_map_kb(Path::new("/p/.knowledge/project-base/root_kb.md"), root)
                .is_none()
        );
    }

    #[test]
    fn cleanup_roots_lists_kb_dirs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join(".knowledge/git-clones/foo/src")).unwrap();
        fs::create_dir_all(root.join(".knowledge/git-clones/foo.kb/src")).unwrap();
        fs::create_dir_all(root.join(".knowledge/git-clones/bar.kb")).unwrap();

        let h = handler();
        let roots = h.cleanup_roots(root);
        assert_eq!(roots.len(), 2);
        assert!(roots.iter().all(|r| r.to_string_lossy().ends_with(".kb")));
    }
}
