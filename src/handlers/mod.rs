//! Handler registry: routes every source path to the handler that owns its
//! artifact layout and delegates all path calculations to it.
//!
//! The handler set is closed and known statically, so handlers are a tagged
//! variant with a common capability surface rather than trait objects.
//! Registration order is significant: the git-clone handler claims paths
//! first, and the project handler is registered last as the universal
//! fallback. A path no handler claims is warn-and-skip, never silently
//! routed through a default layout.

pub mod git_clone;
pub mod project;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::config::IndexingConfig;
use crate::core::errors::Result;

pub use git_clone::GitCloneHandler;
pub use project::ProjectHandler;

/// Kind of artifact found during a cleanup scan of a handler's output area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A per-directory knowledge-base file.
    KnowledgeFile,
    /// A per-file analysis cache.
    AnalysisCache,
}

/// A candidate artifact discovered in a handler's output area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactCandidate {
    /// Absolute path of the artifact.
    pub path: PathBuf,
    /// What the artifact is, judged from its name.
    pub kind: ArtifactKind,
}

/// A handler owning the artifact layout for one class of source tree.
#[derive(Debug, Clone)]
pub enum Handler {
    /// Vendored repositories under `<output>/git-clones/<repo>` (read-only).
    GitClone(GitCloneHandler),
    /// The project tree itself — universal fallback.
    Project(ProjectHandler),
}

impl Handler {
    /// Short identifier used in logs and decision metadata.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::GitClone(_) => "git-clone",
            Self::Project(_) => "project",
        }
    }

    /// Capability claim: does this handler own `path`?
    #[must_use]
    pub fn can_handle(&self, path: &Path) -> bool {
        match self {
            Self::GitClone(h) => h.can_handle(path),
            Self::Project(h) => h.can_handle(path),
        }
    }

    /// Where the knowledge-base file for `dir_path` is written.
    pub fn kb_path_for(&self, dir_path: &Path, source_root: &Path) -> Result<PathBuf> {
        match self {
            Self::GitClone(h) => h.kb_path_for(dir_path, source_root),
            Self::Project(h) => h.kb_path_for(dir_path, source_root),
        }
    }

    /// Where the analysis cache for `file_path` is written.
    pub fn cache_path_for(&self, file_path: &Path, source_root: &Path) -> Result<PathBuf> {
        match self {
            Self::GitClone(h) => h.cache_path_for(file_path, source_root),
            Self::Project(h) => h.cache_path_for(file_path, source_root),
        }
    }

    /// Exclusion filter applied during discovery and orphan validation.
    #[must_use]
    pub fn should_include(&self, path: &Path, source_root: &Path) -> bool {
        match self {
            Self::GitClone(h) => h.should_include(path, source_root),
            Self::Project(h) => h.should_include(path, source_root),
        }
    }

    /// Scan this handler's own output area for artifact candidates.
    ///
    /// The handler, not a central scanner, knows where it puts things.
    pub fn enumerate_cleanup_candidates(&self, source_root: &Path) -> Vec<ArtifactCandidate> {
        match self {
            Self::GitClone(h) => h.enumerate_cleanup_candidates(source_root),
            Self::Project(h) => h.enumerate_cleanup_candidates(source_root),
        }
    }

    /// Root directories of this handler's output area, for the
    /// empty-orphan-directory sweep.
    #[must_use]
    pub fn cleanup_roots(&self, source_root: &Path) -> Vec<PathBuf> {
        match self {
            Self::GitClone(h) => h.cleanup_roots(source_root),
            Self::Project(h) => h.cleanup_roots(source_root),
        }
    }

    /// Map a knowledge file back to the source directory it summarizes.
    #[must_use]
    pub fn reverse_map_kb(&self, kb_path: &Path, source_root: &Path) -> Option<PathBuf> {
        match self {
            Self::GitClone(h) => h.reverse_map_kb(kb_path, source_root),
            Self::Project(h) => h.reverse_map_kb(kb_path, source_root),
        }
    }

    /// Map an analysis cache back to the source file it covers.
    #[must_use]
    pub fn reverse_map_cache(&self, cache_path: &Path, source_root: &Path) -> Option<PathBuf> {
        match self {
            Self::GitClone(h) => h.reverse_map_cache(cache_path, source_root),
            Self::Project(h) => h.reverse_map_cache(cache_path, source_root),
        }
    }
}

/// Ordered handler collection with first-claim routing.
#[derive(Debug, Clone)]
pub struct HandlerRegistry {
    handlers: Vec<Handler>,
}

impl HandlerRegistry {
    /// Build the registry from configuration.
    ///
    /// Specialized handlers come first; the project handler is always last
    /// so it acts as the fallback.
    pub fn from_config(config: &IndexingConfig) -> Result<Self> {
        let exclusions = config.compiled_exclusions()?;
        let mut handlers = Vec::new();
        if config.handlers.enable_git_clone_indexing {
            handlers.push(Handler::GitClone(GitCloneHandler::new(
                &config.handlers.output_dir_name,
                exclusions.clone(),
            )));
        }
        if config.handlers.enable_project_indexing {
            handlers.push(Handler::Project(ProjectHandler::new(
                &config.handlers.output_dir_name,
                exclusions,
            )));
        }
        Ok(Self { handlers })
    }

    /// First handler whose `can_handle` claims the path, or `None`
    /// (warn-and-skip at the caller).
    #[must_use]
    pub fn handler_for(&self, path: &Path) -> Option<&Handler> {
        self.handlers.iter().find(|h| h.can_handle(path))
    }

    /// All registered handlers, in routing order.
    #[must_use]
    pub fn handlers(&self) -> &[Handler] {
        &self.handlers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> HandlerRegistry {
        HandlerRegistry::from_config(&IndexingConfig::default()).unwrap()
    }

    #[test]
    fn project_handler_is_registered_last() {
        let reg = registry();
        let names: Vec<_> = reg.handlers().iter().map(Handler::name).collect();
        assert_eq!(names, vec!["git-clone", "project"]);
    }

    #[test]
    fn git_clone_paths_route_to_git_clone_handler() {
        let reg = registry();
        let handler = reg
            .handler_for(Path::new("/p/.knowledge/git-clones/foo/src/lib.rs"))
            .unwrap();
        assert_eq!(handler.name(), "git-clone");
    }

    #[test]
    fn ordinary_paths_fall_back_to_project_handler() {
        let reg = registry();
        let handler = reg.handler_for(Path::new("/p/src/lib.rs")).unwrap();
        assert_eq!(handler.name(), "project");
    }

    #[test]
    fn disabled_project_handler_leaves_paths_unclaimed() {
        let mut config = IndexingConfig::default();
        config.handlers.enable_project_indexing = false;
        let reg = HandlerRegistry::from_config(&config).unwrap();
        assert!(reg.handler_for(Path::new("/p/src/lib.rs")).is_none());
        assert!(
            reg.handler_for(Path::new("/p/.knowledge/git-clones/foo/x.rs"))
                .is_some()
        );
    }

    #[test]
    fn kb_artifact_dirs_are_not_claimed_by_git_clone() {
        let reg = registry();
        // Artifact side of a vendored repo belongs to no source tree; the
        // project handler would claim it but discovery never routes it
        // (the output dir is excluded).
        let handler = reg
            .handler_for(Path::new("/p/.knowledge/git-clones/foo.kb/root_kb.md"))
            .unwrap();
        assert_eq!(handler.name(), "project");
    }
}
