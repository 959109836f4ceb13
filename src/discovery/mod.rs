//! Source-tree discovery: a depth-first walk yielding a `DirectoryNode`
//! tree with per-file metadata and handler-resolved artifact paths.
//!
//! Every node's `kb_path` is computed by the owning handler *during*
//! discovery and is authoritative from then on; downstream phases never
//! recompute it. Inaccessible entries are logged and skipped — a walk
//! never aborts on a single bad entry.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::core::errors::Result;
use crate::handlers::Handler;
use crate::logger::RunLogger;

/// A source file captured at discovery time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    /// Absolute path of the source file.
    pub file_path: PathBuf,
    /// Size in bytes at discovery.
    pub size: u64,
    /// Modification time at discovery.
    pub mtime: SystemTime,
}

/// A source directory and its (post-filter) contents.
#[derive(Debug, Clone)]
pub struct DirectoryNode {
    /// Absolute path of the directory.
    pub dir_path: PathBuf,
    /// Modification time of the directory itself at discovery. Changes when
    /// entries are added or removed, which is how deleted sources surface
    /// in freshness checks.
    pub mtime: SystemTime,
    /// Included files, ordered by name.
    pub files: Vec<FileNode>,
    /// Included subdirectories, ordered by name.
    pub subdirs: Vec<DirectoryNode>,
    /// Where this directory's knowledge file is written. Set by the owning
    /// handler at discovery time; never recomputed later.
    pub kb_path: PathBuf,
}

impl DirectoryNode {
    /// True when the subtree holds no included files at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.subdirs.iter().all(DirectoryNode::is_empty)
    }

    /// Number of files in the whole subtree.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files.len() + self.subdirs.iter().map(DirectoryNode::file_count).sum::<usize>()
    }

    /// Number of directories in the whole subtree, this node included.
    #[must_use]
    pub fn directory_count(&self) -> usize {
        1 + self
            .subdirs
            .iter()
            .map(DirectoryNode::directory_count)
            .sum::<usize>()
    }

    /// Visit every directory leaf-first (children before parents).
    pub fn visit_post_order<'a>(&'a self, visit: &mut impl FnMut(&'a Self)) {
        for sub in &self.subdirs {
            sub.visit_post_order(visit);
        }
        visit(self);
    }

    /// Visit every file with its containing directory.
    pub fn visit_files<'a>(&'a self, visit: &mut impl FnMut(&'a Self, &'a FileNode)) {
        for file in &self.files {
            visit(self, file);
        }
        for sub in &self.subdirs {
            sub.visit_files(visit);
        }
    }
}

/// One discovered tree paired with the handler that owns it.
///
/// The handler travels with the tree through decision and planning so a
/// file's artifact paths are always computed by the handler that claimed
/// its root — never re-resolved from the path.
#[derive(Debug, Clone)]
pub struct DiscoveredTree {
    /// The handler that owns this tree's layout.
    pub handler: Handler,
    /// The discovered root node.
    pub root: DirectoryNode,
}

/// Walk `source_root` with the given handler, producing the node tree.
///
/// A handler path-calculation failure on the root is fatal for this walk;
/// on any deeper directory it skips that subtree only.
pub fn discover(
    source_root: &Path,
    handler: &Handler,
    logger: &RunLogger,
) -> Result<DirectoryNode> {
    let kb_path = handler.kb_path_for(source_root, source_root)?;
    walk_directory(source_root, kb_path, source_root, handler, logger)
}

fn walk_directory(
    dir_path: &Path,
    kb_path: PathBuf,
    source_root: &Path,
    handler: &Handler,
    logger: &RunLogger,
) -> Result<DirectoryNode> {
    let dir_mtime = fs::metadata(dir_path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut node = DirectoryNode {
        dir_path: dir_path.to_path_buf(),
        mtime: dir_mtime,
        files: Vec::new(),
        subdirs: Vec::new(),
        kb_path,
    };

    let entries = match fs::read_dir(dir_path) {
        Ok(entries) => entries,
        Err(err) => {
            logger.warn_path(dir_path, format!("unreadable directory: {err}"));
            return Ok(node);
        }
    };

    let mut children: Vec<PathBuf> = Vec::new();
    for entry in entries {
        match entry {
            Ok(entry) => children.push(entry.path()),
            Err(err) => logger.warn_path(dir_path, format!("unreadable entry: {err}")),
        }
    }
    children.sort();

    for child in children {
        let meta = match fs::symlink_metadata(&child) {
            Ok(meta) => meta,
            Err(err) => {
                logger.warn_path(&child, format!("stat failed: {err}"));
                continue;
            }
        };
        // Symlinks are neither followed nor indexed.
        if meta.file_type().is_symlink() {
            continue;
        }
        if !handler.should_include(&child, source_root) {
            continue;
        }

        if meta.is_dir() {
            let child_kb = match handler.kb_path_for(&child, source_root) {
                Ok(kb) => kb,
                Err(err) => {
                    logger.warn_path(&child, format!("skipping subtree: {err}"));
                    continue;
                }
            };
            let sub = walk_directory(&child, child_kb, source_root, handler, logger)?;
            node.subdirs.push(sub);
        } else if meta.is_file() {
            let mtime = match meta.modified() {
                Ok(mtime) => mtime,
                Err(err) => {
                    logger.warn_path(&child, format!("mtime unavailable: {err}"));
                    continue;
                }
            };
            node.files.push(FileNode {
                file_path: child,
                size: meta.len(),
                mtime,
            });
        }
    }

    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::IndexingConfig;
    use crate::handlers::HandlerRegistry;

    fn project_handler() -> Handler {
        let registry = HandlerRegistry::from_config(&IndexingConfig::default()).unwrap();
        registry
            .handlers()
            .iter()
            .find(|h| h.name() == "project")
            .unwrap()
            .clone()
    }

    #[test]
    fn discovers_files_and_subdirs_in_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("b.py"), "print()").unwrap();
        fs::write(root.join("a.py"), "print()").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/c.py"), "print()").unwrap();

        let handler = project_handler();
        let tree = discover(root, &handler, &RunLogger::disabled()).unwrap();

        let names: Vec<_> = tree
            .files
            .iter()
            .map(|f| f.file_path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.py", "b.py"]);
        assert_eq!(tree.subdirs.len(), 1);
        assert_eq!(tree.subdirs[0].files.len(), 1);
        assert_eq!(tree.file_count(), 3);
        assert_eq!(tree.directory_count(), 2);
    }

    #[test]
    fn kb_paths_are_set_by_the_handler() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/x.py"), "x").unwrap();

        let handler = project_handler();
        let tree = discover(root, &handler, &RunLogger::disabled()).unwrap();

        assert_eq!(tree.kb_path, root.join(".knowledge/project-base/root_kb.md"));
        assert_eq!(
            tree.subdirs[0].kb_path,
            root.join(".knowledge/project-base/sub/sub_kb.md")
        );
    }

    #[test]
    fn excluded_directories_are_not_entered() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/config"), "x").unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        fs::write(root.join("kept.py"), "x").unwrap();

        let handler = project_handler();
        let tree = discover(root, &handler, &RunLogger::disabled()).unwrap();
        assert_eq!(tree.file_count(), 1);
        assert!(tree.subdirs.is_empty());
    }

    #[test]
    fn empty_directories_are_retained() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir(root.join("hollow")).unwrap();

        let handler = project_handler();
        let tree = discover(root, &handler, &RunLogger::disabled()).unwrap();
        assert_eq!(tree.subdirs.len(), 1);
        assert!(tree.subdirs[0].is_empty());
        assert!(tree.is_empty());
    }

    #[test]
    fn symlinks_are_skipped() {
        #[cfg(unix)]
        {
            let tmp = tempfile::TempDir::new().unwrap();
            let root = tmp.path();
            fs::write(root.join("real.py"), "x").unwrap();
            std::os::unix::fs::symlink(root.join("real.py"), root.join("link.py")).unwrap();

            let handler = project_handler();
            let tree = discover(root, &handler, &RunLogger::disabled()).unwrap();
            assert_eq!(tree.file_count(), 1);
        }
    }

    #[test]
    fn captures_size_and_mtime() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("data.py"), "12345").unwrap();

        let handler = project_handler();
        let tree = discover(root, &handler, &RunLogger::disabled()).unwrap();
        let file = &tree.files[0];
        assert_eq!(file.size, 5);
        assert!(file.mtime <= SystemTime::now());
    }

    #[test]
    fn post_order_visits_children_first() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("a/deep")).unwrap();
        fs::write(root.join("a/deep/x.py"), "x").unwrap();

        let handler = project_handler();
        let tree = discover(root, &handler, &RunLogger::disabled()).unwrap();

        let mut order = Vec::new();
        tree.visit_post_order(&mut |node| order.push(node.dir_path.clone()));
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], root.join("a/deep"));
        assert_eq!(order[1], root.join("a"));
        assert_eq!(order[2], root);
    }
}
