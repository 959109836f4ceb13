//! Shared path manipulation utilities: normalization, portable-path
//! substitution, and deterministic task-id derivation.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Placeholder for the project root in portable artifact references.
pub const PROJECT_ROOT_VAR: &str = "{PROJECT_ROOT}";
/// Placeholder for the user's home directory in portable artifact references.
pub const HOME_VAR: &str = "{HOME}";

/// Anchor a path to the current directory and resolve `.`/`..` lexically.
///
/// Resolution is purely syntactic — symlinks are not chased. Every
/// artifact path in a run is derived from the source root this function
/// produces, and chasing links here could move a vendored repository's
/// lexical ancestry out from under the handler that claimed it.
pub fn absolutize(path: &Path) -> PathBuf {
    let mut resolved = if path.is_absolute() {
        PathBuf::new()
    } else {
        env::current_dir().unwrap_or_default()
    };
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Popping past the root is a no-op, so "/.." stays "/".
                resolved.pop();
            }
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                resolved.push(component);
            }
        }
    }
    resolved
}

/// Render a path in portable form for artifact headers.
///
/// Paths under the project root become `{PROJECT_ROOT}/rel`, paths under
/// the home directory `{HOME}/rel`. Anything else stays absolute. The
/// placeholder is preserved verbatim in headers so artifacts remain
/// portable across checkouts; [`from_portable`] resolves it at use time.
#[must_use]
pub fn to_portable(path: &Path, project_root: &Path) -> String {
    if let Ok(rel) = path.strip_prefix(project_root) {
        return join_var(PROJECT_ROOT_VAR, rel);
    }
    if let Some(home) = home_dir()
        && let Ok(rel) = path.strip_prefix(&home)
    {
        return join_var(HOME_VAR, rel);
    }
    path.to_string_lossy().into_owned()
}

/// Resolve a portable path reference back to a concrete path.
#[must_use]
pub fn from_portable(portable: &str, project_root: &Path) -> PathBuf {
    if let Some(rest) = strip_var(portable, PROJECT_ROOT_VAR) {
        return project_root.join(rest);
    }
    if let Some(rest) = strip_var(portable, HOME_VAR) {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(portable)
}

fn join_var(var: &str, rel: &Path) -> String {
    if rel.as_os_str().is_empty() {
        var.to_string()
    } else {
        format!("{var}/{}", rel.to_string_lossy().replace('\\', "/"))
    }
}

fn strip_var<'a>(portable: &'a str, var: &str) -> Option<&'a str> {
    portable
        .strip_prefix(var)
        .map(|rest| rest.strip_prefix('/').unwrap_or(rest))
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME").map(PathBuf::from)
}

/// Derive a deterministic identifier fragment from a path.
///
/// Separators and punctuation collapse to single underscores so the
/// result is stable across platforms and usable as a dependency
/// reference in an execution plan.
#[must_use]
pub fn path_slug(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut slug = String::with_capacity(raw.len());
    let mut last_was_sep = true;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

/// Shorten a path for display, keeping the tail components.
#[must_use]
pub fn truncate_for_display(path: &Path, max_length: usize) -> String {
    let full = path.to_string_lossy();
    if full.chars().count() <= max_length {
        return full.into_owned();
    }
    let mut tail = String::new();
    for component in path.components().rev() {
        let piece = component.as_os_str().to_string_lossy();
        let candidate_len = tail.chars().count() + piece.chars().count() + 1;
        if !tail.is_empty() && candidate_len + 2 > max_length {
            break;
        }
        if tail.is_empty() {
            tail = piece.into_owned();
        } else {
            tail = format!("{piece}/{tail}");
        }
    }
    format!("…/{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolutize_anchors_relative_targets_to_cwd() {
        let cwd = env::current_dir().unwrap();
        assert_eq!(absolutize(Path::new(".")), cwd);
        assert_eq!(absolutize(Path::new("src/./lib.rs")), cwd.join("src/lib.rs"));
        assert_eq!(absolutize(Path::new("sub/../other")), cwd.join("other"));
    }

    #[test]
    fn absolutize_collapses_dot_segments_without_touching_the_filesystem() {
        // The path need not exist: resolution is lexical, so a source root
        // named before its checkout is created still normalizes.
        let input = Path::new("/work/checkout/../project/./src");
        assert_eq!(absolutize(input), Path::new("/work/project/src"));
        assert_eq!(absolutize(Path::new("/../escape")), Path::new("/escape"));
    }

    #[test]
    fn absolutize_does_not_chase_symlinks() {
        #[cfg(unix)]
        {
            let tmp = tempfile::TempDir::new().unwrap();
            let real = tmp.path().join("real");
            let link = tmp.path().join("link");
            std::fs::create_dir(&real).unwrap();
            std::os::unix::fs::symlink(&real, &link).unwrap();

            // The lexical identity is preserved; the handler that claimed
            // `link` keeps owning paths under it.
            assert_eq!(absolutize(&link), link);
        }
    }

    #[test]
    fn absolutized_roots_feed_the_portable_round_trip() {
        let root = absolutize(Path::new("/work/team/../project"));
        assert_eq!(root, Path::new("/work/project"));

        let source = root.join("src/main.rs");
        let portable = to_portable(&source, &root);
        assert_eq!(portable, "{PROJECT_ROOT}/src/main.rs");
        assert_eq!(from_portable(&portable, &root), source);
    }

    #[test]
    fn portable_path_under_project_root() {
        let root = Path::new("/work/project");
        let portable = to_portable(Path::new("/work/project/src/lib.rs"), root);
        assert_eq!(portable, "{PROJECT_ROOT}/src/lib.rs");
    }

    #[test]
    fn portable_path_roundtrips() {
        let root = Path::new("/work/project");
        let original = Path::new("/work/project/docs/readme.md");
        let portable = to_portable(original, root);
        assert_eq!(from_portable(&portable, root), original);
    }

    #[test]
    fn portable_path_outside_known_roots_stays_absolute() {
        let root = Path::new("/work/project");
        let outside = Path::new("/var/tmp/thing.txt");
        let portable = to_portable(outside, root);
        assert_eq!(portable, "/var/tmp/thing.txt");
        assert_eq!(from_portable(&portable, root), outside);
    }

    #[test]
    fn project_root_itself_maps_to_bare_placeholder() {
        let root = Path::new("/work/project");
        assert_eq!(to_portable(root, root), "{PROJECT_ROOT}");
        assert_eq!(from_portable("{PROJECT_ROOT}", root), root);
    }

    #[test]
    fn path_slug_collapses_punctuation_runs() {
        assert_eq!(path_slug(Path::new("/p/sub/b.py")), "p_sub_b_py");
        assert_eq!(path_slug(Path::new("/a//b..c")), "a_b_c");
        assert_eq!(path_slug(Path::new("Weird Name (1).md")), "weird_name_1_md");
    }

    #[test]
    fn path_slug_is_deterministic() {
        let p = Path::new("/some/deep/tree/file.rs");
        assert_eq!(path_slug(p), path_slug(p));
    }

    #[test]
    fn truncate_keeps_tail_components() {
        let p = Path::new("/very/long/path/with/many/components/file.analysis.md");
        let short = truncate_for_display(p, 30);
        assert!(short.starts_with("…/"));
        assert!(short.ends_with("file.analysis.md"));
        let full = truncate_for_display(Path::new("/a/b.md"), 30);
        assert_eq!(full, "/a/b.md");
    }
}
