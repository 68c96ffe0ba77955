// src/core/paths.rs

//! # Path Normalizer
//!
//! Every path that comes out of a build script goes through [`PathContext`]. A
//! context knows the project root and the current anchor (the directory of the
//! script being evaluated, or a task's base directory at run time), and folds
//! path fragments against them:
//!
//! - `//foo` is relative to the project root,
//! - `/foo` is absolute on the anchor's volume,
//! - any other absolute path replaces the anchor,
//! - everything else is joined to the anchor.
//!
//! The result is always cleaned lexically; the filesystem is never consulted.

use std::path::{Component, MAIN_SEPARATOR, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PathError {
    #[error("Path '{path}' is outside of '{base}' and cannot be made relative to it.")]
    OutsideBase { path: String, base: String },
}

/// The anchor state used to resolve script-supplied paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathContext {
    project_root: PathBuf,
    anchor: PathBuf,
}

impl PathContext {
    /// Creates a context whose relative fragments resolve against `anchor`.
    pub fn new(project_root: impl Into<PathBuf>, anchor: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            anchor: anchor.into(),
        }
    }

    /// Creates a context anchored at the directory containing `script`.
    pub fn for_script(project_root: impl Into<PathBuf>, script: &Path) -> Self {
        let project_root = project_root.into();
        let anchor = script
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| project_root.clone());
        Self {
            project_root,
            anchor,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn anchor(&self) -> &Path {
        &self.anchor
    }

    /// Folds `parts` against the anchor and returns the cleaned absolute path.
    pub fn normalize<I, S>(&self, parts: I) -> PathBuf
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut current = self.anchor.clone();
        for part in parts {
            let part = part.as_ref();
            if let Some(rest) = part.strip_prefix("//") {
                current = self.project_root.join(rest.trim_start_matches('/'));
            } else if part.starts_with('/') {
                current = volume_of(&current).join(part);
            } else if Path::new(part).is_absolute() {
                current = PathBuf::from(part);
            } else {
                current.push(part);
            }
        }
        clean(&current)
    }

    /// Shorthand for normalizing a single fragment.
    pub fn resolve(&self, part: &str) -> PathBuf {
        self.normalize([part])
    }

    /// Renders `path` as `//relative/path` when it lives under the project root.
    pub fn simplify(&self, path: &Path) -> String {
        match path.strip_prefix(&self.project_root) {
            Ok(rel) if rel.as_os_str().is_empty() => "//".to_string(),
            Ok(rel) => format!("//{}", to_slashes(rel)),
            Err(_) => path.display().to_string(),
        }
    }
}

/// Returns the volume (drive prefix) of `path`, or an empty path on hosts without volumes.
fn volume_of(path: &Path) -> PathBuf {
    match path.components().next() {
        Some(Component::Prefix(prefix)) => PathBuf::from(prefix.as_os_str()),
        _ => PathBuf::new(),
    }
}

/// Lexically cleans a path: drops `.`, resolves `..` against preceding names and
/// collapses repeated separators. `..` above the root is discarded.
pub fn clean(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.into_iter().collect()
}

/// Converts the host separator to `/`.
pub fn to_slashes(path: &Path) -> String {
    let text = path.to_string_lossy();
    if MAIN_SEPARATOR == '/' {
        text.into_owned()
    } else {
        text.replace(MAIN_SEPARATOR, "/")
    }
}

/// Expresses `path` relative to `base`. Both must be absolute and cleaned.
pub fn relative_to(path: &Path, base: &Path) -> Result<PathBuf, PathError> {
    let outside = || PathError::OutsideBase {
        path: path.display().to_string(),
        base: base.display().to_string(),
    };

    let path_parts: Vec<Component<'_>> = path.components().collect();
    let base_parts: Vec<Component<'_>> = base.components().collect();

    // Different roots (volumes) cannot be bridged with `..`.
    let is_root = |c: &Component<'_>| matches!(c, Component::Prefix(_) | Component::RootDir);
    let path_root: Vec<_> = path_parts.iter().take_while(|c| is_root(c)).collect();
    let base_root: Vec<_> = base_parts.iter().take_while(|c| is_root(c)).collect();
    if path_root != base_root {
        return Err(outside());
    }

    let common = path_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for component in base_parts.iter().skip(common) {
        match component {
            Component::Normal(_) => relative.push(".."),
            Component::ParentDir => return Err(outside()),
            _ => {}
        }
    }
    for component in path_parts.iter().skip(common) {
        relative.push(component.as_os_str());
    }
    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    Ok(relative)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn ctx() -> PathContext {
        PathContext::new("/proj", "/proj/sub")
    }

    #[test]
    fn test_relative_fragment_joins_anchor() {
        assert_eq!(ctx().resolve("a/b"), PathBuf::from("/proj/sub/a/b"));
        assert_eq!(ctx().resolve("../c"), PathBuf::from("/proj/c"));
        assert_eq!(ctx().resolve("./x//y/."), PathBuf::from("/proj/sub/x/y"));
    }

    #[test]
    fn test_project_rooted_fragment() {
        assert_eq!(ctx().resolve("//out/bin"), PathBuf::from("/proj/out/bin"));
        assert_eq!(ctx().resolve("//"), PathBuf::from("/proj"));
    }

    #[test]
    fn test_absolute_fragments_replace_anchor() {
        assert_eq!(ctx().resolve("/usr/lib"), PathBuf::from("/usr/lib"));
        assert_eq!(
            ctx().normalize(["a", "/b", "c"]),
            PathBuf::from("/b/c")
        );
        assert_eq!(ctx().normalize(["//x", "y"]), PathBuf::from("/proj/x/y"));
    }

    #[test]
    fn test_empty_parts_return_anchor() {
        let none: [&str; 0] = [];
        assert_eq!(ctx().normalize(none), PathBuf::from("/proj/sub"));
    }

    #[test]
    fn test_parent_above_root_is_dropped() {
        assert_eq!(clean(Path::new("/../../a")), PathBuf::from("/a"));
        assert_eq!(clean(Path::new("a/../..")), PathBuf::from(".."));
    }

    #[test]
    fn test_simplify_inside_and_outside_root() {
        let c = ctx();
        assert_eq!(c.simplify(Path::new("/proj/sub/file.txt")), "//sub/file.txt");
        assert_eq!(c.simplify(Path::new("/proj")), "//");
        assert_eq!(c.simplify(Path::new("/elsewhere/x")), "/elsewhere/x");
    }

    #[test]
    fn test_for_script_anchors_at_parent() {
        let c = PathContext::for_script("/proj", Path::new("/proj/tools/build.rhai"));
        assert_eq!(c.anchor(), Path::new("/proj/tools"));
        assert_eq!(c.resolve("gen.py"), PathBuf::from("/proj/tools/gen.py"));
    }

    #[test]
    fn test_relative_to() {
        let rel = relative_to(Path::new("/proj/out/a.o"), Path::new("/proj/src")).unwrap();
        assert_eq!(rel, PathBuf::from("../out/a.o"));
        let same = relative_to(Path::new("/proj"), Path::new("/proj")).unwrap();
        assert_eq!(same, PathBuf::from("."));
        let below = relative_to(Path::new("/proj/src/x.c"), Path::new("/proj")).unwrap();
        assert_eq!(below, PathBuf::from("src/x.c"));
    }
}
