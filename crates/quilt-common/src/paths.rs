//! Lexical path utilities.
//!
//! These operate purely on path text and never touch the filesystem. They
//! back the symlink containment check in the file utilities, where the
//! question "does this target escape the tree being copied?" must be
//! answered without following links.

use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path.
///
/// Resolves `.` and `..` components without consulting the filesystem.
/// Leading `..` components of a relative path are preserved; `..` at the
/// root of an absolute path is dropped. An empty result becomes `.`.
#[must_use]
pub fn clean(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) => {}
                _ => parts.push(comp),
            },
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return PathBuf::from(".");
    }
    parts.iter().collect()
}

/// Compute the lexical path of `target` relative to `base`.
///
/// Both paths are cleaned first. The result, when joined to `base`, is
/// lexically equivalent to `target`; it begins with `..` components when
/// `target` lies outside `base`. Returns `None` when one path is absolute
/// and the other relative, or when `base` retains `..` components that
/// make the relation undecidable without filesystem knowledge.
#[must_use]
pub fn relative(base: &Path, target: &Path) -> Option<PathBuf> {
    if base.is_absolute() != target.is_absolute() {
        return None;
    }
    let base = clean(base);
    let target = clean(target);
    if base == target {
        return Some(PathBuf::from("."));
    }

    let base_parts: Vec<Component<'_>> = base.components().collect();
    let target_parts: Vec<Component<'_>> = target.components().collect();

    let mut shared = 0;
    while shared < base_parts.len()
        && shared < target_parts.len()
        && base_parts[shared] == target_parts[shared]
    {
        shared += 1;
    }

    if base_parts[shared..]
        .iter()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return None;
    }

    let mut rel = PathBuf::new();
    for _ in shared..base_parts.len() {
        rel.push("..");
    }
    for comp in &target_parts[shared..] {
        rel.push(comp);
    }
    Some(rel)
}
