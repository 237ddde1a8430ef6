//! Workspace path containment.
//!
//! # Overview
//!
//! [`WorkspaceSandbox`] is the single place that decides whether a
//! workspace-relative path may be touched. The patch engine calls
//! [`WorkspaceSandbox::resolve`] before every read, write and delete, and
//! the `rm`/`trash`/`find`/`git -C` command rules call it for every operand.
//!
//! # Resolution
//!
//! 1. Absolute paths are rejected outright. A `..` that climbs above the
//!    root on paper is rejected too, before any filesystem access.
//! 2. The path is then walked one component at a time from the canonical
//!    root. Each existing prefix is canonicalized before the next component
//!    is applied, so `..` is taken relative to where a symlink actually
//!    points, exactly as the kernel would do it.
//! 3. The result must equal the root or be a descendant of it.

use crate::error::PatchError;
use std::io;
use std::path::{Component, Path, PathBuf};

const ABSOLUTE: &str = "Absolute path not allowed";
const ESCAPES: &str = "Path escapes workspace";

/// A canonicalized workspace root plus the containment check.
#[derive(Debug, Clone)]
pub struct WorkspaceSandbox {
    root: PathBuf,
}

impl WorkspaceSandbox {
    /// Capture `root`, canonicalizing it once.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, PatchError> {
        let root = root.as_ref();
        let root = root
            .canonicalize()
            .map_err(|e| PatchError::io(&root.display().to_string(), e))?;
        Ok(Self { root })
    }

    /// The canonical workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a workspace-relative path to a canonical absolute path inside the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, PatchError> {
        check_lexical(path)?;
        let candidate = resolve_physical(&self.root, Path::new(path)).map_err(|e| match e {
            Resolution::Io(source) => PatchError::io(path, source),
            Resolution::DanglingLink => escape(path),
        })?;

        if candidate.starts_with(&self.root) {
            Ok(candidate)
        } else {
            Err(escape(path))
        }
    }
}

fn escape(path: &str) -> PatchError {
    PatchError::PathEscape {
        path: path.to_string(),
        reason: ESCAPES.to_string(),
    }
}

/// Reject empty and absolute paths, and any `..` that climbs above the
/// root even before symlinks are considered.
fn check_lexical(path: &str) -> Result<(), PatchError> {
    let raw = Path::new(path);
    if path.is_empty() {
        return Err(PatchError::PathEscape {
            path: path.to_string(),
            reason: "Empty path not allowed".to_string(),
        });
    }
    if raw.is_absolute() || raw.has_root() {
        return Err(PatchError::PathEscape {
            path: path.to_string(),
            reason: ABSOLUTE.to_string(),
        });
    }

    let mut depth: usize = 0;
    for component in raw.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                depth = depth.checked_sub(1).ok_or_else(|| escape(path))?;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PatchError::PathEscape {
                    path: path.to_string(),
                    reason: ABSOLUTE.to_string(),
                });
            }
        }
    }
    Ok(())
}

enum Resolution {
    Io(io::Error),
    DanglingLink,
}

/// Walk `relative` from `root`, canonicalizing every existing prefix.
///
/// Below a missing entry components are appended as text, since nothing
/// there can be a symlink. Climbing back out of the missing part resumes
/// canonicalization.
fn resolve_physical(root: &Path, relative: &Path) -> Result<PathBuf, Resolution> {
    let mut current = root.to_path_buf();
    let mut missing: usize = 0;

    for component in relative.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                current.pop();
                missing = missing.saturating_sub(1);
            }
            Component::Normal(part) => {
                current.push(part);
                if missing > 0 {
                    missing += 1;
                    continue;
                }
                match current.canonicalize() {
                    Ok(canonical) => current = canonical,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        // A symlink whose target is missing would be followed on write.
                        if current.symlink_metadata().is_ok() {
                            return Err(Resolution::DanglingLink);
                        }
                        missing = 1;
                    }
                    Err(e) => return Err(Resolution::Io(e)),
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Resolution::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "unexpected root component",
                )))
            }
        }
    }
    Ok(current)
}
