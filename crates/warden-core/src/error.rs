//! Error types for patch application.
//!
//! Every failure inside `apply_patch` surfaces as a single [`PatchError`]:
//! the first per-file problem aborts the whole call.

use std::fmt;
use thiserror::Error;

/// Why a referenced file could not be used as patch input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingKind {
    /// Nothing exists at the path.
    NotFound,
    /// The path exists but is a directory.
    Directory,
}

impl fmt::Display for MissingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingKind::NotFound => write!(f, "Missing File"),
            MissingKind::Directory => write!(f, "Cannot apply patch to directory"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PatchError {
    /// Malformed document structure.
    #[error("{0}")]
    Format(String),

    /// A file referenced by an Update or Delete action is absent or a directory.
    #[error("{kind}: {path}")]
    MissingFile { path: String, kind: MissingKind },

    /// An Add action targets a path that already exists.
    #[error("Add File Error: File already exists: {0}")]
    AlreadyExists(String),

    /// A hunk's context could not be located at or after the cursor.
    #[error("Invalid Context in {path} (hunk {hunk}):\n{context}")]
    ContextNotFound {
        path: String,
        hunk: usize,
        context: String,
    },

    /// A path is absolute or resolves outside the workspace root.
    #[error("{reason}: {path}")]
    PathEscape { path: String, reason: String },

    /// Wrapped read/write/delete failure.
    #[error("Failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl PatchError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        PatchError::Format(msg.into())
    }

    pub(crate) fn io(path: &str, source: std::io::Error) -> Self {
        PatchError::Io {
            path: path.to_string(),
            source,
        }
    }
}
