//! Patch document engine.
//!
//! # Overview
//!
//! Turns a patch document into filesystem changes:
//!
//! ```text
//! *** Begin Patch
//! *** Update File: src/lib.rs
//! @@ fn main() {
//! -    old();
//! +    new();
//! *** End Patch
//! ```
//!
//! The pipeline is:
//!
//! 1. [`parser::identify_files_needed`] - paths whose original content is required
//! 2. [`parser::text_to_patch`] - parse and validate into [`PatchAction`]s
//! 3. [`commit::patch_to_commit`] - locate hunks and build a [`Commit`]
//! 4. [`commit::apply_commit`] - write/delete through a [`PatchFs`]
//! 5. [`diff::commit_to_diff`] - cosmetic unified diff of the commit
//!
//! [`process_patch`] runs steps 1-4 against any [`PatchFs`], which keeps the
//! engine independent of where the bytes actually live.

pub mod commit;
pub mod diff;
pub mod invocation;
pub mod matcher;
pub mod parser;

use crate::error::PatchError;

pub use commit::{apply_commit, patch_to_commit, ChangeKind, Commit, FileChange};
pub use diff::commit_to_diff;
pub use invocation::{maybe_parse_apply_patch_command, ApplyPatchInvocation};
pub use parser::{identify_files_needed, parse_patch, text_to_patch};

// ============================================================================
// TYPES
// ============================================================================

/// One file-level action from a patch document, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchAction {
    Add {
        path: String,
        content: String,
    },
    Delete {
        path: String,
    },
    Update {
        path: String,
        move_path: Option<String>,
        hunks: Vec<Hunk>,
    },
}

impl PatchAction {
    /// The path named in the action header.
    pub fn path(&self) -> &str {
        match self {
            PatchAction::Add { path, .. }
            | PatchAction::Delete { path }
            | PatchAction::Update { path, .. } => path,
        }
    }
}

/// A single line inside a hunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Removed(String),
    Added(String),
}

/// A contiguous group of context/removed/added lines.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hunk {
    /// Text after `@@ `, used to narrow the search.
    pub anchor: Option<String>,
    pub lines: Vec<HunkLine>,
    /// Set when the hunk was terminated by `*** End of File`.
    pub end_of_file: bool,
}

impl Hunk {
    /// Lines the original file must contain (context + removed), in order.
    pub fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                HunkLine::Context(s) | HunkLine::Removed(s) => Some(s.as_str()),
                HunkLine::Added(_) => None,
            })
            .collect()
    }

    /// Lines the hunk produces (context + added), in order.
    pub fn new_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                HunkLine::Context(s) | HunkLine::Added(s) => Some(s.as_str()),
                HunkLine::Removed(_) => None,
            })
            .collect()
    }
}

// ============================================================================
// FILESYSTEM COLLABORATOR
// ============================================================================

/// Storage the patch engine reads from and writes to.
///
/// Paths are exactly as they appear in the patch document. Implementations
/// are responsible for containment (see `SafetyGate`).
pub trait PatchFs {
    /// Read a file. Must distinguish "not found" from "is a directory"
    /// via [`PatchError::MissingFile`].
    fn read(&mut self, path: &str) -> Result<String, PatchError>;

    /// Whether anything exists at `path`.
    fn exists(&mut self, path: &str) -> Result<bool, PatchError>;

    /// Create or overwrite a file, creating parent directories.
    fn write(&mut self, path: &str, content: &str) -> Result<(), PatchError>;

    /// Delete a file.
    fn remove(&mut self, path: &str) -> Result<(), PatchError>;
}

/// Parse, resolve and apply `text` against `fs`.
///
/// Returns the commit that was applied. The first failing action aborts the
/// call; actions applied before it are not rolled back.
pub fn process_patch<F: PatchFs>(text: &str, fs: &mut F) -> Result<Commit, PatchError> {
    parser::ensure_patch_start(text)?;

    let mut originals = std::collections::HashMap::new();
    for path in identify_files_needed(text) {
        let content = fs.read(&path)?;
        originals.insert(path, content);
    }

    let actions = text_to_patch(text, &originals)?;
    let commit = patch_to_commit(&actions, &originals)?;
    apply_commit(&commit, fs)?;
    Ok(commit)
}
