//! Hunk resolution and commit application.
//!
//! [`patch_to_commit`] is pure: it turns parsed actions plus original file
//! contents into a [`Commit`] of full before/after contents. [`apply_commit`]
//! then replays the commit through a [`PatchFs`] in document order.

use super::matcher::{seek_sequence, Fuzz};
use super::{Hunk, HunkLine, PatchAction, PatchFs};
use crate::error::{MissingKind, PatchError};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Delete,
    Update,
}

/// The resolved effect of one action on one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub kind: ChangeKind,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
    pub move_path: Option<String>,
}

/// Ordered per-path changes, keyed by the path as written in the document.
///
/// Backed by a `Vec` rather than a map: a Delete followed by an Add of the
/// same path is two entries that must run in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Commit {
    changes: Vec<(String, FileChange)>,
}

impl Commit {
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileChange)> {
        self.changes.iter().map(|(path, change)| (path.as_str(), change))
    }

    /// The first change recorded for `path`.
    pub fn get(&self, path: &str) -> Option<&FileChange> {
        self.changes
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, change)| change)
    }

    fn push(&mut self, path: &str, change: FileChange) {
        self.changes.push((path.to_string(), change));
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Resolve every action against `originals`.
pub fn patch_to_commit(
    actions: &[PatchAction],
    originals: &HashMap<String, String>,
) -> Result<Commit, PatchError> {
    let mut commit = Commit::default();

    for action in actions {
        match action {
            PatchAction::Add { path, content } => commit.push(
                path,
                FileChange {
                    kind: ChangeKind::Add,
                    old_content: None,
                    new_content: Some(content.clone()),
                    move_path: None,
                },
            ),
            PatchAction::Delete { path } => {
                let old = original(originals, path)?;
                commit.push(
                    path,
                    FileChange {
                        kind: ChangeKind::Delete,
                        old_content: Some(old.to_string()),
                        new_content: None,
                        move_path: None,
                    },
                );
            }
            PatchAction::Update {
                path,
                move_path,
                hunks,
            } => {
                let old = original(originals, path)?;
                let new = apply_hunks(path, old, hunks)?;
                commit.push(
                    path,
                    FileChange {
                        kind: ChangeKind::Update,
                        old_content: Some(old.to_string()),
                        new_content: Some(new),
                        move_path: move_path.clone(),
                    },
                );
            }
        }
    }

    Ok(commit)
}

fn original<'a>(originals: &'a HashMap<String, String>, path: &str) -> Result<&'a str, PatchError> {
    originals
        .get(path)
        .map(String::as_str)
        .ok_or_else(|| PatchError::MissingFile {
            path: path.to_string(),
            kind: MissingKind::NotFound,
        })
}

/// Rewrite `original` hunk by hunk.
///
/// The cursor only moves forward. Context lines keep the original's text so
/// a whitespace-fuzzy match never rewrites indentation it did not touch.
fn apply_hunks(path: &str, original: &str, hunks: &[Hunk]) -> Result<String, PatchError> {
    let lines: Vec<&str> = original.split('\n').collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut cursor = 0;
    let mut fuzzy = 0;

    for (index, hunk) in hunks.iter().enumerate() {
        if let Some(anchor) = &hunk.anchor {
            match find_anchor(&lines, anchor, cursor) {
                Some(at) => {
                    out.extend_from_slice(&lines[cursor..=at]);
                    cursor = at + 1;
                }
                None => log::debug!("{path}: anchor '{anchor}' not found, searching from line {cursor}"),
            }
        }

        let old = hunk.old_lines();
        let (at, fuzz) = seek_sequence(&lines, &old, cursor, hunk.end_of_file).ok_or_else(|| {
            PatchError::ContextNotFound {
                path: path.to_string(),
                hunk: index + 1,
                context: old.join("\n"),
            }
        })?;
        if fuzz != Fuzz::Exact {
            fuzzy += 1;
        }

        out.extend_from_slice(&lines[cursor..at]);
        let mut source = at;
        for line in &hunk.lines {
            match line {
                HunkLine::Context(_) => {
                    out.push(lines[source]);
                    source += 1;
                }
                HunkLine::Removed(_) => source += 1,
                HunkLine::Added(text) => out.push(text.as_str()),
            }
        }
        cursor = source;
    }

    out.extend_from_slice(&lines[cursor..]);
    if fuzzy > 0 {
        log::debug!("{path}: {fuzzy} hunk(s) matched with whitespace fuzz");
    }
    Ok(out.join("\n"))
}

fn find_anchor(lines: &[&str], anchor: &str, start: usize) -> Option<usize> {
    let tail = lines.get(start..)?;
    tail.iter()
        .position(|line| *line == anchor)
        .or_else(|| tail.iter().position(|line| line.trim() == anchor.trim()))
        .map(|offset| start + offset)
}

// ============================================================================
// APPLICATION
// ============================================================================

/// Replay `commit` through `fs`, stopping at the first failure.
///
/// An Update with a move target writes only to the target; the source path
/// is left in place.
pub fn apply_commit<F: PatchFs + ?Sized>(commit: &Commit, fs: &mut F) -> Result<(), PatchError> {
    for (path, change) in commit.iter() {
        let content = change.new_content.as_deref().unwrap_or_default();
        match change.kind {
            ChangeKind::Add => {
                if fs.exists(path)? {
                    return Err(PatchError::AlreadyExists(path.to_string()));
                }
                fs.write(path, content)?;
            }
            ChangeKind::Delete => fs.remove(path)?,
            ChangeKind::Update => {
                let target = change.move_path.as_deref().unwrap_or(path);
                fs.write(target, content)?;
            }
        }
    }
    Ok(())
}
