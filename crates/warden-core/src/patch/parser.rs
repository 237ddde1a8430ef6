//! Patch document parsing.
//!
//! The document is line oriented. Recognized headers:
//!
//! | Header | Body |
//! |--------|------|
//! | `*** Add File: <path>` | lines prefixed with `+` |
//! | `*** Delete File: <path>` | none |
//! | `*** Update File: <path>` | optional `*** Move to: <path>`, then hunks |
//!
//! A hunk starts with an optional `@@` / `@@ <signature>` line (optional only
//! for the first hunk of a file) and holds lines prefixed with a space
//! (context), `-` (removed) or `+` (added). It ends at the next `@@`, the next
//! header, `*** End of File`, or `*** End Patch`.

use super::{Hunk, HunkLine, PatchAction};
use crate::error::{MissingKind, PatchError};
use std::collections::{HashMap, HashSet};

pub const BEGIN_PATCH: &str = "*** Begin Patch";
pub const END_PATCH: &str = "*** End Patch";
pub const ADD_FILE: &str = "*** Add File: ";
pub const DELETE_FILE: &str = "*** Delete File: ";
pub const UPDATE_FILE: &str = "*** Update File: ";
pub const MOVE_TO: &str = "*** Move to: ";
pub const END_OF_FILE: &str = "*** End of File";

/// Fail unless `text` starts (after leading whitespace) with `*** Begin Patch`.
pub fn ensure_patch_start(text: &str) -> Result<(), PatchError> {
    if text.trim_start().starts_with(BEGIN_PATCH) {
        Ok(())
    } else {
        Err(PatchError::format(format!(
            "apply_patch content must start with {BEGIN_PATCH}"
        )))
    }
}

/// Paths named by Update and Delete headers, in document order.
///
/// These are the files whose original content must be supplied before
/// hunks can be resolved.
pub fn identify_files_needed(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.trim()
        .lines()
        .filter_map(|line| {
            line.strip_prefix(UPDATE_FILE)
                .or_else(|| line.strip_prefix(DELETE_FILE))
        })
        .map(|path| path.trim().to_string())
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

/// Parse `text` and validate it against the supplied original contents.
///
/// Validation rules:
/// - every Update/Delete path must be present in `originals`
/// - a path may be the target of at most one Update/Delete and one Add
/// - an Add may only target a supplied path after an earlier Delete of it
pub fn text_to_patch(
    text: &str,
    originals: &HashMap<String, String>,
) -> Result<Vec<PatchAction>, PatchError> {
    let actions = parse_patch(text)?;

    let mut modified: HashSet<&str> = HashSet::new();
    let mut added: HashSet<&str> = HashSet::new();
    let mut deleted: HashSet<&str> = HashSet::new();

    for action in &actions {
        match action {
            PatchAction::Update { path, .. } | PatchAction::Delete { path } => {
                if !modified.insert(path.as_str()) || added.contains(path.as_str()) {
                    return Err(PatchError::format(format!("Duplicate Path: {path}")));
                }
                if !originals.contains_key(path) {
                    return Err(PatchError::MissingFile {
                        path: path.clone(),
                        kind: MissingKind::NotFound,
                    });
                }
                if matches!(action, PatchAction::Delete { .. }) {
                    deleted.insert(path.as_str());
                }
            }
            PatchAction::Add { path, .. } => {
                if !added.insert(path.as_str()) {
                    return Err(PatchError::format(format!("Duplicate Path: {path}")));
                }
                if originals.contains_key(path) && !deleted.contains(path.as_str()) {
                    return Err(PatchError::AlreadyExists(path.clone()));
                }
            }
        }
    }

    log::debug!("parsed patch with {} action(s)", actions.len());
    Ok(actions)
}

/// Parse the document structure without consulting any file content.
pub fn parse_patch(text: &str) -> Result<Vec<PatchAction>, PatchError> {
    ensure_patch_start(text)?;

    let lines: Vec<&str> = text.trim().lines().collect();
    match lines.last() {
        Some(last) if last.trim_end() == END_PATCH => {}
        _ => {
            return Err(PatchError::format(format!(
                "Invalid patch text - missing {END_PATCH}"
            )))
        }
    }

    let mut parser = Parser { lines, index: 1 };
    parser.parse()
}

struct Parser<'a> {
    lines: Vec<&'a str>,
    index: usize,
}

impl<'a> Parser<'a> {
    fn parse(&mut self) -> Result<Vec<PatchAction>, PatchError> {
        let mut actions = Vec::new();

        while let Some(line) = self.current() {
            if line.trim_end() == END_PATCH {
                return Ok(actions);
            }

            if let Some(path) = line.strip_prefix(UPDATE_FILE) {
                let path = header_path(path, line)?;
                self.index += 1;
                let move_path = match self.current().and_then(|l| l.strip_prefix(MOVE_TO)) {
                    Some(target) => {
                        let target = header_path(target, MOVE_TO)?;
                        self.index += 1;
                        Some(target)
                    }
                    None => None,
                };
                let hunks = self.parse_hunks()?;
                actions.push(PatchAction::Update {
                    path,
                    move_path,
                    hunks,
                });
            } else if let Some(path) = line.strip_prefix(DELETE_FILE) {
                let path = header_path(path, line)?;
                self.index += 1;
                actions.push(PatchAction::Delete { path });
            } else if let Some(path) = line.strip_prefix(ADD_FILE) {
                let path = header_path(path, line)?;
                self.index += 1;
                let content = self.parse_add_body()?;
                actions.push(PatchAction::Add { path, content });
            } else {
                return Err(PatchError::format(format!("Unknown Line: {line}")));
            }
        }

        Err(PatchError::format("Missing End Patch"))
    }

    fn current(&self) -> Option<&'a str> {
        self.lines.get(self.index).copied()
    }

    fn parse_add_body(&mut self) -> Result<String, PatchError> {
        let mut body = Vec::new();
        while let Some(line) = self.current() {
            if is_section_boundary(line) {
                break;
            }
            match line.strip_prefix('+') {
                Some(content) => body.push(content),
                None => {
                    return Err(PatchError::format(format!("Invalid Add File Line: {line}")))
                }
            }
            self.index += 1;
        }
        Ok(body.join("\n"))
    }

    fn parse_hunks(&mut self) -> Result<Vec<Hunk>, PatchError> {
        let mut hunks: Vec<Hunk> = Vec::new();

        while let Some(line) = self.current() {
            if is_section_boundary(line) {
                break;
            }

            let mut hunk = Hunk::default();
            if let Some(signature) = line.strip_prefix("@@ ") {
                let signature = signature.trim();
                if !signature.is_empty() {
                    hunk.anchor = Some(signature.to_string());
                }
                self.index += 1;
            } else if line.trim_end() == "@@" {
                self.index += 1;
            } else if !hunks.is_empty() {
                return Err(PatchError::format(format!("Invalid Line: {line}")));
            }

            self.parse_hunk_body(&mut hunk)?;
            hunks.push(hunk);
        }

        Ok(hunks)
    }

    fn parse_hunk_body(&mut self, hunk: &mut Hunk) -> Result<(), PatchError> {
        let start = self.index;

        while let Some(line) = self.current() {
            if line.starts_with("@@") || is_section_boundary(line) || line == END_OF_FILE {
                break;
            }
            if line == "***" {
                break;
            }
            if line.starts_with("***") {
                return Err(PatchError::format(format!("Invalid Line: {line}")));
            }

            // Editors strip the lone space from blank context lines.
            let parsed = match line.chars().next() {
                None => HunkLine::Context(String::new()),
                Some('+') => HunkLine::Added(line[1..].to_string()),
                Some('-') => HunkLine::Removed(line[1..].to_string()),
                Some(' ') => HunkLine::Context(line[1..].to_string()),
                Some(_) => return Err(PatchError::format(format!("Invalid Line: {line}"))),
            };
            hunk.lines.push(parsed);
            self.index += 1;
        }

        if self.current() == Some(END_OF_FILE) {
            self.index += 1;
            hunk.end_of_file = true;
        }

        if self.index == start {
            return Err(PatchError::format("Nothing in this section"));
        }
        Ok(())
    }
}

fn is_section_boundary(line: &str) -> bool {
    line.trim_end() == END_PATCH
        || line.starts_with(UPDATE_FILE)
        || line.starts_with(DELETE_FILE)
        || line.starts_with(ADD_FILE)
}

fn header_path(raw: &str, line: &str) -> Result<String, PatchError> {
    let path = raw.trim();
    if path.is_empty() {
        return Err(PatchError::format(format!("Missing path in header: {line}")));
    }
    Ok(path.to_string())
}
