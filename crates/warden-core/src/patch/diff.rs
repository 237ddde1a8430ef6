//! Unified diff rendering of a [`Commit`].
//!
//! Display only; nothing here feeds back into the mutation.

use super::commit::{ChangeKind, Commit, FileChange};
use similar::TextDiff;

const CONTEXT_RADIUS: usize = 3;
const DEV_NULL: &str = "/dev/null";

/// Render every change in `commit`, one git-style chunk per file.
pub fn commit_to_diff(commit: &Commit) -> String {
    let chunks: Vec<String> = commit
        .iter()
        .map(|(path, change)| render_change(path, change))
        .collect();
    if chunks.is_empty() {
        return String::new();
    }
    let mut out = chunks.join("\n\n");
    out.push('\n');
    out
}

fn render_change(path: &str, change: &FileChange) -> String {
    let old = change.old_content.as_deref().unwrap_or_default();
    let new = change.new_content.as_deref().unwrap_or_default();
    let target = change.move_path.as_deref().unwrap_or(path);

    let mut preamble = vec![format!("diff --git a/{path} b/{target}")];
    let (from, to) = match change.kind {
        ChangeKind::Add => {
            preamble.push("new file mode 100644".to_string());
            (DEV_NULL.to_string(), format!("b/{path}"))
        }
        ChangeKind::Delete => {
            preamble.push("deleted file mode 100644".to_string());
            (format!("a/{path}"), DEV_NULL.to_string())
        }
        ChangeKind::Update => {
            if target != path {
                preamble.push(format!("rename from {path}"));
                preamble.push(format!("rename to {target}"));
            }
            (format!("a/{path}"), format!("b/{target}"))
        }
    };

    let body = unified(old, new, &from, &to);
    let mut chunk = preamble.join("\n");
    chunk.push('\n');
    chunk.push_str(body.trim_end_matches('\n'));
    chunk
}

/// Unified diff of `old` -> `new`; a bare header pair when they are identical.
fn unified(old: &str, new: &str, from: &str, to: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let text = diff
        .unified_diff()
        .context_radius(CONTEXT_RADIUS)
        .header(from, to)
        .to_string();
    if text.is_empty() {
        format!("--- {from}\n+++ {to}\n")
    } else {
        text
    }
}
