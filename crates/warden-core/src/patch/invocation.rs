//! Recognizing `apply_patch` inside a shell tool call.
//!
//! Agents often emit patches as shell commands rather than calling the patch
//! entry point directly. The accepted shapes are:
//!
//! - `["apply_patch", "<patch>"]` (or `applypatch`)
//! - `["apply_patch", "<<EOF\n<patch>\nEOF"]`
//! - `["bash", "-lc", "apply_patch <<'EOF'\n<patch>\nEOF"]`
//! - `["bash", "-lc", "cd <dir> && apply_patch <<'EOF'\n<patch>\nEOF"]`
//! - `["bash", "-lc", "apply_patch '<patch>'"]`

use regex::Regex;
use std::sync::LazyLock;

const PROGRAMS: [&str; 2] = ["apply_patch", "applypatch"];

static HEREDOC_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:cd\s+(\S+)\s+&&\s+)?(?:apply_patch|applypatch)\s+<<\s*'?([^'\s]+)'?\s*$")
        .unwrap()
});

static BARE_HEREDOC_HEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<<\s*'?([^'\s]+)'?\s*$").unwrap());

/// A shell command that turned out to be a patch application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyPatchInvocation {
    pub patch: String,
    /// Directory from a leading `cd <dir> &&`, relative to the workspace.
    pub workdir: Option<String>,
}

/// Detect whether `argv` is an `apply_patch` invocation and extract the body.
pub fn maybe_parse_apply_patch_command<S: AsRef<str>>(argv: &[S]) -> Option<ApplyPatchInvocation> {
    let argv: Vec<&str> = argv.iter().map(|arg| arg.as_ref()).collect();

    match argv.as_slice() {
        [program, body, ..] if PROGRAMS.contains(program) => {
            let patch = split_heredoc(body, &BARE_HEREDOC_HEAD)
                .map(|(_, body)| body)
                .unwrap_or(*body);
            Some(ApplyPatchInvocation {
                patch: patch.to_string(),
                workdir: None,
            })
        }
        ["bash", "-lc" | "-c", script] => parse_bash_script(script),
        _ => None,
    }
}

fn parse_bash_script(script: &str) -> Option<ApplyPatchInvocation> {
    if let Some((head, body)) = split_heredoc(script, &HEREDOC_HEAD) {
        return Some(ApplyPatchInvocation {
            patch: body.to_string(),
            workdir: head.get(1).map(|dir| dir.as_str().to_string()),
        });
    }

    // `apply_patch '<patch>'`: exactly one quoted argument.
    let words = shlex::split(script)?;
    match words.as_slice() {
        [program, body] if PROGRAMS.contains(&program.as_str()) && !body.starts_with("<<") => {
            Some(ApplyPatchInvocation {
                patch: body.clone(),
                workdir: None,
            })
        }
        _ => None,
    }
}

/// Split `text` into a heredoc header (matched by `head`, delimiter in its
/// last capture group), body, and a closing line equal to the delimiter.
fn split_heredoc<'t>(text: &'t str, head: &Regex) -> Option<(regex::Captures<'t>, &'t str)> {
    let text = text.trim_end();
    let first_newline = text.find('\n')?;
    let last_newline = text.rfind('\n')?;
    if last_newline <= first_newline {
        return None;
    }

    let captures = head.captures(&text[..first_newline])?;
    let delimiter = captures.get(captures.len() - 1)?.as_str();
    if text[last_newline + 1..].trim_end() != delimiter {
        return None;
    }

    Some((captures, &text[first_newline + 1..last_newline]))
}
