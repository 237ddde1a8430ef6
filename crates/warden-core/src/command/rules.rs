//! Per-program argument rules.
//!
//! Each rule receives the arguments after the program name and returns the
//! reason for the first violation it finds. Path operands go through
//! [`WorkspaceSandbox::resolve`], the same check the patch engine uses.

use super::safe_commands::{GIT_LOCAL_SUBCOMMANDS, GIT_REMOTE_SUBCOMMANDS};
use crate::error::PatchError;
use crate::sandbox::WorkspaceSandbox;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub type RuleResult = Result<(), String>;

static SED_PRINT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+(,\d+)?p$").unwrap());
static SED_FLAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[gpiImM0-9]*$").unwrap());
static AWK_SYSTEM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bsystem\s*\(").unwrap());
static AWK_REDIRECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bprintf?\b[^;{}]*>").unwrap());

/// Resolve `path` through the sandbox, phrasing failures for `tool`.
fn contained(tool: &str, path: &str, sandbox: &WorkspaceSandbox) -> Result<PathBuf, String> {
    sandbox.resolve(path).map_err(|err| match err {
        PatchError::PathEscape { reason, .. } => {
            format!("{tool}: {}: '{path}'", reason.to_lowercase())
        }
        other => format!("{tool}: cannot resolve '{path}': {other}"),
    })
}

// ============================================================================
// SEARCH TOOLS
// ============================================================================

const FIND_UNSAFE: [(&str, &str); 9] = [
    ("-exec", "command execution"),
    ("-execdir", "command execution"),
    ("-ok", "interactive command execution"),
    ("-okdir", "interactive command execution"),
    ("-delete", "file deletion"),
    ("-fls", "file output"),
    ("-fprint", "file output"),
    ("-fprint0", "file output"),
    ("-fprintf", "formatted file output"),
];

pub fn check_find(args: &[String], sandbox: &WorkspaceSandbox) -> RuleResult {
    for arg in args {
        if let Some((_, what)) = FIND_UNSAFE.iter().find(|(opt, _)| arg.as_str() == *opt) {
            return Err(format!("find: {what} option '{arg}' not allowed"));
        }
    }

    // Starting points come before the first expression token.
    for start in args
        .iter()
        .take_while(|a| !a.starts_with('-') && !a.starts_with('(') && !a.starts_with('!'))
    {
        contained("find", start, sandbox)?;
    }
    Ok(())
}

pub fn check_fd(args: &[String]) -> RuleResult {
    for arg in args {
        let a = arg.as_str();
        let what = match a {
            "-x" | "--exec" => "command execution",
            "-X" | "--exec-batch" => "batch command execution",
            _ if a.starts_with("--exec-batch=") => "batch command execution",
            _ if a.starts_with("--exec=") => "command execution",
            // Clustered short flags such as `-Hx`.
            _ if is_short_cluster(a) && a.contains(&['x', 'X'][..]) => "command execution",
            _ => continue,
        };
        return Err(format!("fd: {what} option '{a}' not allowed"));
    }
    Ok(())
}

pub fn check_rg(args: &[String]) -> RuleResult {
    for arg in args {
        let a = arg.as_str();
        let what = if a == "--search-zip" || a == "-z" || (is_short_cluster(a) && a.contains('z'))
        {
            "compressed file search"
        } else if a == "--pre" || a.starts_with("--pre=") {
            "preprocessor command"
        } else if a == "--hostname-bin" || a.starts_with("--hostname-bin=") {
            "hostname command"
        } else {
            continue;
        };
        return Err(format!("rg: {what} option '{a}' not allowed"));
    }
    Ok(())
}

/// `-abc`: a single dash followed by two or more letters.
fn is_short_cluster(arg: &str) -> bool {
    match arg.strip_prefix('-') {
        Some(flags) => flags.len() > 1 && flags.chars().all(|c| c.is_ascii_alphabetic()),
        None => false,
    }
}

// ============================================================================
// GIT
// ============================================================================

pub fn check_git(args: &[String], sandbox: &WorkspaceSandbox) -> RuleResult {
    let missing = || "git: missing subcommand".to_string();
    let mut rest = args.iter();

    let subcommand = loop {
        let arg = rest.next().ok_or_else(missing)?;
        match arg.as_str() {
            "" => return Err(missing()),
            "-C" | "--git-dir" | "--work-tree" => {
                let dir = rest
                    .next()
                    .ok_or_else(|| format!("git: missing value for '{arg}'"))?;
                contained("git", dir, sandbox)?;
            }
            "--namespace" => {
                rest.next();
            }
            // Config overrides can name programs git will run (core.pager, alias.*).
            "-c" | "--config-env" => {
                return Err(format!("git: configuration override '{arg}' not allowed"))
            }
            a if a.starts_with("--config-env=") || a.starts_with("--exec-path=") => {
                return Err(format!("git: option '{a}' not allowed"))
            }
            a if a.starts_with("--git-dir=") || a.starts_with("--work-tree=") => {
                if let Some((_, dir)) = a.split_once('=') {
                    contained("git", dir, sandbox)?;
                }
            }
            a if a.starts_with('-') => {}
            sub => break sub,
        }
    };

    if GIT_REMOTE_SUBCOMMANDS.contains(subcommand) {
        return Err(format!("git: remote operation '{subcommand}' not allowed"));
    }
    if !GIT_LOCAL_SUBCOMMANDS.contains(subcommand) {
        return Err(format!("git: subcommand '{subcommand}' not in allow list"));
    }

    let sub_args: Vec<&str> = rest.map(String::as_str).collect();
    if let Some(a) = sub_args
        .iter()
        .find(|a| **a == "--output" || a.starts_with("--output="))
    {
        return Err(format!("git: output file option '{a}' not allowed"));
    }
    match subcommand {
        "config" => check_git_config(&sub_args),
        "rebase" => match sub_args.iter().find(|a| {
            matches!(**a, "-x" | "--exec")
                || a.starts_with("--exec=")
                || (is_short_cluster(a) && a.contains('x'))
        }) {
            Some(a) => Err(format!("git: rebase command execution option '{a}' not allowed")),
            None => Ok(()),
        },
        "grep" => match sub_args.iter().find(|a| {
            a.starts_with("-O") || a.starts_with("--open-files-in-pager")
        }) {
            Some(a) => Err(format!("git: grep pager option '{a}' not allowed")),
            None => Ok(()),
        },
        _ => Ok(()),
    }
}

const GIT_CONFIG_READS: [&str; 6] = [
    "--get",
    "--get-all",
    "--get-regexp",
    "--get-urlmatch",
    "-l",
    "--list",
];

const GIT_CONFIG_WRITES: [&str; 14] = [
    "--add",
    "--unset",
    "--unset-all",
    "--replace-all",
    "--rename-section",
    "--remove-section",
    "-e",
    "--edit",
    "set",
    "unset",
    "rename-section",
    "remove-section",
    "edit",
    "--edit-config",
];

/// Only `git config --get ...`, `--list` and the `get`/`list` forms.
///
/// Written keys such as `core.pager` or `alias.*` name programs git runs later.
fn check_git_config(args: &[&str]) -> RuleResult {
    if let Some(a) = args.iter().find(|a| GIT_CONFIG_WRITES.contains(*a)) {
        return Err(format!("git: config write '{a}' not allowed"));
    }
    let first_positional = args.iter().find(|a| !a.starts_with('-'));
    let reads = matches!(first_positional, Some(&"get" | &"list"))
        || args.iter().any(|a| GIT_CONFIG_READS.contains(a));
    if reads {
        Ok(())
    } else {
        Err("git: config writes not allowed (use --get or --list)".to_string())
    }
}

// ============================================================================
// SED
// ============================================================================

pub fn check_sed(args: &[String]) -> RuleResult {
    let mut scripts: Vec<&str> = Vec::new();
    let mut positionals: Vec<&str> = Vec::new();
    let mut explicit = false;
    let mut options_done = false;
    let mut rest = args.iter();

    while let Some(arg) = rest.next() {
        let a = arg.as_str();
        if options_done || !a.starts_with('-') || a == "-" {
            positionals.push(a);
            continue;
        }
        match a {
            "--" => options_done = true,
            "-e" | "--expression" => {
                let script = rest
                    .next()
                    .ok_or_else(|| format!("sed: missing script for '{a}'"))?;
                scripts.push(script);
                explicit = true;
            }
            _ if a.starts_with("--expression=") => {
                scripts.push(&a["--expression=".len()..]);
                explicit = true;
            }
            "-f" | "--file" => return Err(format!("sed: script files ('{a}') not allowed")),
            _ if a.starts_with("--file=") => {
                return Err(format!("sed: script files ('{a}') not allowed"))
            }
            "-n" | "--quiet" | "--silent" | "-E" | "-r" | "--regexp-extended" | "-u"
            | "--unbuffered" | "-s" | "--separate" | "-z" | "--null-data" | "--posix" => {}
            _ if a.starts_with("-i") || a == "--in-place" || a.starts_with("--in-place=") => {}
            _ if a
                .strip_prefix('-')
                .is_some_and(|flags| flags.chars().all(|c| "nEursz".contains(c))) => {}
            _ => return Err(format!("sed: option '{a}' not allowed")),
        }
    }

    if !explicit {
        match positionals.first() {
            Some(script) => scripts.push(script),
            None => return Err("sed: missing script".to_string()),
        }
    }
    scripts.into_iter().try_for_each(check_sed_script)
}

fn check_sed_script(script: &str) -> RuleResult {
    if script.contains('`') {
        return Err(format!("sed: backticks not allowed in '{script}'"));
    }
    if script.contains("$(") {
        return Err(format!("sed: command substitution not allowed in '{script}'"));
    }
    if script.contains('\n') {
        return Err("sed: multi-line scripts not allowed".to_string());
    }
    if script.contains(';') {
        return Err(format!("sed: command separator ';' not allowed in '{script}'"));
    }
    if SED_PRINT.is_match(script) || is_simple_substitution(script) {
        return Ok(());
    }
    Err(format!(
        "sed: only text replacement (s/old/new/) or line printing (N,Mp) is allowed, got '{script}'"
    ))
}

/// `s<d>pattern<d>replacement<d>flags` with harmless flags only (no `e`, `w`).
fn is_simple_substitution(script: &str) -> bool {
    let mut chars = script.chars();
    if chars.next() != Some('s') {
        return false;
    }
    let Some(delim) = chars.next() else {
        return false;
    };
    if delim.is_alphanumeric() || delim.is_whitespace() || delim == '\\' {
        return false;
    }

    let body = &script[1 + delim.len_utf8()..];
    let mut closed = 0;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == delim {
            closed += 1;
            if closed == 2 {
                return SED_FLAGS.is_match(&body[i + c.len_utf8()..]);
            }
        }
    }
    false
}

// ============================================================================
// AWK
// ============================================================================

pub fn check_awk(args: &[String]) -> RuleResult {
    let mut program: Option<&str> = None;
    let mut options_done = false;
    let mut rest = args.iter();

    while let Some(arg) = rest.next() {
        let a = arg.as_str();
        if options_done || !a.starts_with('-') || a == "-" {
            if program.is_none() {
                check_awk_program(a)?;
                program = Some(a);
            }
            continue;
        }
        match a {
            "--" => options_done = true,
            "-f" | "--file" | "--source" => return Err("awk: -f/--file not allowed".to_string()),
            _ if a.starts_with("-f") || a.starts_with("--file=") || a.starts_with("--source=") => {
                return Err("awk: -f/--file not allowed".to_string())
            }
            "-E" | "--exec" | "-i" | "--include" | "-l" | "--load" => {
                return Err(format!("awk: option '{a}' loads external code"))
            }
            "-e" => {
                let text = rest
                    .next()
                    .ok_or_else(|| "awk: missing program for -e".to_string())?;
                check_awk_program(text)?;
                if program.is_none() {
                    program = Some(text.as_str());
                }
            }
            "-F" | "-v" | "--field-separator" | "--assign" => {
                rest.next();
            }
            _ => {}
        }
    }

    match program {
        Some(_) => Ok(()),
        None => Err("awk: missing program".to_string()),
    }
}

fn check_awk_program(program: &str) -> RuleResult {
    if program.contains('`') {
        return Err("awk: backticks not allowed in program".to_string());
    }
    if program.contains("$(") {
        return Err("awk: command substitution not allowed in program".to_string());
    }
    if program.contains("|&") {
        return Err("awk: coprocess pipeline not allowed in program".to_string());
    }
    if AWK_SYSTEM.is_match(program) {
        return Err("awk: system() call not allowed in program".to_string());
    }
    if has_awk_pipe(program) {
        return Err("awk: piping output to or from external commands not allowed".to_string());
    }
    if AWK_REDIRECT.is_match(program) {
        return Err("awk: output redirection not allowed in program".to_string());
    }
    Ok(())
}

/// A `|` outside string and regex literals that is not half of `||`.
fn has_awk_pipe(program: &str) -> bool {
    let chars: Vec<char> = program.chars().collect();
    let mut in_string = false;
    let mut in_regex = false;
    let mut previous: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string || in_regex {
            match c {
                '\\' => i += 1,
                '"' if in_string => in_string = false,
                '/' if in_regex => in_regex = false,
                _ => {}
            }
        } else {
            match c {
                '"' => in_string = true,
                // `/` opens a regex only where an operand is expected.
                '/' if previous.map_or(true, |p| "(,~!&|{};".contains(p)) => in_regex = true,
                '|' if chars.get(i + 1) == Some(&'|') => i += 1,
                '|' => return true,
                _ => {}
            }
        }
        if !c.is_whitespace() {
            previous = Some(c);
        }
        i += 1;
    }
    false
}

// ============================================================================
// PATCH TOOL
// ============================================================================

/// The patch arrives as one argument or on stdin through a heredoc.
pub fn check_apply_patch(program: &str, args: &[String]) -> RuleResult {
    if args.len() > 1 {
        return Err(format!("{program}: expected a single patch argument or heredoc"));
    }
    Ok(())
}

// ============================================================================
// DELETION
// ============================================================================

pub fn check_rm(args: &[String], sandbox: &WorkspaceSandbox) -> RuleResult {
    check_removal("rm", args, sandbox, true)
}

/// Like `rm`, but trashed files are recoverable so recursive targets are
/// not inspected.
pub fn check_trash(args: &[String], sandbox: &WorkspaceSandbox) -> RuleResult {
    check_removal("trash", args, sandbox, false)
}

fn check_removal(
    tool: &str,
    args: &[String],
    sandbox: &WorkspaceSandbox,
    inspect_recursive: bool,
) -> RuleResult {
    let mut recursive = false;
    let mut options_done = false;
    let mut operands: Vec<&str> = Vec::new();

    for arg in args {
        let a = arg.as_str();
        if !options_done && a == "--" {
            options_done = true;
        } else if !options_done && a.starts_with('-') && a != "-" {
            if a == "--recursive" || (!a.starts_with("--") && a.contains(&['r', 'R'][..])) {
                recursive = true;
            }
        } else {
            operands.push(a);
        }
    }

    for op in &operands {
        check_operand(tool, op, sandbox)?;
    }

    if recursive && inspect_recursive {
        for op in &operands {
            match sandbox.root().join(op).symlink_metadata() {
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(format!("{tool} -r: target does not exist: '{op}'"))
                }
                Err(e) => return Err(format!("{tool} -r: cannot inspect '{op}': {e}")),
                Ok(meta) if meta.file_type().is_symlink() => {
                    return Err(format!("{tool} -r: cannot delete symlink recursively: '{op}'"))
                }
                Ok(_) => {}
            }
        }
    }
    Ok(())
}

/// Lexical checks first, then containment.
fn check_operand(tool: &str, op: &str, sandbox: &WorkspaceSandbox) -> RuleResult {
    let pattern = if Path::new(op).is_absolute() {
        Some("absolute path")
    } else if op.starts_with('~') || op.contains("/~") {
        Some("tilde expansion")
    } else if op.contains(&['*', '?', '['][..]) {
        Some("wildcards")
    } else if op.ends_with('/') {
        Some("trailing slash")
    } else if op.contains('$') {
        Some("variable expansion")
    } else {
        None
    };
    if let Some(pattern) = pattern {
        return Err(format!("{tool}: {pattern} not allowed: '{op}'"));
    }

    let resolved = contained(tool, op, sandbox)?;
    if resolved == sandbox.root() {
        return Err(format!("{tool}: refusing to remove the workspace root: '{op}'"));
    }
    Ok(())
}
