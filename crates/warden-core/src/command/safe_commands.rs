//! Program allowlists.

use std::collections::HashSet;
use std::sync::LazyLock;

/// Programs allowed with any arguments.
///
/// These are read-only or only create/inspect files inside the current
/// directory, and none of them can run another program.
pub static SAFE_PROGRAMS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        // Navigation / inspection
        "ls",
        "pwd",
        "cd",
        "tree",
        "stat",
        "file",
        "du",
        "df",
        "which",
        "whoami",
        "date",
        "basename",
        "dirname",
        "realpath",
        // Output
        "echo",
        "printf",
        "true",
        "false",
        "test",
        // File creation
        "mkdir",
        "touch",
        // Text processing
        "cat",
        "head",
        "tail",
        "wc",
        "sort",
        "uniq",
        "grep",
        "cut",
        "tr",
        "nl",
        "diff",
        "jq",
    ]
    .into_iter()
    .collect()
});

/// Build tools and linters: every subcommand is allowed.
pub static BUILD_TOOLS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "cargo", "uv", "go", "ruff", "pyright", "make", "isort", "npm", "pnpm", "bun",
    ]
    .into_iter()
    .collect()
});

/// Git subcommands that only touch the local repository.
pub static GIT_LOCAL_SUBCOMMANDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "add",
        "blame",
        "branch",
        "cat-file",
        "checkout",
        "cherry-pick",
        "commit",
        "config",
        "describe",
        "diff",
        "grep",
        "init",
        "log",
        "ls-files",
        "ls-tree",
        "merge",
        "merge-base",
        "mv",
        "rebase",
        "reflog",
        "reset",
        "restore",
        "rev-list",
        "rev-parse",
        "revert",
        "rm",
        "shortlog",
        "show",
        "stash",
        "status",
        "switch",
        "symbolic-ref",
        "tag",
        "worktree",
    ]
    .into_iter()
    .collect()
});

/// Git subcommands that talk to (or reconfigure) a remote.
pub static GIT_REMOTE_SUBCOMMANDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "push",
        "pull",
        "fetch",
        "clone",
        "remote",
        "ls-remote",
        "submodule",
        "send-email",
        "request-pull",
        "svn",
        "p4",
    ]
    .into_iter()
    .collect()
});

/// Default programs that may read a `<<` heredoc.
pub const DEFAULT_HEREDOC_CONSUMERS: [&str; 3] = ["cat", "apply_patch", "applypatch"];
