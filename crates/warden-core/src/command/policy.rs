//! Program policy table and sequence evaluation.

use super::rules;
use super::safe_commands::{BUILD_TOOLS, DEFAULT_HEREDOC_CONSUMERS, SAFE_PROGRAMS};
use super::tokenizer::{CommandSequence, RedirectKind, SimpleCommand};
use crate::sandbox::WorkspaceSandbox;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// Result of vetting a command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyVerdict {
    pub is_safe: bool,
    /// Empty when safe; otherwise the first violation found.
    pub error_msg: String,
}

impl PolicyVerdict {
    pub fn safe() -> Self {
        Self {
            is_safe: true,
            error_msg: String::new(),
        }
    }

    pub fn unsafe_because(reason: impl Into<String>) -> Self {
        Self {
            is_safe: false,
            error_msg: reason.into(),
        }
    }
}

/// How a program's arguments are vetted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProgramRule {
    /// No argument inspection.
    Allow,
    Find,
    Fd,
    Rg,
    Git,
    Sed,
    Awk,
    Rm,
    Trash,
    /// The patch tool itself. Hosts route it to the patch engine, which
    /// applies its own sandbox.
    ApplyPatch,
}

static POLICY_TABLE: LazyLock<HashMap<&'static str, ProgramRule>> = LazyLock::new(|| {
    let mut table: HashMap<&'static str, ProgramRule> = SAFE_PROGRAMS
        .iter()
        .chain(BUILD_TOOLS.iter())
        .map(|program| (*program, ProgramRule::Allow))
        .collect();
    table.extend([
        ("find", ProgramRule::Find),
        ("fd", ProgramRule::Fd),
        ("rg", ProgramRule::Rg),
        ("git", ProgramRule::Git),
        ("sed", ProgramRule::Sed),
        ("awk", ProgramRule::Awk),
        ("rm", ProgramRule::Rm),
        ("trash", ProgramRule::Trash),
        ("apply_patch", ProgramRule::ApplyPatch),
        ("applypatch", ProgramRule::ApplyPatch),
    ]);
    table
});

/// Evaluates tokenized commands against the program table.
///
/// Holds the workspace sandbox for path operands (`rm`, `find`, `git -C`)
/// and the programs allowed to read a heredoc.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    sandbox: WorkspaceSandbox,
    heredoc_consumers: HashSet<String>,
}

impl CommandPolicy {
    pub fn new<I, S>(sandbox: WorkspaceSandbox, heredoc_consumers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sandbox,
            heredoc_consumers: heredoc_consumers.into_iter().map(Into::into).collect(),
        }
    }

    /// Policy with the default heredoc consumers.
    pub fn with_defaults(sandbox: WorkspaceSandbox) -> Self {
        Self::new(sandbox, DEFAULT_HEREDOC_CONSUMERS)
    }

    pub fn sandbox(&self) -> &WorkspaceSandbox {
        &self.sandbox
    }

    /// Left to right; the first unsafe command decides the verdict.
    pub fn evaluate_sequence(&self, sequence: &CommandSequence) -> PolicyVerdict {
        for (_, command) in sequence {
            if let Err(reason) = self.evaluate_command(command) {
                return PolicyVerdict::unsafe_because(reason);
            }
        }
        PolicyVerdict::safe()
    }

    pub fn evaluate_command(&self, command: &SimpleCommand) -> Result<(), String> {
        let program = command.program.as_str();

        for redirect in &command.redirections {
            match redirect.kind {
                RedirectKind::DupFd => {}
                RedirectKind::Heredoc | RedirectKind::HereString => {
                    if !self.heredoc_consumers.contains(program) {
                        return Err(format!("heredoc input to '{program}' not allowed"));
                    }
                }
                _ => {
                    return Err(format!(
                        "redirection '{}' to '{}' not allowed",
                        redirect.operator, redirect.target
                    ))
                }
            }
        }

        let Some(rule) = POLICY_TABLE.get(program) else {
            return Err(format!("{program}: not in allowlist"));
        };

        let args = command.args.as_slice();
        match rule {
            ProgramRule::Allow => Ok(()),
            ProgramRule::Find => rules::check_find(args, &self.sandbox),
            ProgramRule::Fd => rules::check_fd(args),
            ProgramRule::Rg => rules::check_rg(args),
            ProgramRule::Git => rules::check_git(args, &self.sandbox),
            ProgramRule::Sed => rules::check_sed(args),
            ProgramRule::Awk => rules::check_awk(args),
            ProgramRule::Rm => rules::check_rm(args, &self.sandbox),
            ProgramRule::Trash => rules::check_trash(args, &self.sandbox),
            ProgramRule::ApplyPatch => rules::check_apply_patch(program, args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::tokenizer::tokenize;
    use tempfile::{tempdir, TempDir};

    fn policy() -> (TempDir, CommandPolicy) {
        let dir = tempdir().unwrap();
        let sandbox = WorkspaceSandbox::new(dir.path()).unwrap();
        (dir, CommandPolicy::with_defaults(sandbox))
    }

    fn verdict(policy: &CommandPolicy, line: &str) -> PolicyVerdict {
        policy.evaluate_sequence(&tokenize(line).unwrap())
    }

    #[test]
    fn unconditional_programs() {
        let (_dir, policy) = policy();
        for line in ["ls", "pwd", "echo hi", "mkdir -p out", "cargo test", "cat a.txt | wc -l"] {
            assert!(verdict(&policy, line).is_safe, "{line}");
        }
    }

    #[test]
    fn default_deny() {
        let (_dir, policy) = policy();
        let v = verdict(&policy, "python script.py");
        assert!(!v.is_safe);
        assert_eq!(v.error_msg, "python: not in allowlist");
    }

    #[test]
    fn first_violation_wins() {
        let (_dir, policy) = policy();
        let v = verdict(&policy, "ls && curl example.com && python x.py");
        assert_eq!(v.error_msg, "curl: not in allowlist");
    }

    #[test]
    fn rules_are_dispatched() {
        let (_dir, policy) = policy();
        assert!(verdict(&policy, "git status").is_safe);
        assert!(verdict(&policy, "git push").error_msg.contains("remote operation"));
        assert!(verdict(&policy, "rm -rf missing").error_msg.contains("does not exist"));
        assert!(verdict(&policy, "fd -x rm").error_msg.contains("command execution"));
        assert!(verdict(&policy, "awk '{print}' a.txt").is_safe);
    }

    mod redirections {
        use super::*;

        #[test]
        fn file_redirection_is_unsafe() {
            let (_dir, policy) = policy();
            let v = verdict(&policy, "echo hi > out.txt");
            assert!(!v.is_safe);
            assert!(v.error_msg.contains("redirection"));
            assert!(!verdict(&policy, "cat < in.txt").is_safe);
            assert!(!verdict(&policy, "ls &> all.log").is_safe);
        }

        #[test]
        fn descriptor_duplication_is_fine() {
            let (_dir, policy) = policy();
            assert!(verdict(&policy, "ls 2>&1").is_safe);
        }

        #[test]
        fn heredoc_consumers() {
            let (_dir, policy) = policy();
            assert!(verdict(&policy, "cat <<EOF\nhello\nEOF").is_safe);
            let v = verdict(&policy, "grep x <<EOF\nhello\nEOF");
            assert_eq!(v.error_msg, "heredoc input to 'grep' not allowed");
        }

        #[test]
        fn apply_patch_heredoc() {
            let (_dir, policy) = policy();
            let line = "apply_patch <<'EOF'\n*** Begin Patch\n*** Add File: a.txt\n+hi\n*** End Patch\nEOF";
            assert!(verdict(&policy, line).is_safe);
            assert!(verdict(&policy, "applypatch '*** Begin Patch\n*** End Patch'").is_safe);
            assert!(!verdict(&policy, "apply_patch a b").is_safe);
        }

        #[test]
        fn custom_consumers() {
            let dir = tempdir().unwrap();
            let sandbox = WorkspaceSandbox::new(dir.path()).unwrap();
            let policy = CommandPolicy::new(sandbox, ["grep"]);
            assert!(verdict(&policy, "grep x <<EOF\nhello\nEOF").is_safe);
            assert!(!verdict(&policy, "cat <<EOF\nhello\nEOF").is_safe);
        }
    }

    #[test]
    fn verdict_serializes_camel_case() {
        let json = serde_json::to_value(PolicyVerdict::unsafe_because("nope")).unwrap();
        assert_eq!(json, serde_json::json!({ "isSafe": false, "errorMsg": "nope" }));
    }
}
