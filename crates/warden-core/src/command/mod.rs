//! Shell command vetting.
//!
//! # Overview
//!
//! [`check_command`] decides whether an agent-proposed command line may run
//! without asking the user. The line is tokenized into simple commands
//! ([`tokenize`]), and each one is looked up in a program table
//! ([`CommandPolicy`]):
//!
//! - read-only tools and build tools are allowed with any arguments
//! - `find`, `fd`, `rg`, `git`, `sed`, `awk`, `rm` and `trash` are allowed
//!   when their arguments pass a per-program rule
//! - everything else is denied
//!
//! Constructs whose effect can't be read off the text (subshells, command
//! substitution, backgrounding) make the whole line unsafe. Every outcome
//! is a [`PolicyVerdict`]; malformed input is an unsafe verdict, never an
//! error.

mod bash_lc;
mod policy;
mod rules;
mod safe_commands;
mod tokenizer;

pub use bash_lc::strip_bash_lc;
pub use policy::{CommandPolicy, PolicyVerdict};
pub use safe_commands::{
    BUILD_TOOLS, DEFAULT_HEREDOC_CONSUMERS, GIT_LOCAL_SUBCOMMANDS, GIT_REMOTE_SUBCOMMANDS,
    SAFE_PROGRAMS,
};
pub use tokenizer::{
    tokenize, CommandSequence, ControlOp, RedirectKind, Redirection, SimpleCommand, TokenizeError,
};

/// Vet a full command line.
pub fn check_command(line: &str, policy: &CommandPolicy) -> PolicyVerdict {
    let script = strip_bash_lc(line);
    let verdict = match tokenize(&script) {
        Ok(sequence) => policy.evaluate_sequence(&sequence),
        Err(e) => PolicyVerdict::unsafe_because(e.to_string()),
    };
    if !verdict.is_safe {
        log::info!("Rejected command {:?}: {}", line, verdict.error_msg);
    }
    verdict
}
