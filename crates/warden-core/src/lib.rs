//! # warden-core
//!
//! Safety gate between an AI coding agent and the workspace it edits.
//!
//! This crate is framework-agnostic and can be used by:
//! - The `warden` CLI
//! - An agent host that wants to vet tool calls before running them
//!
//! ## Key Concepts
//!
//! - **Patch document**: `*** Begin Patch` ... `*** End Patch` text describing
//!   file adds, deletes, updates and moves
//! - **Commit**: the resolved per-file changes a patch produces
//! - **Sandbox**: every path is resolved against the workspace root and
//!   rejected if it is absolute or escapes it (including through symlinks)
//! - **Policy verdict**: whether a shell command line is safe to auto-run,
//!   with the reason when it isn't

pub mod command;
pub mod config;
pub mod error;
pub mod gate;
pub mod patch;
pub mod sandbox;

// Re-export commonly used types
pub use command::{check_command, CommandPolicy, PolicyVerdict};
pub use config::{
    ensure_outside_workspace, load_config, save_config, ConfigError, GateConfig,
};
pub use error::{MissingKind, PatchError};
pub use gate::{FileChangeSink, PatchOutcome, SafetyGate};
pub use patch::{maybe_parse_apply_patch_command, ApplyPatchInvocation, Commit};
pub use sandbox::WorkspaceSandbox;
