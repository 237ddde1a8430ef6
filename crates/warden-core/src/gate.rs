//! The two public entry points, bound to one workspace.
//!
//! # Overview
//!
//! [`SafetyGate`] captures a workspace root and exposes:
//!
//! - [`SafetyGate::apply_patch`] - parse a patch document and apply it to
//!   files under the root, returning a confirmation and a unified diff
//! - [`SafetyGate::check_command`] - classify a shell command line as safe
//!   or unsafe
//!
//! Every file the patch engine touches goes through the gate's
//! [`WorkspaceSandbox`] first. Writes and deletes are reported to an
//! optional [`FileChangeSink`] (the session's mtime tracker, for example);
//! sink failures are logged and otherwise ignored.
//!
//! # Concurrency
//!
//! `apply_patch` does blocking I/O. Async callers should use
//! [`SafetyGate::apply_patch_async`]. Two patch applications touching the
//! same files are not serialized here; the caller owns that.

use crate::command::{check_command, CommandPolicy, PolicyVerdict};
use crate::config::GateConfig;
use crate::error::{MissingKind, PatchError};
use crate::patch::{commit_to_diff, process_patch, ApplyPatchInvocation, Commit, PatchFs};
use crate::sandbox::WorkspaceSandbox;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

/// Confirmation returned by a successful patch application.
pub const DONE: &str = "Done!";

/// Receives notice of every file the gate writes or removes.
pub trait FileChangeSink: Send + Sync {
    fn file_written(&self, path: &Path, modified: SystemTime) -> Result<(), String>;
    fn file_removed(&self, path: &Path) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    pub message: String,
    pub diff: String,
    pub commit: Commit,
}

#[derive(Clone)]
pub struct SafetyGate {
    policy: CommandPolicy,
    config: GateConfig,
    sink: Option<Arc<dyn FileChangeSink>>,
}

impl SafetyGate {
    /// Gate with default configuration rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, PatchError> {
        Self::with_config(root, GateConfig::default())
    }

    pub fn with_config(root: impl AsRef<Path>, config: GateConfig) -> Result<Self, PatchError> {
        let sandbox = WorkspaceSandbox::new(root)?;
        let policy = CommandPolicy::new(sandbox, config.heredoc_consumers.iter().cloned());
        Ok(Self {
            policy,
            config,
            sink: None,
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn FileChangeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn root(&self) -> &Path {
        self.sandbox().root()
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    fn sandbox(&self) -> &WorkspaceSandbox {
        self.policy.sandbox()
    }

    // ========================================================================
    // PATCHES
    // ========================================================================

    /// Apply a patch document to the workspace.
    ///
    /// The first failing file aborts the call. Files written before the
    /// failure stay written.
    pub fn apply_patch(&self, text: &str) -> Result<PatchOutcome, PatchError> {
        apply_in(self.sandbox(), self.sink.as_deref(), text)
    }

    /// Apply a patch recognized in a shell tool call, honoring its
    /// `cd <dir> &&` prefix.
    pub fn apply_invocation(
        &self,
        invocation: &ApplyPatchInvocation,
    ) -> Result<PatchOutcome, PatchError> {
        match &invocation.workdir {
            Some(dir) => {
                let sandbox = WorkspaceSandbox::new(self.sandbox().resolve(dir)?)?;
                apply_in(&sandbox, self.sink.as_deref(), &invocation.patch)
            }
            None => self.apply_patch(&invocation.patch),
        }
    }

    /// [`apply_patch`](Self::apply_patch) on tokio's blocking pool.
    pub async fn apply_patch_async(&self, text: String) -> Result<PatchOutcome, PatchError> {
        let gate = self.clone();
        tokio::task::spawn_blocking(move || gate.apply_patch(&text))
            .await
            .map_err(|e| PatchError::io("apply_patch task", io::Error::other(e)))?
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    pub fn check_command(&self, line: &str) -> PolicyVerdict {
        if self.config.unrestricted {
            log::debug!("Unrestricted mode, skipping checks for {:?}", line);
            return PolicyVerdict::safe();
        }
        check_command(line, &self.policy)
    }
}

fn apply_in(
    sandbox: &WorkspaceSandbox,
    sink: Option<&dyn FileChangeSink>,
    text: &str,
) -> Result<PatchOutcome, PatchError> {
    let mut fs = SandboxedFs { sandbox, sink };
    let commit = process_patch(text, &mut fs)?;
    log::info!(
        "Applied patch to {} file(s) under {}",
        commit.len(),
        sandbox.root().display()
    );
    Ok(PatchOutcome {
        message: DONE.to_string(),
        diff: commit_to_diff(&commit),
        commit,
    })
}

// ============================================================================
// SANDBOXED FILESYSTEM
// ============================================================================

/// Real filesystem access, every path resolved through the sandbox.
struct SandboxedFs<'a> {
    sandbox: &'a WorkspaceSandbox,
    sink: Option<&'a dyn FileChangeSink>,
}

fn missing(path: &str, kind: MissingKind) -> PatchError {
    PatchError::MissingFile {
        path: path.to_string(),
        kind,
    }
}

impl PatchFs for SandboxedFs<'_> {
    fn read(&mut self, path: &str) -> Result<String, PatchError> {
        let resolved = self.sandbox.resolve(path)?;
        if resolved.is_dir() {
            return Err(missing(path, MissingKind::Directory));
        }
        fs::read_to_string(&resolved).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => missing(path, MissingKind::NotFound),
            _ => PatchError::io(path, e),
        })
    }

    fn exists(&mut self, path: &str) -> Result<bool, PatchError> {
        let resolved = self.sandbox.resolve(path)?;
        resolved.try_exists().map_err(|e| PatchError::io(path, e))
    }

    fn write(&mut self, path: &str, content: &str) -> Result<(), PatchError> {
        let resolved = self.sandbox.resolve(path)?;
        if resolved.is_dir() {
            return Err(missing(path, MissingKind::Directory));
        }
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).map_err(|e| PatchError::io(path, e))?;
        }
        fs::write(&resolved, content).map_err(|e| PatchError::io(path, e))?;
        log::debug!("Wrote {}", resolved.display());

        if let Some(sink) = self.sink {
            let modified = fs::metadata(&resolved)
                .and_then(|meta| meta.modified())
                .unwrap_or_else(|_| SystemTime::now());
            if let Err(e) = sink.file_written(&resolved, modified) {
                log::warn!("Change sink failed for {}: {}", resolved.display(), e);
            }
        }
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<(), PatchError> {
        let resolved = self.sandbox.resolve(path)?;
        if resolved.is_dir() {
            return Err(missing(path, MissingKind::Directory));
        }
        fs::remove_file(&resolved).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => missing(path, MissingKind::NotFound),
            _ => PatchError::io(path, e),
        })?;
        log::debug!("Removed {}", resolved.display());

        if let Some(sink) = self.sink {
            if let Err(e) = sink.file_removed(&resolved) {
                log::warn!("Change sink failed for {}: {}", resolved.display(), e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    fn gate() -> (TempDir, SafetyGate) {
        let dir = tempdir().unwrap();
        let gate = SafetyGate::new(dir.path()).unwrap();
        (dir, gate)
    }

    fn patch(body: &str) -> String {
        format!("*** Begin Patch\n{body}\n*** End Patch")
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
        fail: bool,
    }

    impl FileChangeSink for RecordingSink {
        fn file_written(&self, path: &Path, _modified: SystemTime) -> Result<(), String> {
            let name = path.file_name().unwrap().to_string_lossy();
            self.events.lock().unwrap().push(format!("write {name}"));
            if self.fail {
                return Err("tracker offline".to_string());
            }
            Ok(())
        }

        fn file_removed(&self, path: &Path) -> Result<(), String> {
            let name = path.file_name().unwrap().to_string_lossy();
            self.events.lock().unwrap().push(format!("remove {name}"));
            if self.fail {
                return Err("tracker offline".to_string());
            }
            Ok(())
        }
    }

    mod patches {
        use super::*;

        #[test]
        fn add_file() {
            let (dir, gate) = gate();
            let outcome = gate
                .apply_patch(&patch("*** Add File: hello.txt\n+hello\n+world"))
                .unwrap();

            assert_eq!(outcome.message, "Done!");
            assert_eq!(
                fs::read_to_string(dir.path().join("hello.txt")).unwrap(),
                "hello\nworld"
            );
            assert!(outcome.diff.contains("+++ b/hello.txt"));
        }

        #[test]
        fn add_into_new_directory() {
            let (dir, gate) = gate();
            gate.apply_patch(&patch("*** Add File: a/b/c.txt\n+x")).unwrap();
            assert!(dir.path().join("a/b/c.txt").is_file());
        }

        #[test]
        fn update_file() {
            let (dir, gate) = gate();
            fs::write(dir.path().join("main.rs"), "fn main() {\n    old();\n}\n").unwrap();

            let outcome = gate
                .apply_patch(&patch(
                    "*** Update File: main.rs\n@@ fn main() {\n-    old();\n+    new();",
                ))
                .unwrap();

            assert_eq!(
                fs::read_to_string(dir.path().join("main.rs")).unwrap(),
                "fn main() {\n    new();\n}\n"
            );
            assert!(outcome.diff.contains("-    old();"));
            assert!(outcome.diff.contains("+    new();"));
        }

        #[test]
        fn delete_file() {
            let (dir, gate) = gate();
            fs::write(dir.path().join("gone.txt"), "bye\n").unwrap();
            gate.apply_patch(&patch("*** Delete File: gone.txt")).unwrap();
            assert!(!dir.path().join("gone.txt").exists());
        }

        #[test]
        fn move_keeps_source() {
            let (dir, gate) = gate();
            fs::write(dir.path().join("old.txt"), "a\n").unwrap();
            gate.apply_patch(&patch(
                "*** Update File: old.txt\n*** Move to: new.txt\n@@\n-a\n+b",
            ))
            .unwrap();

            assert_eq!(fs::read_to_string(dir.path().join("new.txt")).unwrap(), "b\n");
            assert_eq!(fs::read_to_string(dir.path().join("old.txt")).unwrap(), "a\n");
        }

        #[test]
        fn missing_update_target() {
            let (_dir, gate) = gate();
            let err = gate
                .apply_patch(&patch("*** Update File: nope.txt\n@@\n-a\n+b"))
                .unwrap_err();
            assert_eq!(err.to_string(), "Missing File: nope.txt");
        }

        #[test]
        fn directory_target() {
            let (dir, gate) = gate();
            fs::create_dir(dir.path().join("src")).unwrap();
            let err = gate.apply_patch(&patch("*** Delete File: src")).unwrap_err();
            assert!(matches!(
                err,
                PatchError::MissingFile {
                    kind: MissingKind::Directory,
                    ..
                }
            ));
        }

        #[test]
        fn add_over_existing_file() {
            let (dir, gate) = gate();
            fs::write(dir.path().join("a.txt"), "x").unwrap();
            let err = gate.apply_patch(&patch("*** Add File: a.txt\n+y")).unwrap_err();
            assert!(matches!(err, PatchError::AlreadyExists(_)));
            assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "x");
        }

        #[test]
        fn escapes_are_rejected() {
            let (dir, gate) = gate();
            for path in ["../evil.txt", "/tmp/evil.txt", "a/../../evil.txt"] {
                let err = gate
                    .apply_patch(&patch(&format!("*** Add File: {path}\n+x")))
                    .unwrap_err();
                assert!(matches!(err, PatchError::PathEscape { .. }), "{path}: {err}");
            }
            assert!(!dir.path().parent().unwrap().join("evil.txt").exists());
        }

        #[cfg(unix)]
        #[test]
        fn symlink_escape_is_rejected() {
            let (dir, gate) = gate();
            let outside = tempdir().unwrap();
            std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

            let err = gate
                .apply_patch(&patch("*** Add File: link/evil.txt\n+x"))
                .unwrap_err();
            assert!(matches!(err, PatchError::PathEscape { .. }));
            assert!(!outside.path().join("evil.txt").exists());
        }

        #[test]
        fn earlier_writes_are_not_rolled_back() {
            let (dir, gate) = gate();
            let err = gate
                .apply_patch(&patch(
                    "*** Add File: first.txt\n+1\n*** Delete File: missing.txt",
                ))
                .unwrap_err();
            // Missing inputs are detected before anything is written.
            assert!(matches!(err, PatchError::MissingFile { .. }));
            assert!(!dir.path().join("first.txt").exists());

            fs::write(dir.path().join("taken.txt"), "x").unwrap();
            gate.apply_patch(&patch(
                "*** Add File: first.txt\n+1\n*** Add File: taken.txt\n+2",
            ))
            .unwrap_err();
            assert!(dir.path().join("first.txt").exists());
        }

        #[test]
        fn invocation_with_workdir() {
            let (dir, gate) = gate();
            fs::create_dir(dir.path().join("pkg")).unwrap();
            let invocation = ApplyPatchInvocation {
                patch: patch("*** Add File: note.txt\n+hi"),
                workdir: Some("pkg".to_string()),
            };
            gate.apply_invocation(&invocation).unwrap();
            assert!(dir.path().join("pkg/note.txt").is_file());

            let escaping = ApplyPatchInvocation {
                patch: patch("*** Add File: note.txt\n+hi"),
                workdir: Some("..".to_string()),
            };
            assert!(gate.apply_invocation(&escaping).is_err());
        }
    }

    mod sink {
        use super::*;

        #[test]
        fn reports_writes_and_removals() {
            let dir = tempdir().unwrap();
            fs::write(dir.path().join("old.txt"), "x\n").unwrap();
            let sink = Arc::new(RecordingSink::default());
            let gate = SafetyGate::new(dir.path()).unwrap().with_sink(sink.clone());

            gate.apply_patch(&patch(
                "*** Delete File: old.txt\n*** Add File: new.txt\n+y",
            ))
            .unwrap();

            assert_eq!(
                *sink.events.lock().unwrap(),
                vec!["remove old.txt".to_string(), "write new.txt".to_string()]
            );
        }

        #[test]
        fn failures_do_not_abort() {
            let dir = tempdir().unwrap();
            let sink = Arc::new(RecordingSink {
                fail: true,
                ..RecordingSink::default()
            });
            let gate = SafetyGate::new(dir.path()).unwrap().with_sink(sink.clone());

            let outcome = gate.apply_patch(&patch("*** Add File: a.txt\n+a")).unwrap();
            assert_eq!(outcome.message, DONE);
            assert_eq!(sink.events.lock().unwrap().len(), 1);
        }

        #[test]
        fn written_path_is_resolved() {
            struct Paths(Mutex<Vec<PathBuf>>);
            impl FileChangeSink for Paths {
                fn file_written(&self, path: &Path, _: SystemTime) -> Result<(), String> {
                    self.0.lock().unwrap().push(path.to_path_buf());
                    Ok(())
                }
                fn file_removed(&self, _: &Path) -> Result<(), String> {
                    Ok(())
                }
            }

            let dir = tempdir().unwrap();
            let sink = Arc::new(Paths(Mutex::new(Vec::new())));
            let gate = SafetyGate::new(dir.path()).unwrap().with_sink(sink.clone());
            gate.apply_patch(&patch("*** Add File: ./x/../y.txt\n+a")).unwrap();

            let paths = sink.0.lock().unwrap();
            assert_eq!(paths.as_slice(), [gate.root().join("y.txt")]);
        }
    }

    mod commands {
        use super::*;

        #[test]
        fn delegates_to_policy() {
            let (_dir, gate) = gate();
            assert!(gate.check_command("ls -la").is_safe);
            assert!(!gate.check_command("curl example.com").is_safe);
        }

        #[test]
        fn unrestricted_allows_everything() {
            let dir = tempdir().unwrap();
            let config = GateConfig {
                unrestricted: true,
                ..GateConfig::default()
            };
            let gate = SafetyGate::with_config(dir.path(), config).unwrap();
            let verdict = gate.check_command("rm -rf /");
            assert!(verdict.is_safe);
            assert_eq!(verdict.error_msg, "");
        }

        #[test]
        fn configured_heredoc_consumers() {
            let dir = tempdir().unwrap();
            let config = GateConfig {
                heredoc_consumers: vec!["python".to_string()],
                ..GateConfig::default()
            };
            let gate = SafetyGate::with_config(dir.path(), config).unwrap();
            let verdict = gate.check_command("cat <<EOF\nhi\nEOF");
            assert_eq!(verdict.error_msg, "heredoc input to 'cat' not allowed");
        }
    }

    #[tokio::test]
    async fn async_offload() {
        let (dir, gate) = gate();
        let outcome = gate
            .apply_patch_async(patch("*** Add File: async.txt\n+ok"))
            .await
            .unwrap();
        assert_eq!(outcome.commit.len(), 1);
        assert!(dir.path().join("async.txt").is_file());
    }
}
