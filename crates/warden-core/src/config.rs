//! Gate configuration persistence.
//!
//! # Overview
//!
//! Stored as `warden.json` in a config directory that must live outside the
//! workspace, so a patch can't rewrite the rules that vet it:
//!
//! ```json
//! {
//!   "unrestricted": false,
//!   "heredocConsumers": ["cat", "apply_patch", "applypatch"]
//! }
//! ```
//!
//! A missing file means defaults. Missing fields in an existing file also
//! fall back to their defaults.

use crate::command::DEFAULT_HEREDOC_CONSUMERS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE: &str = "warden.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateConfig {
    /// Report every command as safe without inspecting it.
    #[serde(default)]
    pub unrestricted: bool,

    /// Programs allowed to read a `<<` heredoc.
    #[serde(default = "default_heredoc_consumers")]
    pub heredoc_consumers: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            unrestricted: false,
            heredoc_consumers: default_heredoc_consumers(),
        }
    }
}

fn default_heredoc_consumers() -> Vec<String> {
    DEFAULT_HEREDOC_CONSUMERS.iter().map(|p| p.to_string()).collect()
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Config directory {path} is inside the workspace")]
    InsideWorkspace { path: PathBuf },
}

// ============================================================================
// FILE OPERATIONS
// ============================================================================

/// Load the config from `dir`, or defaults when no file exists.
///
/// # Errors
///
/// Only when the file exists but can't be read or parsed.
pub fn load_config(dir: &Path) -> Result<GateConfig, ConfigError> {
    let file_path = dir.join(CONFIG_FILE);
    if !file_path.exists() {
        log::debug!("No {} in {}, using defaults", CONFIG_FILE, dir.display());
        return Ok(GateConfig::default());
    }

    let contents = fs::read_to_string(&file_path).map_err(|source| ConfigError::Io {
        path: file_path.clone(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
        path: file_path,
        source,
    })
}

/// Reject a config directory that resolves into `workspace`.
///
/// Symlinks are followed for the part of `dir` that exists; the rest is
/// normalized lexically.
pub fn ensure_outside_workspace(dir: &Path, workspace: &Path) -> Result<(), ConfigError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ConfigError::Io { path, source }
    };

    let root = fs::canonicalize(workspace).map_err(io_err(workspace))?;
    let resolved = resolve_existing_prefix(dir).map_err(io_err(dir))?;
    if resolved.starts_with(&root) {
        return Err(ConfigError::InsideWorkspace {
            path: dir.to_path_buf(),
        });
    }
    Ok(())
}

fn resolve_existing_prefix(dir: &Path) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(dir)?;
    for ancestor in absolute.ancestors() {
        let Ok(mut resolved) = fs::canonicalize(ancestor) else {
            continue;
        };
        let rest = absolute.strip_prefix(ancestor).unwrap_or(Path::new(""));
        for component in rest.components() {
            match component {
                Component::ParentDir => {
                    resolved.pop();
                }
                Component::Normal(part) => resolved.push(part),
                _ => {}
            }
        }
        return Ok(resolved);
    }
    Err(io::Error::new(io::ErrorKind::NotFound, "no existing ancestor"))
}

/// Save the config to `dir` as pretty JSON.
///
/// Writes `warden.json.tmp` first and renames it over the real file.
pub fn save_config(dir: &Path, config: &GateConfig) -> Result<(), ConfigError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ConfigError::Io { path, source }
    };

    fs::create_dir_all(dir).map_err(io_err(dir))?;

    let file_path = dir.join(CONFIG_FILE);
    let temp_path = dir.join(format!("{CONFIG_FILE}.tmp"));

    let json = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Json {
        path: file_path.clone(),
        source,
    })?;
    fs::write(&temp_path, json).map_err(io_err(&temp_path))?;
    fs::rename(&temp_path, &file_path).map_err(io_err(&file_path))?;

    log::debug!("Saved config to {}", file_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config, GateConfig::default());
        assert!(!config.unrestricted);
        assert_eq!(config.heredoc_consumers, ["cat", "apply_patch", "applypatch"]);
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let config = GateConfig {
            unrestricted: true,
            heredoc_consumers: vec!["cat".to_string()],
        };
        save_config(dir.path(), &config).unwrap();

        assert!(dir.path().join(CONFIG_FILE).exists());
        assert!(!dir.path().join("warden.json.tmp").exists());
        assert_eq!(load_config(dir.path()).unwrap(), config);
    }

    #[test]
    fn save_creates_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b");
        save_config(&nested, &GateConfig::default()).unwrap();
        assert!(nested.join(CONFIG_FILE).exists());
    }

    #[test]
    fn uses_camel_case_keys() {
        let dir = tempdir().unwrap();
        save_config(dir.path(), &GateConfig::default()).unwrap();
        let raw = fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap();
        assert!(raw.contains("\"heredocConsumers\""));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{"unrestricted": true}"#).unwrap();
        let config = load_config(dir.path()).unwrap();
        assert!(config.unrestricted);
        assert_eq!(config.heredoc_consumers.len(), 3);
    }

    mod placement {
        use super::*;

        #[test]
        fn workspace_and_children_are_rejected() {
            let ws = tempdir().unwrap();
            for dir in [ws.path().to_path_buf(), ws.path().join("missing/conf")] {
                let err = ensure_outside_workspace(&dir, ws.path()).unwrap_err();
                assert!(matches!(err, ConfigError::InsideWorkspace { .. }), "{dir:?}");
            }
        }

        #[test]
        fn sibling_directory_is_fine() {
            let ws = tempdir().unwrap();
            let conf = tempdir().unwrap();
            ensure_outside_workspace(conf.path(), ws.path()).unwrap();
            ensure_outside_workspace(&conf.path().join("not/yet"), ws.path()).unwrap();
        }

        #[test]
        fn parent_components_are_resolved() {
            let ws = tempdir().unwrap();
            let sneaky = ws.path().join("missing/../inner");
            assert!(ensure_outside_workspace(&sneaky, ws.path()).is_err());
        }

        #[cfg(unix)]
        #[test]
        fn symlink_into_workspace_is_rejected() {
            let ws = tempdir().unwrap();
            let outside = tempdir().unwrap();
            let link = outside.path().join("conf");
            std::os::unix::fs::symlink(ws.path(), &link).unwrap();
            assert!(ensure_outside_workspace(&link, ws.path()).is_err());
        }
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "{not json").unwrap();
        let err = load_config(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Json { .. }));
    }
}
