//! `warden` - apply patch documents and vet shell commands from the command line.

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use warden_core::{
    ensure_outside_workspace, load_config, maybe_parse_apply_patch_command, save_config,
    GateConfig, SafetyGate,
};

#[derive(Parser)]
#[command(name = "warden", version, about = "Safety gate for agent-driven workspace edits", long_about = None)]
struct Cli {
    /// Workspace root every path is confined to
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,

    /// Directory holding warden.json, outside the workspace (default: built-in config)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a patch document read from a file or stdin
    ApplyPatch {
        /// Read the patch from this file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
        /// Input is a JSON argv array from a shell tool call
        #[arg(long)]
        from_argv: bool,
    },
    /// Check whether a shell command line is safe to run
    Check {
        /// The command line, e.g. "git status && ls"
        line: String,
        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config {
        /// Write it to warden.json
        #[arg(long)]
        write: bool,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("warden: {e}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, String> {
    let config = resolve_config(cli.config_dir.as_deref(), &cli.workspace)?;

    match cli.command {
        Commands::ApplyPatch { file, from_argv } => {
            let gate = open_gate(&cli.workspace, config)?;
            let input = read_input(file.as_deref())?;
            let outcome = if from_argv {
                let argv: Vec<String> = serde_json::from_str(&input)
                    .map_err(|e| format!("expected a JSON array of strings: {e}"))?;
                let invocation = maybe_parse_apply_patch_command(&argv)
                    .ok_or_else(|| "not an apply_patch invocation".to_string())?;
                gate.apply_invocation(&invocation)
            } else {
                gate.apply_patch(&input)
            }
            .map_err(|e| e.to_string())?;

            log::info!("Applied patch with {} file change(s)", outcome.commit.len());
            println!("{}", outcome.message);
            print!("{}", outcome.diff);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check { line, json } => {
            let gate = open_gate(&cli.workspace, config)?;
            let verdict = gate.check_command(&line);
            log::debug!("check {:?}: safe={}", line, verdict.is_safe);
            if json {
                let out = serde_json::to_string(&verdict).map_err(|e| e.to_string())?;
                println!("{out}");
            } else if verdict.is_safe {
                println!("safe");
            } else {
                println!("unsafe: {}", verdict.error_msg);
            }
            Ok(if verdict.is_safe {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Commands::Config { write } => {
            if write {
                let dir = cli
                    .config_dir
                    .as_deref()
                    .ok_or_else(|| "config --write needs --config-dir".to_string())?;
                save_config(dir, &config).map_err(|e| e.to_string())?;
                log::info!("Wrote config to {}", dir.display());
            }
            let out = serde_json::to_string_pretty(&config).map_err(|e| e.to_string())?;
            println!("{out}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Config never comes from the workspace itself, where a patch could rewrite it.
fn resolve_config(config_dir: Option<&Path>, workspace: &Path) -> Result<GateConfig, String> {
    let Some(dir) = config_dir else {
        log::debug!("No --config-dir, using built-in config");
        return Ok(GateConfig::default());
    };
    ensure_outside_workspace(dir, workspace).map_err(|e| e.to_string())?;
    log::debug!("Loading config from {}", dir.display());
    load_config(dir).map_err(|e| e.to_string())
}

fn open_gate(workspace: &Path, config: GateConfig) -> Result<SafetyGate, String> {
    SafetyGate::with_config(workspace, config).map_err(|e| e.to_string())
}

fn read_input(file: Option<&Path>) -> Result<String, String> {
    match file {
        Some(path) => {
            fs::read_to_string(path).map_err(|e| format!("cannot read {}: {e}", path.display()))
        }
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("cannot read stdin: {e}"))?;
            Ok(buf)
        }
    }
}
