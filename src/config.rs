use crate::paths;
use anyhow::{bail, Context, Error, Result};
use clap::Parser;
use log::debug;
use nix::unistd::{access, AccessFlags};
use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "filetrace")]
#[command(version, about = "Thread-aware file access visualizer")]
pub struct Cli {
    /// Output HTML file
    #[arg(short = 'o', long = "output-html", default_value = "filetrace_output.html")]
    pub output_html: PathBuf,

    /// Show all files (disable base-directory filtering)
    #[arg(short = 'a', long = "all")]
    pub all: bool,

    /// Base directory for file filtering (default: current directory)
    #[arg(short = 'd', long = "directory")]
    pub directory: Option<PathBuf>,

    /// The command to trace and its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Validated supervisor configuration. Construction is the only place the
/// CLI surface is checked; the supervisor itself never revalidates.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub output_path: PathBuf,
    pub base_dir: PathBuf,
    pub show_all_paths: bool,
    pub command: Vec<String>,
}

impl TryFrom<Cli> for TraceConfig {
    type Error = Error;

    fn try_from(cli: Cli) -> Result<Self> {
        let Some(program) = cli.command.first() else {
            bail!("no command specified");
        };
        validate_command(program)?;
        validate_output_path(&cli.output_html)?;

        let base_dir = match cli.directory {
            Some(directory) => directory.canonicalize().with_context(|| {
                format!("base directory does not exist: {}", directory.display())
            })?,
            None => paths::current_dir(),
        };

        Ok(Self {
            output_path: cli.output_html,
            base_dir,
            show_all_paths: cli.all,
            command: cli.command,
        })
    }
}

/// The target must be executable: direct permission check when the name
/// carries a path separator, PATH search otherwise.
fn validate_command(command: &str) -> Result<()> {
    if command.is_empty() {
        bail!("command cannot be empty");
    }

    if command.contains('/') {
        if access(command, AccessFlags::X_OK).is_ok() {
            debug!("command validated (direct path): {command}");
            return Ok(());
        }
        bail!("command is not executable: {command}");
    }

    let path_env = env::var("PATH").context("PATH environment variable is not set")?;
    for dir in path_env.split(':').filter(|dir| !dir.is_empty()) {
        let candidate = Path::new(dir).join(command);
        if access(&candidate, AccessFlags::X_OK).is_ok() {
            debug!("command validated (PATH): {}", candidate.display());
            return Ok(());
        }
    }
    bail!("command not found in PATH: {command}")
}

/// The artifact's parent directory must exist, be a directory, and carry a
/// write bit for at least one of owner/group/other.
fn validate_output_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("output file path cannot be empty");
    }

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => paths::current_dir(),
    };

    let metadata = fs::metadata(&parent)
        .with_context(|| format!("output directory does not exist: {}", parent.display()))?;
    if !metadata.is_dir() {
        bail!("output parent path is not a directory: {}", parent.display());
    }
    if metadata.permissions().mode() & 0o222 == 0 {
        bail!("output directory is not writable: {}", parent.display());
    }

    debug!("output path validated: {}", path.display());
    Ok(())
}
