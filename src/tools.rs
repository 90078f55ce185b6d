//! External executables: lookup on `PATH`, command construction and execution.
//!
//! Every command is built as an explicit argument vector and run without a
//! shell. The [`CommandRunner`] trait is the seam between the orchestration
//! in [`crate::run`] and the operating system.

use std::borrow::Cow;
use std::env;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use log::debug;

use crate::error::Error;
use crate::params::{ExecutionMode, Parameters};

// ---------------------------------------------------------------------------
// Tool identities
// ---------------------------------------------------------------------------

/// The external programs this crate drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    GtfToGenePred,
    Star,
    Sbatch,
}

impl Tool {
    /// Executable name looked up on `PATH` when no override is given.
    pub fn default_name(self) -> &'static str {
        match self {
            Self::GtfToGenePred => "gtfToGenePred",
            Self::Star => "STAR",
            Self::Sbatch => "sbatch",
        }
    }

    /// Environment variable that overrides the executable.
    pub fn env_var(self) -> &'static str {
        match self {
            Self::GtfToGenePred => "MAKEREF_GTFTOGENEPRED_BIN",
            Self::Star => "MAKEREF_STAR_BIN",
            Self::Sbatch => "MAKEREF_SBATCH_BIN",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_name())
    }
}

// ---------------------------------------------------------------------------
// Executable lookup
// ---------------------------------------------------------------------------

/// Resolve `name` for `tool` against a `PATH`-style search path.
///
/// A name containing a path separator is taken as a path and only checked
/// for being executable; anything else is searched for in `search_path`.
pub fn resolve_in(tool: Tool, name: &str, search_path: Option<&OsStr>) -> Result<PathBuf, Error> {
    let not_found = || Error::ToolNotFound {
        tool,
        name: name.to_string(),
    };

    if name.is_empty() {
        return Err(not_found());
    }

    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return if is_executable(candidate) {
            Ok(candidate.to_path_buf())
        } else {
            Err(not_found())
        };
    }

    let search_path = search_path.ok_or_else(not_found)?;
    env::split_paths(search_path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|path| is_executable(path))
        .ok_or_else(not_found)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Resolved locations of every executable a run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub gtf_to_gene_pred: PathBuf,
    pub star: PathBuf,
    /// Only resolved in cluster mode.
    pub sbatch: Option<PathBuf>,
}

impl Toolchain {
    /// Resolve the executables configured in `params` on the process `PATH`.
    pub fn resolve(params: &Parameters) -> Result<Self, Error> {
        Self::resolve_in(params, env::var_os("PATH").as_deref())
    }

    pub fn resolve_in(params: &Parameters, search_path: Option<&OsStr>) -> Result<Self, Error> {
        let gtf_to_gene_pred =
            resolve_in(Tool::GtfToGenePred, &params.gtf_to_gene_pred_bin, search_path)?;
        let star = resolve_in(Tool::Star, &params.star_bin, search_path)?;
        let sbatch = match params.execution_mode() {
            ExecutionMode::Cluster => Some(resolve_in(
                Tool::Sbatch,
                &params.sbatch_bin,
                search_path,
            )?),
            ExecutionMode::Local => None,
        };

        debug!("gtfToGenePred: {}", gtf_to_gene_pred.display());
        debug!("STAR: {}", star.display());
        if let Some(sbatch) = &sbatch {
            debug!("sbatch: {}", sbatch.display());
        }

        Ok(Self {
            gtf_to_gene_pred,
            star,
            sbatch,
        })
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// A program plus its argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    #[cfg(test)]
    pub(crate) fn flag_value(&self, flag: &str) -> Option<&OsStr> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(OsString::as_os_str)
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

/// Renders the command as a single shell-quoted line.
impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str));
        for (i, word) in words.enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            let word: Cow<'_, str> = word.to_string_lossy();
            f.write_str(&shell_escape::escape(word))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Exit status and captured streams of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Best single-line explanation of a failure: stderr, then stdout,
    /// then the bare exit status.
    pub fn failure_detail(&self) -> String {
        let stderr = String::from_utf8_lossy(&self.stderr).trim().to_string();
        if !stderr.is_empty() {
            return stderr;
        }
        let stdout = String::from_utf8_lossy(&self.stdout).trim().to_string();
        if !stdout.is_empty() {
            return stdout;
        }
        format!("exit status {}", self.status)
    }
}

/// Runs external commands.
pub trait CommandRunner {
    /// Run to completion, capturing stdout and stderr.
    fn output(&mut self, cmd: &ExternalCommand) -> std::io::Result<CommandOutput>;

    /// Run to completion with stdio inherited from this process.
    fn status(&mut self, cmd: &ExternalCommand) -> std::io::Result<ExitStatus>;
}

/// [`CommandRunner`] backed by `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn output(&mut self, cmd: &ExternalCommand) -> std::io::Result<CommandOutput> {
        debug!("running: {cmd}");
        let output = cmd.to_command().stdin(Stdio::null()).output()?;
        Ok(CommandOutput {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn status(&mut self, cmd: &ExternalCommand) -> std::io::Result<ExitStatus> {
        debug!("running: {cmd}");
        cmd.to_command().status()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
