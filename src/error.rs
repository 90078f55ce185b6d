use std::path::PathBuf;
use std::process::ExitStatus;

use crate::tools::Tool;

/// Errors that can occur while preparing a genome index.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(
        "Required arguments not provided. Please provide a fasta file (--fasta), \
         annotations (--gtf), and an output directory name (--outDir)."
    )]
    MissingArguments,

    #[error(
        "Please provide a valid {what} file: {} does not exist or is not a file",
        .path.display()
    )]
    InvalidInput { what: &'static str, path: PathBuf },

    #[error(
        "Cannot create output directory because it already exists: {}. \
         Please provide the location and name of a non-existing directory.",
        .0.display()
    )]
    OutputExists(PathBuf),

    #[error(
        "{tool} not found (looked for '{name}'). Did you forget to activate the conda \
         environment? Set {} to point at the executable if it is installed elsewhere.",
        .tool.env_var()
    )]
    ToolNotFound { tool: Tool, name: String },

    #[error("{tool} failed ({status}): {detail}")]
    ToolFailed {
        tool: Tool,
        status: ExitStatus,
        detail: String,
    },

    #[error(
        "FAILED to create auxiliary files: {} is empty. \
         Make sure that you supplied a valid GTF file.",
        .0.display()
    )]
    EmptyAnnotationTable(PathBuf),

    #[error("invalid parameter: {0}")]
    Parameter(String),

    #[error("I/O error: {source} ({path})")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl Error {
    /// Convenience for wrapping an `io::Error` with a path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: path.into(),
        }
    }
}
