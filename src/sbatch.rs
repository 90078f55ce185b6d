//! SLURM batch script for cluster-mode index generation.

use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::Error;
use crate::params::Parameters;
use crate::tools::ExternalCommand;

/// Script file written to the working directory in cluster mode.
pub const BATCH_SCRIPT_NAME: &str = "generate_indices.sbatch";

/// `#SBATCH` resource directives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directives {
    pub job_name: String,
    pub output: String,
    pub error: String,
    pub time: String,
    pub partition: String,
    pub mem: String,
    pub tasks_per_node: usize,
}

impl Default for Directives {
    fn default() -> Self {
        Self {
            job_name: "genome_index".to_string(),
            output: "genome_index.log".to_string(),
            error: "genome_index.error".to_string(),
            time: "10:00:00".to_string(),
            partition: "broadwl".to_string(),
            mem: "50G".to_string(),
            tasks_per_node: 4,
        }
    }
}

impl Directives {
    pub fn from_params(params: &Parameters) -> Self {
        Self {
            time: params.time.clone(),
            partition: params.partition.clone(),
            mem: params.mem.clone(),
            tasks_per_node: params.cluster_threads,
            ..Self::default()
        }
    }
}

/// A bash script with resource directives and a single command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchScript {
    pub directives: Directives,
    pub command: ExternalCommand,
}

impl BatchScript {
    pub fn new(directives: Directives, command: ExternalCommand) -> Self {
        Self {
            directives,
            command,
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), Error> {
        fs::write(path, self.to_string()).map_err(|e| Error::io(e, path))
    }
}

impl fmt::Display for BatchScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.directives;
        writeln!(f, "#!/bin/bash")?;
        writeln!(f)?;
        writeln!(f, "#SBATCH --job-name={}", d.job_name)?;
        writeln!(f, "#SBATCH --output={}", d.output)?;
        writeln!(f, "#SBATCH --error={}", d.error)?;
        writeln!(f, "#SBATCH --time={}", d.time)?;
        writeln!(f, "#SBATCH --partition={}", d.partition)?;
        writeln!(f, "#SBATCH --mem={}", d.mem)?;
        writeln!(f, "#SBATCH --tasks-per-node={}", d.tasks_per_node)?;
        writeln!(f)?;
        writeln!(f, "{}", self.command)
    }
}
