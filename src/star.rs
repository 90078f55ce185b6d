use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::params::{Inputs, Parameters};
use crate::tools::ExternalCommand;

/// Arguments of a STAR `--runMode genomeGenerate` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomeGenerate {
    pub genome_dir: PathBuf,
    pub fasta: PathBuf,
    pub gtf: PathBuf,
    pub sjdb_overhang: u32,
    pub sa_index_nbases: u32,
    pub threads: usize,
}

impl GenomeGenerate {
    pub fn new(inputs: &Inputs<'_>, params: &Parameters, threads: usize) -> Self {
        Self {
            genome_dir: inputs.out_dir.to_path_buf(),
            fasta: inputs.fasta.to_path_buf(),
            gtf: inputs.gtf.to_path_buf(),
            sjdb_overhang: params.sjdb_overhang,
            sa_index_nbases: params.genome_nbases,
            threads,
        }
    }

    /// Build the command line for `program`.
    pub fn command(&self, program: impl Into<PathBuf>) -> ExternalCommand {
        ExternalCommand::new(program)
            .arg("--runThreadN")
            .arg(self.threads.to_string())
            .args(["--runMode", "genomeGenerate"])
            .arg("--genomeDir")
            .arg(genome_dir_arg(&self.genome_dir))
            .arg("--genomeFastaFiles")
            .arg(&self.fasta)
            .arg("--sjdbGTFfile")
            .arg(&self.gtf)
            .arg("--sjdbOverhang")
            .arg(self.sjdb_overhang.to_string())
            .arg("--genomeSAindexNbases")
            .arg(self.sa_index_nbases.to_string())
    }
}

/// STAR expects `--genomeDir` with a trailing slash.
fn genome_dir_arg(dir: &Path) -> OsString {
    let mut arg = dir.as_os_str().to_os_string();
    if !arg.to_string_lossy().ends_with('/') {
        arg.push("/");
    }
    arg
}
