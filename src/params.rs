use std::path::{Path, PathBuf};

use clap::Parser;

use crate::error::Error;
use crate::tools::Tool;

// ---------------------------------------------------------------------------
// Execution mode
// ---------------------------------------------------------------------------

/// Where the STAR `genomeGenerate` step runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Synchronously, on this machine, with a single thread.
    Local,
    /// As a SLURM batch job.
    Cluster,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Cluster => write!(f, "cluster"),
        }
    }
}

// ---------------------------------------------------------------------------
// Parameters struct
// ---------------------------------------------------------------------------

/// makeref command-line parameters.
///
/// The three inputs are declared optional so that a missing one is reported
/// by [`Parameters::validate`] with a single message naming all of them.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "makeref",
    about = "Build a STAR genome index and a Picard refFlat table",
    version
)]
pub struct Parameters {
    // ── Inputs ──────────────────────────────────────────────────────────
    /// Genome fasta file in gzip format
    #[arg(long = "fasta")]
    pub fasta: Option<PathBuf>,

    /// Genome annotations in GTF format
    #[arg(long = "gtf")]
    pub gtf: Option<PathBuf>,

    /// Output directory of the genome index; must not exist yet
    #[arg(long = "outDir")]
    pub out_dir: Option<PathBuf>,

    // ── Index ───────────────────────────────────────────────────────────
    /// STAR --genomeSAindexNbases; lower it for smaller (non-human) genomes
    #[arg(long = "genomeNbases", default_value_t = 14)]
    pub genome_nbases: u32,

    /// STAR --sjdbOverhang (read length minus one)
    #[arg(long = "sjdbOverhang", default_value_t = 99)]
    pub sjdb_overhang: u32,

    // ── Cluster ─────────────────────────────────────────────────────────
    /// Submit index generation as a SLURM job instead of running it here
    #[arg(long = "cluster")]
    pub cluster: bool,

    /// SLURM partition
    #[arg(long = "partition", default_value = "broadwl")]
    pub partition: String,

    /// SLURM wall-clock limit
    #[arg(long = "time", default_value = "10:00:00")]
    pub time: String,

    /// SLURM memory request
    #[arg(long = "mem", default_value = "50G")]
    pub mem: String,

    /// Tasks per node for the SLURM job, also passed to STAR as --runThreadN
    #[arg(long = "clusterThreads", default_value_t = 4)]
    pub cluster_threads: usize,

    // ── Executables ─────────────────────────────────────────────────────
    /// gtfToGenePred executable (name on PATH, or a path)
    #[arg(
        long = "gtfToGenePredBin",
        env = Tool::GtfToGenePred.env_var(),
        default_value = Tool::GtfToGenePred.default_name()
    )]
    pub gtf_to_gene_pred_bin: String,

    /// STAR executable (name on PATH, or a path)
    #[arg(
        long = "starBin",
        env = Tool::Star.env_var(),
        default_value = Tool::Star.default_name()
    )]
    pub star_bin: String,

    /// sbatch executable (name on PATH, or a path)
    #[arg(
        long = "sbatchBin",
        env = Tool::Sbatch.env_var(),
        default_value = Tool::Sbatch.default_name()
    )]
    pub sbatch_bin: String,
}

/// The three required paths, after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inputs<'a> {
    pub fasta: &'a Path,
    pub gtf: &'a Path,
    pub out_dir: &'a Path,
}

impl Parameters {
    pub fn execution_mode(&self) -> ExecutionMode {
        if self.cluster {
            ExecutionMode::Cluster
        } else {
            ExecutionMode::Local
        }
    }

    /// Validate parameter combinations that clap alone cannot enforce, and
    /// the filesystem preconditions on the inputs.
    ///
    /// Nothing is created or modified here.
    pub fn validate(&self) -> Result<Inputs<'_>, Error> {
        let (Some(fasta), Some(gtf), Some(out_dir)) =
            (self.fasta.as_deref(), self.gtf.as_deref(), self.out_dir.as_deref())
        else {
            return Err(Error::MissingArguments);
        };

        if !fasta.is_file() {
            return Err(Error::InvalidInput {
                what: "fasta",
                path: fasta.to_path_buf(),
            });
        }
        if !gtf.is_file() {
            return Err(Error::InvalidInput {
                what: "gtf",
                path: gtf.to_path_buf(),
            });
        }

        // Any existing entry counts, not only directories
        if out_dir.exists() {
            return Err(Error::OutputExists(out_dir.to_path_buf()));
        }

        if self.genome_nbases == 0 {
            return Err(Error::Parameter("--genomeNbases must be >= 1".into()));
        }

        if self.cluster {
            if self.cluster_threads == 0 {
                return Err(Error::Parameter("--clusterThreads must be >= 1".into()));
            }

            // Each value becomes the tail of one #SBATCH line
            for (flag, value) in [
                ("--time", &self.time),
                ("--partition", &self.partition),
                ("--mem", &self.mem),
            ] {
                if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c.is_control()) {
                    return Err(Error::Parameter(format!(
                        "{flag} must be a single word without whitespace, got {value:?}"
                    )));
                }
            }
        }

        Ok(Inputs {
            fasta,
            gtf,
            out_dir,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
