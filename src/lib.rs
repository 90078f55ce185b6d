pub mod error;
pub mod params;
pub mod refflat;
pub mod sbatch;
pub mod star;
pub mod tools;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use anyhow::Context;
use log::{debug, info, warn};

use crate::error::Error;
use crate::params::{ExecutionMode, Inputs, Parameters};
use crate::refflat::REFFLAT_FILE_NAME;
use crate::sbatch::{BatchScript, Directives, BATCH_SCRIPT_NAME};
use crate::star::GenomeGenerate;
use crate::tools::{CommandRunner, ExternalCommand, SystemRunner, Tool, Toolchain};

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The batch script was written and handed to `sbatch`.
    Submitted { script: PathBuf, status: ExitStatus },
    /// STAR ran to completion on this machine.
    Completed { status: ExitStatus },
}

/// Top-level entry point. Called from `main()` after CLI parsing.
pub fn run(params: &Parameters) -> anyhow::Result<Outcome> {
    let work_dir = std::env::current_dir().context("cannot determine working directory")?;

    let inputs = params.validate()?;
    let tools = Toolchain::resolve(params)?;

    info!("makeref v{}", env!("CARGO_PKG_VERSION"));
    info!("mode: {}", params.execution_mode());

    Ok(build_index(params, &inputs, &tools, &mut SystemRunner, &work_dir)?)
}

/// Everything after validation: create the output directory, derive the
/// refFlat table and run or submit STAR.
pub fn build_index<R: CommandRunner>(
    params: &Parameters,
    inputs: &Inputs<'_>,
    tools: &Toolchain,
    runner: &mut R,
    work_dir: &Path,
) -> Result<Outcome, Error> {
    info!("fasta: {}", inputs.fasta.display());
    info!("gtf: {}", inputs.gtf.display());
    info!("outDir: {}", inputs.out_dir.display());
    info!("Setting up directory and creating auxiliary files...");

    fs::create_dir(inputs.out_dir).map_err(|e| Error::io(e, inputs.out_dir))?;

    let table = inputs.out_dir.join(REFFLAT_FILE_NAME);
    let n_records = derive_refflat(runner, &tools.gtf_to_gene_pred, inputs, &table)?;

    let size = fs::metadata(&table).map_err(|e| Error::io(e, &table))?.len();
    if size == 0 {
        return Err(Error::EmptyAnnotationTable(table));
    }
    info!("Wrote {n_records} transcripts to {}", table.display());

    match params.execution_mode() {
        ExecutionMode::Cluster => submit(params, inputs, tools, runner, work_dir),
        ExecutionMode::Local => run_locally(params, inputs, tools, runner),
    }
}

/// Run gtfToGenePred into a temporary file inside the output directory and
/// reformat it into the refFlat table.
fn derive_refflat<R: CommandRunner>(
    runner: &mut R,
    gtf_to_gene_pred: &Path,
    inputs: &Inputs<'_>,
    table: &Path,
) -> Result<usize, Error> {
    let gene_pred = tempfile::Builder::new()
        .prefix(".annotations")
        .suffix(".genePred")
        .tempfile_in(inputs.out_dir)
        .map_err(|e| Error::io(e, inputs.out_dir))?;

    let cmd = ExternalCommand::new(gtf_to_gene_pred)
        .arg(inputs.gtf)
        .arg(gene_pred.path())
        .arg("-genePredExt");
    debug!("{cmd}");

    let output = runner
        .output(&cmd)
        .map_err(|e| Error::io(e, gtf_to_gene_pred))?;
    if !output.status.success() {
        return Err(Error::ToolFailed {
            tool: Tool::GtfToGenePred,
            status: output.status,
            detail: output.failure_detail(),
        });
    }

    let n_records = refflat::convert_file(gene_pred.path(), table)?;

    let tmp_path = gene_pred.path().to_path_buf();
    gene_pred.close().map_err(|e| Error::io(e, tmp_path))?;

    Ok(n_records)
}

fn submit<R: CommandRunner>(
    params: &Parameters,
    inputs: &Inputs<'_>,
    tools: &Toolchain,
    runner: &mut R,
    work_dir: &Path,
) -> Result<Outcome, Error> {
    let sbatch = tools.sbatch.as_deref().ok_or_else(|| Error::ToolNotFound {
        tool: Tool::Sbatch,
        name: params.sbatch_bin.clone(),
    })?;

    // The job runs on a compute node, so STAR is named as configured rather
    // than by its resolved path on this host.
    let star = GenomeGenerate::new(inputs, params, params.cluster_threads)
        .command(params.star_bin.as_str());
    let script = BatchScript::new(Directives::from_params(params), star);

    let script_path = work_dir.join(BATCH_SCRIPT_NAME);
    script.write(&script_path)?;
    info!("Wrote batch script {}", script_path.display());

    let cmd = ExternalCommand::new(sbatch).arg(&script_path);
    debug!("{cmd}");
    let status = runner.status(&cmd).map_err(|e| Error::io(e, sbatch))?;
    if !status.success() {
        warn!("sbatch exited with {status}; the job may not have been queued");
    }

    println!(
        "Index generation has been submitted to the cluster. \
         Type squeue -u $USER to check the status."
    );
    Ok(Outcome::Submitted {
        script: script_path,
        status,
    })
}

fn run_locally<R: CommandRunner>(
    params: &Parameters,
    inputs: &Inputs<'_>,
    tools: &Toolchain,
    runner: &mut R,
) -> Result<Outcome, Error> {
    println!(
        "Genome index generation will run locally on this machine. \
         This may not complete due to STAR's large memory requirement."
    );

    let cmd = GenomeGenerate::new(inputs, params, 1).command(&tools.star);
    debug!("{cmd}");
    let status = runner.status(&cmd).map_err(|e| Error::io(e, &tools.star))?;
    if status.success() {
        println!("Genome generation complete!");
    } else {
        warn!("STAR exited with {status}; check Log.out in the output directory");
    }

    Ok(Outcome::Completed { status })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::tools::CommandOutput;
    use clap::Parser;
    use std::ffi::OsStr;
    use std::os::unix::process::ExitStatusExt;
    use tempfile::TempDir;

    const GENE_PRED_EXT: &str = "ENST0001\tchr1\t+\t11868\t14409\t14409\t14409\t3\t\
        11868,12612,13220,\t12227,12721,14409,\t0\tDDX11L1\tnone\tnone\t-1,-1,-1,\n";

    /// Records every command and plays the part of each tool.
    struct FakeRunner {
        gene_pred: &'static str,
        convert_exit: i32,
        captured: Vec<ExternalCommand>,
        waited: Vec<ExternalCommand>,
    }

    impl FakeRunner {
        fn new() -> Self {
            Self {
                gene_pred: GENE_PRED_EXT,
                convert_exit: 0,
                captured: Vec::new(),
                waited: Vec::new(),
            }
        }
    }

    impl CommandRunner for FakeRunner {
        fn output(&mut self, cmd: &ExternalCommand) -> std::io::Result<CommandOutput> {
            // gtfToGenePred <gtf> <out> -genePredExt
            fs::write(&cmd.get_args()[1], self.gene_pred)?;
            self.captured.push(cmd.clone());
            Ok(CommandOutput {
                status: ExitStatus::from_raw(self.convert_exit << 8),
                stdout: Vec::new(),
                stderr: if self.convert_exit == 0 {
                    Vec::new()
                } else {
                    b"Error: invalid gtf".to_vec()
                },
            })
        }

        fn status(&mut self, cmd: &ExternalCommand) -> std::io::Result<ExitStatus> {
            self.waited.push(cmd.clone());
            Ok(ExitStatus::from_raw(0))
        }
    }

    struct Sandbox {
        dir: TempDir,
        fasta: String,
        gtf: String,
        out_dir: String,
    }

    impl Sandbox {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let fasta = dir.path().join("genome.fa.gz");
            let gtf = dir.path().join("annotations.gtf");
            fs::write(&fasta, b"\x1f\x8b").unwrap();
            fs::write(&gtf, "chr1\tsrc\texon\t1\t10\t.\t+\t.\tgene_id \"g\";\n").unwrap();
            Self {
                fasta: fasta.to_str().unwrap().to_string(),
                gtf: gtf.to_str().unwrap().to_string(),
                out_dir: dir.path().join("idx").to_str().unwrap().to_string(),
                dir,
            }
        }

        fn params(&self, extra: &[&str]) -> Parameters {
            let mut args = vec![
                "makeref",
                "--fasta",
                self.fasta.as_str(),
                "--gtf",
                self.gtf.as_str(),
                "--outDir",
                self.out_dir.as_str(),
            ];
            args.extend_from_slice(extra);
            Parameters::parse_from(args)
        }

        fn work_dir(&self) -> PathBuf {
            self.dir.path().join("work")
        }

        fn out_dir(&self) -> &Path {
            Path::new(&self.out_dir)
        }
    }

    fn toolchain(cluster: bool) -> Toolchain {
        Toolchain {
            gtf_to_gene_pred: PathBuf::from("/tools/gtfToGenePred"),
            star: PathBuf::from("/tools/STAR"),
            sbatch: cluster.then(|| PathBuf::from("/tools/sbatch")),
        }
    }

    fn execute(
        sandbox: &Sandbox,
        params: &Parameters,
        runner: &mut FakeRunner,
    ) -> Result<Outcome, Error> {
        let inputs = params.validate()?;
        let work_dir = sandbox.work_dir();
        fs::create_dir_all(&work_dir).unwrap();
        build_index(params, &inputs, &toolchain(params.cluster), runner, &work_dir)
    }

    #[test]
    fn local_run_writes_table_and_runs_star_single_threaded() {
        let sandbox = Sandbox::new();
        let params = sandbox.params(&[]);
        let mut runner = FakeRunner::new();

        let outcome = execute(&sandbox, &params, &mut runner).unwrap();
        assert!(matches!(outcome, Outcome::Completed { status } if status.success()));

        let table = fs::read_to_string(sandbox.out_dir().join(REFFLAT_FILE_NAME)).unwrap();
        assert!(table.starts_with("DDX11L1\tENST0001\t"));

        // gtfToGenePred was called with the gtf, a temp file and -genePredExt
        assert_eq!(runner.captured.len(), 1);
        let convert = &runner.captured[0];
        assert_eq!(convert.program(), Path::new("/tools/gtfToGenePred"));
        assert_eq!(convert.get_args()[0], OsStr::new(&sandbox.gtf));
        assert_eq!(convert.get_args()[2], OsStr::new("-genePredExt"));

        // Only the table remains in the output directory
        let entries: Vec<_> = fs::read_dir(sandbox.out_dir()).unwrap().collect();
        assert_eq!(entries.len(), 1);

        assert_eq!(runner.waited.len(), 1);
        let star = &runner.waited[0];
        assert_eq!(star.program(), Path::new("/tools/STAR"));
        assert_eq!(star.flag_value("--runThreadN"), Some(OsStr::new("1")));
        assert_eq!(star.flag_value("--genomeSAindexNbases"), Some(OsStr::new("14")));
        assert_eq!(star.flag_value("--sjdbOverhang"), Some(OsStr::new("99")));
        let genome_dir = format!("{}/", sandbox.out_dir);
        assert_eq!(star.flag_value("--genomeDir"), Some(OsStr::new(&genome_dir)));

        assert!(!sandbox.work_dir().join(BATCH_SCRIPT_NAME).exists());
    }

    #[test]
    fn cluster_run_writes_script_and_submits() {
        let sandbox = Sandbox::new();
        let params = sandbox.params(&["--cluster", "--genomeNbases", "11"]);
        let mut runner = FakeRunner::new();

        let outcome = execute(&sandbox, &params, &mut runner).unwrap();
        let script_path = sandbox.work_dir().join(BATCH_SCRIPT_NAME);
        assert_eq!(
            outcome,
            Outcome::Submitted {
                script: script_path.clone(),
                status: ExitStatus::from_raw(0),
            }
        );

        let script = fs::read_to_string(&script_path).unwrap();
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#SBATCH --tasks-per-node=4"));
        let star_line = script.lines().last().unwrap();
        assert!(star_line.starts_with("STAR --runThreadN 4 --runMode genomeGenerate"));
        assert!(star_line.contains(&format!("--genomeDir {}/", sandbox.out_dir)));
        assert!(star_line.contains(&format!("--genomeFastaFiles {}", sandbox.fasta)));
        assert!(star_line.contains(&format!("--sjdbGTFfile {}", sandbox.gtf)));
        assert!(star_line.ends_with("--genomeSAindexNbases 11"));

        // Exactly one waited-on command: the submission, not STAR
        assert_eq!(runner.waited.len(), 1);
        let submit = &runner.waited[0];
        assert_eq!(submit.program(), Path::new("/tools/sbatch"));
        assert_eq!(submit.get_args(), [script_path.into_os_string()]);
    }

    #[test]
    fn empty_conversion_aborts_before_indexing() {
        let sandbox = Sandbox::new();
        let params = sandbox.params(&[]);
        let mut runner = FakeRunner::new();
        runner.gene_pred = "";

        let err = execute(&sandbox, &params, &mut runner).unwrap_err();
        assert!(matches!(err, Error::EmptyAnnotationTable(_)));
        assert!(err.to_string().contains("FAILED to create auxiliary files"));
        assert!(runner.waited.is_empty());
    }

    #[test]
    fn failed_conversion_is_fatal() {
        let sandbox = Sandbox::new();
        let params = sandbox.params(&["--cluster"]);
        let mut runner = FakeRunner::new();
        runner.convert_exit = 1;

        let err = execute(&sandbox, &params, &mut runner).unwrap_err();
        match err {
            Error::ToolFailed { tool, detail, .. } => {
                assert_eq!(tool, Tool::GtfToGenePred);
                assert_eq!(detail, "Error: invalid gtf");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(runner.waited.is_empty());
        assert!(!sandbox.work_dir().join(BATCH_SCRIPT_NAME).exists());

        // The temporary genePred file is cleaned up on the error path too
        let leftovers = fs::read_dir(sandbox.out_dir())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".genePred"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn output_directory_race_is_an_error() {
        let sandbox = Sandbox::new();
        let params = sandbox.params(&[]);
        let inputs = params.validate().unwrap();
        fs::create_dir(sandbox.out_dir()).unwrap();

        let mut runner = FakeRunner::new();
        let tools = toolchain(false);
        let err = build_index(&params, &inputs, &tools, &mut runner, sandbox.dir.path())
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(runner.captured.is_empty());
    }
}
