//! Command-line surface of the `parallel_compress` binary.

use crate::codec::Algorithm;
use crate::config::BatchConfig;
use crate::dispatch::children::install_signal_handlers;
use crate::dispatch::fan_out::{answer_worker_check, run_worker, WorkerJob, WORKER_CHECK_SUBCOMMAND, WORKER_SUBCOMMAND};
use crate::dispatch::{destination_collisions, Dispatcher, Strategy};
use crate::error::{CompressError, DispatchError};
use crate::job::JobDescriptor;
use crate::logging::init_logging;
use crate::report::{BatchPlan, BatchSummary, ConsoleReporter, Reporter};
use crate::samples::{create_sample_files, SampleSpec};
use clap::{Args, Parser, Subcommand};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, warn};

#[derive(Debug, Parser)]
#[command(name = "parallel_compress", version, about = "Compress files concurrently with external codecs")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<CliCommand>,

    #[command(flatten)]
    pub batch: BatchArgs,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Compress a single file and print its result as one JSON line.
    #[command(name = WORKER_SUBCOMMAND, hide = true)]
    InvokeJob(InvokeJobArgs),

    /// Confirm this executable can serve as a fan-out worker.
    #[command(name = WORKER_CHECK_SUBCOMMAND, hide = true)]
    WorkerCheck,
}

#[derive(Debug, Args)]
pub struct BatchArgs {
    /// Files to compress
    pub files: Vec<PathBuf>,

    /// Compression algorithm
    #[arg(short, long, value_enum, default_value_t = Algorithm::Gzip, env = "PARALLEL_COMPRESS_ALGORITHM")]
    pub algorithm: Algorithm,

    /// Directory for compressed files (default: next to each source)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Compression level (gzip/bzip2: 1-9, xz: 0-9)
    #[arg(short, long)]
    pub level: Option<u32>,

    /// Maximum number of concurrent jobs (default: CPU count, capped at the file count)
    #[arg(short, long, visible_alias = "workers", env = "PARALLEL_COMPRESS_JOBS")]
    pub jobs: Option<usize>,

    /// How concurrent jobs are scheduled
    #[arg(short, long, value_enum, default_value_t = Strategy::Direct, env = "PARALLEL_COMPRESS_STRATEGY")]
    pub strategy: Strategy,

    /// Parallel-execution helper used by the fan-out strategy
    #[arg(long, default_value = "xargs")]
    pub fan_out_helper: PathBuf,

    /// Run this program instead of the algorithm's default codec binary
    #[arg(long)]
    pub codec_binary: Option<PathBuf>,

    /// Also write the batch summary as JSON to this file
    #[arg(long)]
    pub summary_json: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Create sample files for testing and exit
    #[arg(long)]
    pub create_samples: bool,

    /// Number of sample files to create
    #[arg(long, default_value_t = 5)]
    pub sample_count: usize,

    /// Size of each sample file in KB
    #[arg(long, default_value_t = 100)]
    pub sample_size: usize,

    /// Directory for sample files
    #[arg(long, default_value = "sample_files")]
    pub sample_dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct InvokeJobArgs {
    #[arg(long)]
    pub codec_binary: Option<PathBuf>,

    pub index: usize,

    #[arg(value_enum)]
    pub algorithm: Algorithm,

    pub level: u32,

    pub destination: PathBuf,

    pub source: PathBuf,
}

/// Runs the parsed command line and returns the process exit code.
pub fn run(cli: Cli) -> ExitCode {
    let outcome = match cli.command {
        Some(CliCommand::InvokeJob(args)) => {
            init_logging(false);
            invoke_job(args)
        }
        Some(CliCommand::WorkerCheck) => answer_worker_check(&mut io::stdout().lock()),
        None => {
            init_logging(cli.batch.verbose);
            if cli.batch.create_samples {
                create_samples(&cli.batch)
            } else {
                install_signal_handlers();
                let mut reporter = ConsoleReporter::stdout(cli.batch.verbose);
                compress(&cli.batch, &mut reporter).map(|_| ())
            }
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn invoke_job(args: InvokeJobArgs) -> Result<(), CompressError> {
    let job = WorkerJob {
        index: args.index,
        algorithm: args.algorithm,
        level: args.level,
        destination: args.destination,
        source: args.source,
    };
    run_worker(job, args.codec_binary, &mut io::stdout().lock())
}

fn create_samples(args: &BatchArgs) -> Result<(), CompressError> {
    let spec = SampleSpec::text(&args.sample_dir, args.sample_count, args.sample_size);
    println!("Creating {} sample files in {}/", spec.count, spec.directory.display());

    let files = create_sample_files(&spec)?;
    for file in &files {
        println!("Created: {} ({} bytes)", file.display(), spec.size_kb * 1024);
    }

    let names: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
    println!("\nSample files created. You can now compress them with:");
    println!("parallel_compress {} -a {}", names.join(" "), args.algorithm);
    Ok(())
}

/// Validates the arguments, runs the batch and returns its summary.
pub fn compress(args: &BatchArgs, reporter: &mut dyn Reporter) -> Result<BatchSummary, CompressError> {
    let config = BatchConfig::from_args(args)?;
    if config.files.is_empty() {
        return Err(CompressError::NoInputFiles);
    }

    let mut inputs = Vec::with_capacity(config.files.len());
    for file in &config.files {
        if file.exists() {
            inputs.push(file.as_path());
        } else {
            warn!(path = %file.display(), "skipping missing input");
            reporter
                .missing_input(file)
                .map_err(|e| CompressError::io("report missing input", file, e))?;
        }
    }
    if inputs.is_empty() {
        return Err(CompressError::NoValidInputs);
    }

    let codec = config.algorithm.locate(config.codec_program.as_deref())?;
    debug!(codec = %codec.display(), "codec binary located");

    if let Some(dir) = &config.output_dir {
        fs::create_dir_all(dir).map_err(|e| CompressError::io("create output directory", dir, e))?;
    }

    let jobs = inputs
        .iter()
        .map(|file| JobDescriptor::new(*file, config.algorithm, config.level, config.output_dir.as_deref()))
        .collect::<Result<Vec<_>, _>>()?;
    for group in destination_collisions(&jobs) {
        warn!(
            destination = %jobs[group[0]].destination().display(),
            inputs = group.len(),
            "inputs share a destination and will be compressed one after another"
        );
    }

    let worker = env::current_exe().ok();
    let dispatcher = Dispatcher::for_strategy(&config.dispatch_options(jobs.len(), worker));
    let plan = BatchPlan {
        files: jobs.len(),
        algorithm: config.algorithm,
        level: config.effective_level(),
        workers: dispatcher.ceiling().get(),
        strategy: dispatcher.strategy_name().to_string(),
    };
    reporter
        .batch_started(&plan)
        .map_err(|e| CompressError::io("write report", "<stdout>", e))?;

    let summary = match dispatcher.run_batch(&jobs, reporter) {
        Ok(summary) => summary,
        Err(DispatchError::Interrupted { summary }) => {
            if let Err(e) = reporter.batch_finished(&summary) {
                warn!(error = %e, "failed to report partial summary");
            }
            write_summary(config.summary_json.as_deref(), &summary)?;
            return Err(DispatchError::Interrupted { summary }.into());
        }
        Err(e) => return Err(e.into()),
    };

    write_summary(config.summary_json.as_deref(), &summary)?;
    Ok(summary)
}

fn write_summary(path: Option<&Path>, summary: &BatchSummary) -> Result<(), CompressError> {
    let Some(path) = path else {
        return Ok(());
    };
    let json = serde_json::to_string_pretty(summary).map_err(|e| CompressError::io("encode summary", path, e.into()))?;
    fs::write(path, json).map_err(|e| CompressError::io("write summary", path, e))
}
