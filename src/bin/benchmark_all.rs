use clap::Parser;
use parallel_compress_rs::benchmark::{append_record_block, print_benchmark_results, run_case, BenchmarkCase};
use parallel_compress_rs::codec::Algorithm;
use parallel_compress_rs::dispatch::Strategy;
use parallel_compress_rs::logging::init_logging;
use parallel_compress_rs::samples::{create_sample_files, SampleSpec};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};

const COMPRESSOR_BINARY: &str = "parallel_compress";
const OUTPUT_FILE: &str = "benchmark_results.txt";
const WORK_DIR: &str = "benchmark_output";
const N_ITERATIONS: usize = 3;

/// Compare algorithms and concurrency ceilings on the same input files
#[derive(Debug, Parser)]
#[command(name = "benchmark_all", version)]
struct Args {
    /// Files to compress in every run (default: generated samples)
    files: Vec<PathBuf>,

    #[arg(short, long, value_enum, value_delimiter = ',', default_values_t = Algorithm::ALL)]
    algorithms: Vec<Algorithm>,

    #[arg(short, long, value_delimiter = ',', default_values_t = [1, 2, 4])]
    jobs: Vec<usize>,

    #[arg(short, long, value_enum, default_value_t = Strategy::Direct)]
    strategy: Strategy,

    #[arg(short, long, default_value_t = N_ITERATIONS)]
    iterations: usize,

    /// Generate fresh sample files before benchmarking
    #[arg(long)]
    create_samples: bool,

    #[arg(long, default_value_t = 5)]
    sample_count: usize,

    #[arg(long, default_value_t = 1024)]
    sample_size: usize,

    #[arg(long, default_value = "sample_files")]
    sample_dir: PathBuf,

    /// `parallel_compress` executable (default: next to this binary)
    #[arg(long)]
    compressor: Option<PathBuf>,

    /// Append-only results log
    #[arg(short, long, default_value = OUTPUT_FILE)]
    output: PathBuf,

    #[arg(long, default_value = WORK_DIR)]
    work_dir: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(false);

    let compressor = match args.compressor.clone().or_else(sibling_compressor) {
        Some(compressor) => compressor,
        None => {
            eprintln!("error: cannot locate the {COMPRESSOR_BINARY} binary, pass --compressor");
            return ExitCode::FAILURE;
        }
    };

    let files = if args.create_samples || args.files.is_empty() {
        let spec = SampleSpec::text(&args.sample_dir, args.sample_count, args.sample_size);
        match create_sample_files(&spec) {
            Ok(files) => files,
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::from(e.exit_code());
            }
        }
    } else {
        args.files.clone()
    };

    if let Err(e) = fs::create_dir_all(&args.work_dir) {
        eprintln!("error: cannot create {}: {e}", args.work_dir.display());
        return ExitCode::FAILURE;
    }

    let mut records = Vec::new();
    for &algorithm in &args.algorithms {
        for &jobs in &args.jobs {
            for iteration in 1..=args.iterations {
                let case = BenchmarkCase {
                    algorithm,
                    jobs,
                    strategy: args.strategy,
                    iteration,
                };
                info!(case = %case.label(), "running benchmark");

                match run_case(&compressor, &case, &files, &args.work_dir) {
                    Ok(record) => {
                        if let Err(e) = append_record_block(&args.output, &record) {
                            warn!(error = %e, log = %args.output.display(), "failed to append benchmark record");
                        }
                        records.push(record);
                    }
                    Err(e) => eprintln!("Benchmark failed for {}: {e}", case.label()),
                }
            }
        }
    }

    print_benchmark_results(&records);
    ExitCode::SUCCESS
}

fn sibling_compressor() -> Option<PathBuf> {
    let exe = env::current_exe().ok()?;
    let candidate = exe.with_file_name(format!("{COMPRESSOR_BINARY}{}", env::consts::EXE_SUFFIX));
    candidate.is_file().then_some(candidate)
}
