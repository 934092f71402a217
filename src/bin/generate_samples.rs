use clap::Parser;
use parallel_compress_rs::logging::init_logging;
use parallel_compress_rs::samples::{create_sample_files, SampleKind, SampleSpec};
use std::path::PathBuf;
use std::process::ExitCode;

/// Create synthetic files for compression benchmarks
#[derive(Debug, Parser)]
#[command(name = "generate_samples", version)]
struct Args {
    /// Number of files to create
    #[arg(short, long, default_value_t = 5)]
    count: usize,

    /// Size of each file in KB
    #[arg(short, long, default_value_t = 100)]
    size_kb: usize,

    /// Content of the files
    #[arg(short, long, value_enum, default_value_t = SampleKind::Text)]
    kind: SampleKind,

    /// Seed for random content
    #[arg(long)]
    seed: Option<u64>,

    /// Directory for the files
    #[arg(short, long, default_value = "sample_files")]
    directory: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(false);

    let spec = SampleSpec {
        directory: args.directory,
        count: args.count,
        size_kb: args.size_kb,
        kind: args.kind,
        seed: args.seed,
    };

    match create_sample_files(&spec) {
        Ok(files) => {
            for file in &files {
                println!("Created: {} ({} bytes)", file.display(), spec.size_kb * 1024);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
