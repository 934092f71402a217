use clap::Parser;
use parallel_compress_rs::cli::{run, Cli};
use std::process::ExitCode;

fn main() -> ExitCode {
    run(Cli::parse())
}
