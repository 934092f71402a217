use std::io::{self, IsTerminal};
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence; otherwise this crate logs at `info`, or `debug`
/// when `verbose` is set. Logs go to stderr so stdout carries only the report.
pub fn init_logging(verbose: bool) {
    let default = if verbose {
        "parallel_compress_rs=debug"
    } else {
        "parallel_compress_rs=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // A subscriber may already be set when embedded in tests
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}
