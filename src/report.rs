use crate::codec::Algorithm;
use crate::job::{reduction_percent, JobResult};
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

/// Aggregate statistics over one batch.
///
/// Byte totals cover successful jobs only, so the overall ratio compares
/// like with like.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
}

impl BatchSummary {
    /// Batch wall time divided by the number of attempted jobs.
    pub fn average_time_per_job(&self) -> Duration {
        if self.attempted == 0 {
            Duration::ZERO
        } else {
            self.elapsed.div_f64(self.attempted as f64)
        }
    }

    /// Space saved across all successful jobs, as a percentage.
    pub fn overall_ratio(&self) -> f64 {
        reduction_percent(self.original_bytes, self.compressed_bytes)
    }
}

/// Folds job results, in any order, into a `BatchSummary`.
#[derive(Debug, Default)]
pub struct Aggregator {
    summary: BatchSummary,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: &JobResult) {
        self.summary.attempted += 1;
        match result.compressed_size() {
            Some(compressed) => {
                self.summary.succeeded += 1;
                self.summary.original_bytes += result.original_size;
                self.summary.compressed_bytes += compressed;
            }
            None => self.summary.failed += 1,
        }
    }

    pub fn finish(mut self, elapsed: Duration) -> BatchSummary {
        self.summary.elapsed = elapsed;
        self.summary
    }
}

/// What is about to run; printed as the batch header.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub files: usize,
    pub algorithm: Algorithm,
    pub level: u32,
    pub workers: usize,
    pub strategy: String,
}

/// Receives batch progress. Injected so output can be captured in tests.
pub trait Reporter {
    /// An input was skipped before dispatch because it does not exist.
    fn missing_input(&mut self, path: &Path) -> io::Result<()>;

    fn batch_started(&mut self, plan: &BatchPlan) -> io::Result<()>;

    /// Called once per job, in completion order.
    fn job_finished(&mut self, result: &JobResult) -> io::Result<()>;

    fn batch_finished(&mut self, summary: &BatchSummary) -> io::Result<()>;
}

/// Human-readable progress and summary lines.
pub struct ConsoleReporter<W: Write> {
    out: W,
    verbose: bool,
}

impl ConsoleReporter<io::Stdout> {
    pub fn stdout(verbose: bool) -> Self {
        Self::new(io::stdout(), verbose)
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W, verbose: bool) -> Self {
        Self { out, verbose }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Reporter for ConsoleReporter<W> {
    fn missing_input(&mut self, path: &Path) -> io::Result<()> {
        writeln!(self.out, "Warning: {} does not exist, skipping...", path.display())
    }

    fn batch_started(&mut self, plan: &BatchPlan) -> io::Result<()> {
        writeln!(self.out, "Starting parallel compression of {} files", plan.files)?;
        writeln!(self.out, "Algorithm: {}", plan.algorithm.to_string().to_uppercase())?;
        writeln!(self.out, "Workers: {}", plan.workers)?;
        writeln!(self.out, "Compression Level: {}", plan.level)?;
        writeln!(self.out, "Strategy: {}", plan.strategy)?;
        writeln!(self.out, "{}", "-".repeat(50))
    }

    fn job_finished(&mut self, result: &JobResult) -> io::Result<()> {
        let descriptor = &result.descriptor;
        match result.compressed_size() {
            Some(compressed) => {
                writeln!(
                    self.out,
                    "✓ {} -> {}",
                    file_name(descriptor.source()),
                    file_name(descriptor.destination())
                )?;
                writeln!(
                    self.out,
                    "  Size: {} -> {} bytes",
                    result.original_size.to_formatted_string(&Locale::en),
                    compressed.to_formatted_string(&Locale::en)
                )?;
                writeln!(
                    self.out,
                    "  Ratio: {:.1}% | Time: {:.2}s",
                    result.compression_ratio().unwrap_or(0.0),
                    result.elapsed.as_secs_f64()
                )?;
            }
            None => {
                let failure = result.failure().map(ToString::to_string).unwrap_or_default();
                writeln!(self.out, "✗ Error compressing {}: {}", descriptor.source().display(), failure)?;
            }
        }

        if self.verbose {
            writeln!(
                self.out,
                "  [{} level {}] {}",
                descriptor.algorithm(),
                descriptor.effective_level(),
                descriptor.destination().display()
            )?;
        }
        Ok(())
    }

    fn batch_finished(&mut self, summary: &BatchSummary) -> io::Result<()> {
        let rule = "=".repeat(50);
        writeln!(self.out)?;
        writeln!(self.out, "{rule}")?;
        writeln!(self.out, "COMPRESSION SUMMARY")?;
        writeln!(self.out, "{rule}")?;
        writeln!(self.out, "Files processed: {}/{}", summary.succeeded, summary.attempted)?;
        if summary.failed > 0 {
            writeln!(self.out, "Files failed: {}", summary.failed)?;
        }
        writeln!(self.out, "Total original size: {} bytes", summary.original_bytes.to_formatted_string(&Locale::en))?;
        writeln!(self.out, "Total compressed size: {} bytes", summary.compressed_bytes.to_formatted_string(&Locale::en))?;
        writeln!(self.out, "Average compression ratio: {:.1}%", summary.overall_ratio())?;
        writeln!(self.out, "Total time: {:.2} seconds", summary.elapsed.as_secs_f64())?;
        writeln!(
            self.out,
            "Average time per file: {:.2} seconds",
            summary.average_time_per_job().as_secs_f64()
        )?;
        self.out.flush()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}
