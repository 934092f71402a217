use crate::codec::Algorithm;
use crate::dispatch::Strategy;
use crate::report::BatchSummary;
use prettytable::{row, Table};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchmarkError {
    #[error("failed to run `{}`: {source}", .program.display())]
    Launch { program: PathBuf, source: io::Error },

    #[error("{case} exited with {status}")]
    Failed { case: String, status: ExitStatus },

    #[error("cannot clear `{}`: {source}", .path.display())]
    Cleanup { path: PathBuf, source: io::Error },

    #[error("cannot read summary `{}`: {message}", .path.display())]
    Summary { path: PathBuf, message: String },
}

/// One benchmark run: an algorithm at a concurrency ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchmarkCase {
    pub algorithm: Algorithm,
    pub jobs: usize,
    pub strategy: Strategy,
    pub iteration: usize,
}

impl BenchmarkCase {
    pub fn label(&self) -> String {
        format!(
            "{} jobs={} strategy={} iteration={}",
            self.algorithm, self.jobs, self.strategy, self.iteration
        )
    }
}

/// Measurements of one run, derived from its summary JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub algorithm: Algorithm,
    pub jobs: usize,
    pub strategy: Strategy,
    pub iteration: usize,
    pub files: usize,
    pub succeeded: usize,
    pub seconds: f64,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    pub ratio: f64,
}

impl BenchmarkRecord {
    pub fn from_summary(case: &BenchmarkCase, summary: &BatchSummary) -> Self {
        Self {
            algorithm: case.algorithm,
            jobs: case.jobs,
            strategy: case.strategy,
            iteration: case.iteration,
            files: summary.attempted,
            succeeded: summary.succeeded,
            seconds: summary.elapsed.as_secs_f64(),
            original_bytes: summary.original_bytes,
            compressed_bytes: summary.compressed_bytes,
            ratio: summary.overall_ratio(),
        }
    }

    /// Original megabytes compressed per second of wall time.
    pub fn throughput(&self) -> f64 {
        if self.seconds > 0.0 {
            self.original_bytes as f64 / self.seconds / 1_000_000.0
        } else {
            0.0
        }
    }
}

/// Runs `compressor` on `files` for one case and reads back its summary.
///
/// Compressed output goes to `work_dir/compressed`, which is cleared first.
pub fn run_case(
    compressor: &Path,
    case: &BenchmarkCase,
    files: &[PathBuf],
    work_dir: &Path,
) -> Result<BenchmarkRecord, BenchmarkError> {
    let output_dir = work_dir.join("compressed");
    let summary_path = work_dir.join("summary.json");
    if output_dir.exists() {
        fs::remove_dir_all(&output_dir).map_err(|source| BenchmarkError::Cleanup {
            path: output_dir.clone(),
            source,
        })?;
    }

    let status = Command::new(compressor)
        .args(files)
        .arg("--algorithm")
        .arg(case.algorithm.to_string())
        .arg("--jobs")
        .arg(case.jobs.to_string())
        .arg("--strategy")
        .arg(case.strategy.to_string())
        .arg("--output-dir")
        .arg(&output_dir)
        .arg("--summary-json")
        .arg(&summary_path)
        .stdout(Stdio::null())
        .status()
        .map_err(|source| BenchmarkError::Launch {
            program: compressor.to_path_buf(),
            source,
        })?;
    if !status.success() {
        return Err(BenchmarkError::Failed {
            case: case.label(),
            status,
        });
    }

    let summary: BatchSummary = fs::read_to_string(&summary_path)
        .map_err(|e| e.to_string())
        .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()))
        .map_err(|message| BenchmarkError::Summary {
            path: summary_path.clone(),
            message,
        })?;

    Ok(BenchmarkRecord::from_summary(case, &summary))
}

/// Appends one plain-text block per record; earlier blocks are never rewritten.
pub fn append_record_block(log: &Path, record: &BenchmarkRecord) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(log)?;
    let block = format!(
        "=== {} | jobs={} | strategy={} | iteration={} ===\n\
         files: {} ({} succeeded)\n\
         time: {:.3} s\n\
         original bytes: {}\n\
         compressed bytes: {}\n\
         ratio: {:.1}%\n\n",
        record.algorithm,
        record.jobs,
        record.strategy,
        record.iteration,
        record.files,
        record.succeeded,
        record.seconds,
        record.original_bytes,
        record.compressed_bytes,
        record.ratio,
    );
    file.write_all(block.as_bytes())
}

/// Mean over all iterations of one (algorithm, strategy, jobs) combination.
#[derive(Debug, Clone, PartialEq)]
pub struct AveragedRecord {
    pub algorithm: Algorithm,
    pub strategy: Strategy,
    pub jobs: usize,
    pub runs: usize,
    pub seconds: f64,
    pub ratio: f64,
    pub throughput: f64,
}

pub fn average_records(records: &[BenchmarkRecord]) -> Vec<AveragedRecord> {
    // Group results by algorithm, strategy and ceiling
    let mut grouped: HashMap<(Algorithm, Strategy, usize), Vec<&BenchmarkRecord>> = HashMap::new();
    for record in records {
        grouped
            .entry((record.algorithm, record.strategy, record.jobs))
            .or_default()
            .push(record);
    }

    let mut averaged: Vec<AveragedRecord> = grouped
        .into_iter()
        .map(|((algorithm, strategy, jobs), group)| {
            let len = group.len() as f64;
            AveragedRecord {
                algorithm,
                strategy,
                jobs,
                runs: group.len(),
                seconds: group.iter().map(|r| r.seconds).sum::<f64>() / len,
                ratio: group.iter().map(|r| r.ratio).sum::<f64>() / len,
                throughput: group.iter().map(|r| r.throughput()).sum::<f64>() / len,
            }
        })
        .collect();
    averaged.sort_by_key(|r| (r.algorithm.to_string(), r.strategy.to_string(), r.jobs));
    averaged
}

/// Prints one table per algorithm and strategy, with speedup relative to the smallest ceiling.
pub fn print_benchmark_results(records: &[BenchmarkRecord]) {
    let averaged = average_records(records);

    let mut groups: Vec<((Algorithm, Strategy), Vec<&AveragedRecord>)> = Vec::new();
    for record in &averaged {
        let key = (record.algorithm, record.strategy);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, rows)) => rows.push(record),
            None => groups.push((key, vec![record])),
        }
    }

    for ((algorithm, strategy), rows) in groups {
        let baseline = rows.first().map(|r| r.seconds).unwrap_or(0.0);

        let mut table = Table::new();
        table.add_row(row!["Jobs", "Runs", "Avg Time (s)", "Speedup", "Avg Ratio (%)", "Throughput (MB/s)"]);
        for r in &rows {
            let speedup = if r.seconds > 0.0 { baseline / r.seconds } else { 0.0 };
            table.add_row(row![
                r.jobs,
                r.runs,
                format!("{:.3}", r.seconds),
                format!("{:.2}x", speedup),
                format!("{:.1}", r.ratio),
                format!("{:.2}", r.throughput),
            ]);
        }

        let len = rows.len() as f64;
        table.add_row(row![
            "AVERAGE",
            rows.iter().map(|r| r.runs).sum::<usize>(),
            format!("{:.3}", rows.iter().map(|r| r.seconds).sum::<f64>() / len),
            "",
            format!("{:.1}", rows.iter().map(|r| r.ratio).sum::<f64>() / len),
            format!("{:.2}", rows.iter().map(|r| r.throughput).sum::<f64>() / len),
        ]);

        println!("\nResults for {} ({})", algorithm.to_string().to_uppercase(), strategy);
        table.printstd();
    }
}
