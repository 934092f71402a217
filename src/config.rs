use crate::cli::BatchArgs;
use crate::codec::Algorithm;
use crate::dispatch::{Concurrency, DispatchOptions, Strategy};
use crate::error::CompressError;
use std::path::PathBuf;

/// Validated settings for one compression batch.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub files: Vec<PathBuf>,
    pub algorithm: Algorithm,
    /// Checked against the codec's range; `None` means the codec default.
    pub level: Option<u32>,
    pub output_dir: Option<PathBuf>,
    /// Explicit ceiling; `None` derives one from the CPU and file counts.
    pub jobs: Option<Concurrency>,
    pub strategy: Strategy,
    pub fan_out_helper: PathBuf,
    pub codec_program: Option<PathBuf>,
    pub summary_json: Option<PathBuf>,
    pub verbose: bool,
}

impl BatchConfig {
    pub fn from_args(args: &BatchArgs) -> Result<Self, CompressError> {
        let level = args
            .level
            .map(|level| args.algorithm.validate_level(level))
            .transpose()?;
        let jobs = args
            .jobs
            .map(|jobs| Concurrency::new(jobs).ok_or(CompressError::InvalidJobs(jobs)))
            .transpose()?;

        Ok(Self {
            files: args.files.clone(),
            algorithm: args.algorithm,
            level,
            output_dir: args.output_dir.clone(),
            jobs,
            strategy: args.strategy,
            fan_out_helper: args.fan_out_helper.clone(),
            codec_program: args.codec_binary.clone(),
            summary_json: args.summary_json.clone(),
            verbose: args.verbose,
        })
    }

    pub fn effective_level(&self) -> u32 {
        self.level.unwrap_or_else(|| self.algorithm.codec().default_level())
    }

    /// The requested ceiling, or one slot per CPU capped at `files`.
    pub fn ceiling(&self, files: usize) -> Concurrency {
        self.jobs.unwrap_or_else(|| Concurrency::default_for(files))
    }

    pub fn dispatch_options(&self, files: usize, worker: Option<PathBuf>) -> DispatchOptions {
        DispatchOptions {
            strategy: self.strategy,
            ceiling: self.ceiling(files),
            helper: self.fan_out_helper.clone(),
            worker,
            codec_program: self.codec_program.clone(),
        }
    }
}
