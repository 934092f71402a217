use crate::codec::Algorithm;
use crate::report::BatchSummary;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Exit code for invalid arguments (matches clap's own usage errors).
pub const EXIT_VALIDATION: u8 = 2;
/// Exit code when no work could be prepared.
pub const EXIT_FAILURE: u8 = 1;
/// Exit code when the codec executable cannot be found.
pub const EXIT_CODEC_NOT_FOUND: u8 = 127;
/// Exit code after SIGINT/SIGTERM stopped the batch.
pub const EXIT_INTERRUPTED: u8 = 130;

/// Fatal errors that stop the tool before or while dispatching a batch.
#[derive(Debug, Error)]
pub enum CompressError {
    #[error("compression level {level} is out of range for {algorithm} (expected {min}..={max})")]
    InvalidLevel {
        algorithm: Algorithm,
        level: u32,
        min: u32,
        max: u32,
    },

    #[error("job count must be a positive integer, got {0}")]
    InvalidJobs(usize),

    #[error("no input files given (use --create-samples to create test files)")]
    NoInputFiles,

    #[error("no valid files found to compress")]
    NoValidInputs,

    #[error("codec binary `{binary}` for {algorithm} was not found: {source}")]
    CodecNotFound {
        algorithm: Algorithm,
        binary: String,
        source: which::Error,
    },

    #[error("failed to {operation} `{}`: {source}", .path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        source: io::Error,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl CompressError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CompressError::InvalidLevel { .. } | CompressError::InvalidJobs(_) => EXIT_VALIDATION,
            CompressError::CodecNotFound { .. } => EXIT_CODEC_NOT_FOUND,
            CompressError::Dispatch(DispatchError::Interrupted { .. }) => EXIT_INTERRUPTED,
            CompressError::NoInputFiles
            | CompressError::NoValidInputs
            | CompressError::Io { .. }
            | CompressError::Dispatch(_) => EXIT_FAILURE,
        }
    }

    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        CompressError::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Errors raised by a job runner itself, as opposed to failures of single jobs.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to start fan-out helper `{}`: {source}", .helper.display())]
    HelperSpawn { helper: PathBuf, source: io::Error },

    #[error("lost contact with fan-out helper: {0}")]
    HelperIo(#[source] io::Error),

    #[error("batch interrupted after {} of its jobs reported", .summary.attempted)]
    Interrupted { summary: BatchSummary },
}

/// Why a single unit of work failed. Carried inside a `JobResult`, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobFailure {
    #[error("source file does not exist or is not a regular file")]
    SourceMissing,

    #[error("cannot read source file: {message}")]
    SourceUnreadable { message: String },

    #[error("cannot create destination directory: {message}")]
    CreateDestination { message: String },

    #[error("cannot start codec `{program}`: {message}")]
    Spawn { program: String, message: String },

    #[error("lost track of codec process: {message}")]
    Wait { message: String },

    #[error("codec exited with status {code}{}", stderr_suffix(.stderr))]
    ExitStatus { code: i32, stderr: String },

    #[error("codec was terminated by a signal")]
    Signalled,

    #[error("codec reported success but produced no output file")]
    OutputMissing,

    #[error("cannot move compressed output into place: {message}")]
    Finalize { message: String },

    #[error("worker panicked while compressing")]
    WorkerPanicked,

    #[error("fan-out helper finished without reporting this job")]
    NotReported,
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}
