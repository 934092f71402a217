use crate::codec::Algorithm;
use crate::error::{CompressError, JobFailure};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One file slated for compression, with everything needed to compress it.
///
/// Immutable once built: the destination is derived from the source, the
/// algorithm and the output directory and cannot drift from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    source: PathBuf,
    algorithm: Algorithm,
    level: Option<u32>,
    output_dir: Option<PathBuf>,
    destination: PathBuf,
}

impl JobDescriptor {
    /// Builds a descriptor, validating `level` against the codec's range.
    pub fn new(
        source: impl Into<PathBuf>,
        algorithm: Algorithm,
        level: Option<u32>,
        output_dir: Option<&Path>,
    ) -> Result<Self, CompressError> {
        let source = source.into();
        let level = level.map(|level| algorithm.validate_level(level)).transpose()?;
        let destination = algorithm.destination_for(&source, output_dir);

        Ok(Self {
            source,
            algorithm,
            level,
            output_dir: output_dir.map(Path::to_path_buf),
            destination,
        })
    }

    /// Rebuilds a descriptor from an already-resolved destination.
    ///
    /// Used by fan-out workers, which receive the destination computed by the
    /// dispatching process rather than recomputing it.
    pub fn with_destination(
        source: impl Into<PathBuf>,
        algorithm: Algorithm,
        level: u32,
        destination: impl Into<PathBuf>,
    ) -> Result<Self, CompressError> {
        let destination = destination.into();
        Ok(Self {
            source: source.into(),
            algorithm,
            level: Some(algorithm.validate_level(level)?),
            output_dir: destination.parent().map(Path::to_path_buf),
            destination,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn level(&self) -> Option<u32> {
        self.level
    }

    /// The requested level, or the codec default.
    pub fn effective_level(&self) -> u32 {
        self.level.unwrap_or_else(|| self.algorithm.codec().default_level())
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

/// Terminal state of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded { compressed_size: u64 },
    Failed { failure: JobFailure },
}

/// Outcome and measurements for one descriptor. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub descriptor: JobDescriptor,
    pub outcome: JobOutcome,
    pub original_size: u64,
    pub elapsed: Duration,
}

impl JobResult {
    pub fn succeeded(descriptor: JobDescriptor, original_size: u64, compressed_size: u64, elapsed: Duration) -> Self {
        Self {
            descriptor,
            outcome: JobOutcome::Succeeded { compressed_size },
            original_size,
            elapsed,
        }
    }

    pub fn failed(descriptor: JobDescriptor, original_size: u64, failure: JobFailure, elapsed: Duration) -> Self {
        Self {
            descriptor,
            outcome: JobOutcome::Failed { failure },
            original_size,
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Succeeded { .. })
    }

    /// Size of the output file; only known for successful jobs.
    pub fn compressed_size(&self) -> Option<u64> {
        match self.outcome {
            JobOutcome::Succeeded { compressed_size } => Some(compressed_size),
            JobOutcome::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match &self.outcome {
            JobOutcome::Succeeded { .. } => None,
            JobOutcome::Failed { failure } => Some(failure),
        }
    }

    /// Space saved as a percentage of the original size.
    ///
    /// An empty source reports 0%. Failed jobs have no ratio.
    pub fn compression_ratio(&self) -> Option<f64> {
        let compressed = self.compressed_size()?;
        Some(reduction_percent(self.original_size, compressed))
    }
}

/// `(1 - compressed / original) * 100`, defined as 0 for an empty original.
pub fn reduction_percent(original: u64, compressed: u64) -> f64 {
    if original == 0 {
        0.0
    } else {
        (1.0 - compressed as f64 / original as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gzip_job(source: &str) -> JobDescriptor {
        JobDescriptor::new(source, Algorithm::Gzip, None, None).unwrap()
    }

    #[test]
    fn descriptor_rejects_out_of_range_level() {
        let err = JobDescriptor::new("a.txt", Algorithm::Gzip, Some(0), None).unwrap_err();
        assert!(matches!(err, CompressError::InvalidLevel { level: 0, .. }));
    }

    #[test]
    fn effective_level_falls_back_to_codec_default() {
        assert_eq!(gzip_job("a.txt").effective_level(), 6);

        let bzip2 = JobDescriptor::new("a.txt", Algorithm::Bzip2, None, None).unwrap();
        assert_eq!(bzip2.effective_level(), 9);

        let explicit = JobDescriptor::new("a.txt", Algorithm::Xz, Some(0), None).unwrap();
        assert_eq!(explicit.effective_level(), 0);
    }

    #[test]
    fn ratio_of_empty_source_is_zero() {
        let result = JobResult::succeeded(gzip_job("empty"), 0, 20, Duration::ZERO);
        assert_eq!(result.compression_ratio(), Some(0.0));
    }

    #[test]
    fn ratio_is_percentage_saved() {
        let result = JobResult::succeeded(gzip_job("a.txt"), 1000, 250, Duration::ZERO);
        assert_eq!(result.compression_ratio(), Some(75.0));
    }

    #[test]
    fn failed_result_has_no_size_or_ratio() {
        let result = JobResult::failed(gzip_job("a.txt"), 1000, JobFailure::SourceMissing, Duration::ZERO);
        assert!(!result.is_success());
        assert_eq!(result.compressed_size(), None);
        assert_eq!(result.compression_ratio(), None);
        assert_eq!(result.failure(), Some(&JobFailure::SourceMissing));
    }

    #[test]
    fn result_survives_json_transport() {
        let result = JobResult::failed(
            gzip_job("a.txt"),
            12,
            JobFailure::ExitStatus { code: 1, stderr: "boom".into() },
            Duration::from_millis(5),
        );
        let json = serde_json::to_string(&result).unwrap();
        let back: JobResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
