pub mod bzip2;
pub mod gzip;
pub mod xz;

use crate::error::CompressError;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use self::bzip2::Bzip2Codec;
use self::gzip::GzipCodec;
use self::xz::XzCodec;

/// Describes how an external compression program is driven.
///
/// Every codec is invoked as `<binary> <args> -- <source>` and writes the
/// compressed stream to stdout; the invoker redirects stdout into the output
/// file. Success is reported through the exit status alone.
pub trait Codec: Sync {
    /// Returns the name of the codec.
    fn name(&self) -> &str;

    /// Default executable looked up on `PATH`.
    fn binary(&self) -> &str;

    /// Suffix appended to the source file name to form the destination.
    fn suffix(&self) -> &str;

    /// Levels the codec accepts.
    fn level_range(&self) -> RangeInclusive<u32>;

    /// Level used when none is requested.
    fn default_level(&self) -> u32;

    /// Arguments preceding `-- <source>`.
    fn args(&self, level: u32) -> Vec<OsString> {
        vec![OsString::from("-c"), OsString::from(format!("-{level}"))]
    }
}

/// The compression algorithms the tool can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Gzip,
    Bzip2,
    Xz,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [Algorithm::Gzip, Algorithm::Bzip2, Algorithm::Xz];

    /// Returns the codec contract for this algorithm.
    pub fn codec(self) -> &'static dyn Codec {
        match self {
            Algorithm::Gzip => &GzipCodec,
            Algorithm::Bzip2 => &Bzip2Codec,
            Algorithm::Xz => &XzCodec,
        }
    }

    /// Checks `level` against the codec-specific range.
    pub fn validate_level(self, level: u32) -> Result<u32, CompressError> {
        let range = self.codec().level_range();
        if range.contains(&level) {
            Ok(level)
        } else {
            Err(CompressError::InvalidLevel {
                algorithm: self,
                level,
                min: *range.start(),
                max: *range.end(),
            })
        }
    }

    /// Resolves the executable to run, honouring an explicit override.
    ///
    /// Checked once per batch; a missing binary is fatal.
    pub fn locate(self, program: Option<&Path>) -> Result<PathBuf, CompressError> {
        let binary: &Path = match program {
            Some(program) => program,
            None => Path::new(self.codec().binary()),
        };

        which::which(binary).map_err(|source| CompressError::CodecNotFound {
            algorithm: self,
            binary: binary.display().to_string(),
            source,
        })
    }

    /// Destination for `source`, placed in `output_dir` when one is given.
    pub fn destination_for(self, source: &Path, output_dir: Option<&Path>) -> PathBuf {
        let suffix = self.codec().suffix();
        let mut file_name = source.file_name().map(|name| name.to_os_string()).unwrap_or_default();
        file_name.push(suffix);

        match output_dir {
            Some(dir) => dir.join(file_name),
            None => {
                // Append rather than replace the extension: notes.txt -> notes.txt.gz
                let mut path = source.as_os_str().to_os_string();
                path.push(suffix);
                PathBuf::from(path)
            }
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.codec().name())
    }
}
