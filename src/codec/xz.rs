use crate::codec::Codec;
use std::ffi::OsString;
use std::ops::RangeInclusive;

/// xz presets; `-0` is a valid (fastest) preset, unlike gzip and bzip2.
pub struct XzCodec;

impl Codec for XzCodec {
    fn name(&self) -> &str {
        "xz"
    }

    fn binary(&self) -> &str {
        "xz"
    }

    fn suffix(&self) -> &str {
        ".xz"
    }

    fn level_range(&self) -> RangeInclusive<u32> {
        0..=9
    }

    fn default_level(&self) -> u32 {
        6
    }

    fn args(&self, level: u32) -> Vec<OsString> {
        // Single-threaded: parallelism comes from the dispatcher
        vec![
            OsString::from("-c"),
            OsString::from(format!("-{level}")),
            OsString::from("--threads=1"),
        ]
    }
}
