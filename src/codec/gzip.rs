use crate::codec::Codec;
use std::ops::RangeInclusive;

/// `gzip -c -<1..9>`; any gzip-compatible program (pigz) can stand in.
pub struct GzipCodec;

impl Codec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn binary(&self) -> &str {
        "gzip"
    }

    fn suffix(&self) -> &str {
        ".gz"
    }

    fn level_range(&self) -> RangeInclusive<u32> {
        1..=9
    }

    fn default_level(&self) -> u32 {
        6
    }
}
