use crate::codec::Codec;
use std::ops::RangeInclusive;

pub struct Bzip2Codec;

impl Codec for Bzip2Codec {
    fn name(&self) -> &str {
        "bzip2"
    }

    fn binary(&self) -> &str {
        "bzip2"
    }

    fn suffix(&self) -> &str {
        ".bz2"
    }

    // Block size in units of 100k
    fn level_range(&self) -> RangeInclusive<u32> {
        1..=9
    }

    fn default_level(&self) -> u32 {
        9
    }
}
