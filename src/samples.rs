use crate::error::CompressError;
use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};

/// Sentences cycled through for text samples, one per file in turn.
const TEXT_PATTERNS: [&str; 5] = [
    "This is a sample text file with repeated content. ",
    "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ",
    "The quick brown fox jumps over the lazy dog. ",
    "Rust is a powerful programming language for data processing. ",
    "Compression algorithms reduce file size by removing redundancy. ",
];

/// What goes into a generated sample file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SampleKind {
    /// Highly repetitive sentences.
    Text,
    /// Uniformly random, incompressible bytes.
    Random,
    /// First half text, second half random.
    Mixed,
}

#[derive(Debug, Clone)]
pub struct SampleSpec {
    pub directory: PathBuf,
    pub count: usize,
    pub size_kb: usize,
    pub kind: SampleKind,
    /// Seed for random content; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl SampleSpec {
    /// Text samples as created by `parallel_compress --create-samples`.
    pub fn text(directory: impl Into<PathBuf>, count: usize, size_kb: usize) -> Self {
        Self {
            directory: directory.into(),
            count,
            size_kb,
            kind: SampleKind::Text,
            seed: None,
        }
    }
}

/// Writes `spec.count` files of exactly `spec.size_kb` KiB each and returns their paths.
///
/// Files are named `sample_1.txt`, `sample_2.txt`, ... (`.bin` for non-text kinds)
/// and overwritten if they already exist.
pub fn create_sample_files(spec: &SampleSpec) -> Result<Vec<PathBuf>, CompressError> {
    fs::create_dir_all(&spec.directory).map_err(|e| CompressError::io("create sample directory", &spec.directory, e))?;

    let mut rng = match spec.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let target = spec.size_kb * 1024;

    let mut created = Vec::with_capacity(spec.count);
    for i in 0..spec.count {
        let content = match spec.kind {
            SampleKind::Text => text_content(i, target),
            SampleKind::Random => random_content(&mut rng, target),
            SampleKind::Mixed => {
                let mut content = text_content(i, target / 2);
                content.extend(random_content(&mut rng, target - target / 2));
                content
            }
        };

        let path = sample_path(&spec.directory, i, spec.kind);
        fs::write(&path, &content).map_err(|e| CompressError::io("write sample file", &path, e))?;
        created.push(path);
    }
    Ok(created)
}

fn sample_path(directory: &Path, i: usize, kind: SampleKind) -> PathBuf {
    let extension = match kind {
        SampleKind::Text => "txt",
        SampleKind::Random | SampleKind::Mixed => "bin",
    };
    directory.join(format!("sample_{}.{}", i + 1, extension))
}

fn text_content(i: usize, len: usize) -> Vec<u8> {
    TEXT_PATTERNS[i % TEXT_PATTERNS.len()]
        .bytes()
        .cycle()
        .take(len)
        .collect()
}

fn random_content(rng: &mut StdRng, len: usize) -> Vec<u8> {
    let mut content = vec![0u8; len];
    rng.fill_bytes(&mut content);
    content
}
