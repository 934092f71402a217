use flate2::read::GzDecoder;
use parallel_compress_rs::report::BatchSummary;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::tempdir;

const BIN: &str = env!("CARGO_BIN_EXE_parallel_compress");

fn have(program: &str) -> bool {
    which::which(program).is_ok()
}

fn run(args: &[&str]) -> Output {
    Command::new(BIN)
        .args(args)
        .env_remove("PARALLEL_COMPRESS_ALGORITHM")
        .env_remove("PARALLEL_COMPRESS_JOBS")
        .env_remove("PARALLEL_COMPRESS_STRATEGY")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn gunzip(path: &Path) -> Vec<u8> {
    let mut decoded = Vec::new();
    GzDecoder::new(fs::File::open(path).unwrap())
        .read_to_end(&mut decoded)
        .unwrap();
    decoded
}

#[test]
fn test_unknown_algorithm_is_rejected() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("a.txt");
    fs::write(&source, b"abc").unwrap();

    let output = run(&[path_arg(&source).as_str(), "--algorithm", "foo"]);
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn test_invalid_job_counts_are_rejected() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("a.txt");
    fs::write(&source, b"abc").unwrap();
    let source = path_arg(&source);

    assert_eq!(run(&[source.as_str(), "--jobs", "0"]).status.code(), Some(2));
    assert_eq!(run(&[source.as_str(), "--jobs", "-1"]).status.code(), Some(2));
    assert_eq!(run(&[source.as_str(), "-j", "two"]).status.code(), Some(2));
}

#[test]
fn test_out_of_range_level_names_the_level() {
    let output = run(&["whatever.txt", "--level", "12"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("level 12"));
}

#[test]
fn test_no_input_files_fails() {
    let output = run(&[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("--create-samples"));
}

#[test]
fn test_missing_codec_binary_exits_127() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("a.txt");
    fs::write(&source, b"abc").unwrap();

    let output = run(&[path_arg(&source).as_str(), "--codec-binary", "no-such-codec-binary"]);
    assert_eq!(output.status.code(), Some(127));
    assert!(!dir.path().join("a.txt.gz").exists());
}

#[test]
fn test_missing_input_is_skipped_with_warning() {
    if !have("gzip") {
        eprintln!("skipping: gzip not installed");
        return;
    }
    let dir = tempdir().unwrap();
    let present = dir.path().join("present.txt");
    fs::write(&present, "hello hello hello").unwrap();
    let ghost = dir.path().join("ghost.txt");

    let output = run(&[path_arg(&present).as_str(), path_arg(&ghost).as_str()]);
    assert_eq!(output.status.code(), Some(0));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ghost.txt does not exist, skipping"));
    assert!(stdout.contains("Files processed: 1/1"));
    assert_eq!(gunzip(&dir.path().join("present.txt.gz")), b"hello hello hello");

    // stderr is a pipe here, so log lines carry no colour codes
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("skipping missing input"));
    assert!(!stderr.contains('\x1b'));
}

#[test]
fn test_three_files_with_two_workers() {
    if !have("gzip") {
        eprintln!("skipping: gzip not installed");
        return;
    }
    let dir = tempdir().unwrap();
    let inputs = [("one.txt", 1000usize), ("two.txt", 2000), ("empty.txt", 0)];
    let mut args = Vec::new();
    for (name, size) in inputs {
        let path = dir.path().join(name);
        fs::write(&path, "x".repeat(size)).unwrap();
        args.push(path_arg(&path));
    }
    let out = dir.path().join("out");
    let summary_path = dir.path().join("summary.json");
    args.extend(["-a", "gzip", "-j", "2", "-o"].map(String::from));
    args.push(path_arg(&out));
    args.push("--summary-json".to_string());
    args.push(path_arg(&summary_path));

    let argv: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = run(&argv);
    assert_eq!(output.status.code(), Some(0));

    for (name, size) in inputs {
        let decoded = gunzip(&out.join(format!("{name}.gz")));
        assert_eq!(decoded.len(), size);
        assert!(dir.path().join(name).exists());
    }

    let summary: BatchSummary = serde_json::from_str(&fs::read_to_string(&summary_path).unwrap()).unwrap();
    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.original_bytes, 3000);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Workers: 2"));
    assert!(stdout.contains("✓ empty.txt -> empty.txt.gz"));
    assert!(stdout.contains("Ratio: 0.0%"));
}

#[test]
fn test_fan_out_matches_direct_at_ceiling_one() {
    if !have("gzip") || !have("xargs") {
        eprintln!("skipping: gzip or xargs not installed");
        return;
    }
    let dir = tempdir().unwrap();
    let mut sources = Vec::new();
    for (i, size) in [300usize, 5000, 42].into_iter().enumerate() {
        let path = dir.path().join(format!("input-{i}.txt"));
        fs::write(&path, "abcabcabd".repeat(size)).unwrap();
        sources.push(path_arg(&path));
    }

    let mut summaries = Vec::new();
    for strategy in ["direct", "fan-out"] {
        let out = path_arg(&dir.path().join(strategy));
        let summary_path = dir.path().join(format!("{strategy}.json"));
        let summary_arg = path_arg(&summary_path);

        let mut argv: Vec<&str> = sources.iter().map(String::as_str).collect();
        argv.extend(["-j", "1", "-v", "-s", strategy, "-o", out.as_str(), "--summary-json", summary_arg.as_str()]);
        let output = run(&argv);
        assert_eq!(output.status.code(), Some(0), "{strategy} run failed");
        assert!(String::from_utf8_lossy(&output.stdout).contains(&format!("Strategy: {strategy}")));

        let summary: BatchSummary = serde_json::from_str(&fs::read_to_string(&summary_path).unwrap()).unwrap();
        summaries.push(summary);
    }

    let (direct, fan_out) = (&summaries[0], &summaries[1]);
    assert_eq!(direct.attempted, 3);
    assert_eq!(fan_out.attempted, direct.attempted);
    assert_eq!(fan_out.succeeded, direct.succeeded);
    assert_eq!(fan_out.original_bytes, direct.original_bytes);
    assert_eq!(fan_out.compressed_bytes, direct.compressed_bytes);
    assert_eq!(
        gunzip(&dir.path().join("fan-out/input-1.txt.gz")),
        gunzip(&dir.path().join("direct/input-1.txt.gz"))
    );
}

#[test]
fn test_create_samples_then_exit() {
    let dir = tempdir().unwrap();
    let samples = dir.path().join("samples");

    let output = run(&[
        "--create-samples",
        "--sample-count",
        "2",
        "--sample-size",
        "1",
        "--sample-dir",
        path_arg(&samples).as_str(),
    ]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(fs::metadata(samples.join("sample_2.txt")).unwrap().len(), 1024);
    assert!(String::from_utf8_lossy(&output.stdout).contains("Sample files created"));
}
