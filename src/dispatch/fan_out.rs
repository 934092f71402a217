//! Fan-out strategy: scheduling delegated to an external helper.
//!
//! The helper (`xargs -0 -P <ceiling> -n 5` by default) reads one record per
//! job from stdin and starts one worker process per record, never more than
//! the ceiling at once. Each worker is this tool's hidden `invoke-job`
//! subcommand: it runs the same `CodecInvoker` as the direct strategy and
//! prints a single JSON `WorkerReport` line, which this runner streams back as
//! soon as it appears on the helper's stdout.

use crate::codec::Algorithm;
use crate::dispatch::children::{ChildHandle, ChildRegistry};
use crate::dispatch::direct::DirectRunner;
use crate::dispatch::{plan_waves, JobRunner, RunContext, SHUTDOWN_POLL};
use crate::error::{CompressError, DispatchError, JobFailure};
use crate::invoker::{remove_partial_output, CodecInvoker, Invoke};
use crate::job::{JobDescriptor, JobOutcome, JobResult};
use crossbeam::channel::{self, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Hidden subcommand that runs a single job and prints its `WorkerReport`.
pub const WORKER_SUBCOMMAND: &str = "invoke-job";

/// Hidden subcommand a worker executable answers with `WORKER_CHECK_REPLY`.
pub const WORKER_CHECK_SUBCOMMAND: &str = "worker-check";

pub const WORKER_CHECK_REPLY: &str = concat!("parallel_compress worker ", env!("CARGO_PKG_VERSION"));

/// Records per job on the helper's stdin: index, algorithm, level, destination, source.
pub const WORKER_ARGS_PER_JOB: usize = 5;

const WORKER_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Codec stderr carried in a report is cut to this many bytes so one report
/// stays well below `PIPE_BUF` and concurrent workers cannot interleave lines.
const MAX_REPORT_DETAIL: usize = 512;

/// Line printed by a fan-out worker.
///
/// The descriptor is not echoed back: the dispatching process already holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub index: usize,
    pub outcome: JobOutcome,
    pub original_size: u64,
    pub elapsed: Duration,
}

impl WorkerReport {
    fn new(index: usize, result: JobResult) -> Self {
        let outcome = match result.outcome {
            JobOutcome::Failed { failure } => JobOutcome::Failed {
                failure: clip_detail(failure),
            },
            succeeded => succeeded,
        };
        Self {
            index,
            outcome,
            original_size: result.original_size,
            elapsed: result.elapsed,
        }
    }

    pub fn into_result(self, descriptor: JobDescriptor) -> JobResult {
        JobResult {
            descriptor,
            outcome: self.outcome,
            original_size: self.original_size,
            elapsed: self.elapsed,
        }
    }
}

fn clip_detail(failure: JobFailure) -> JobFailure {
    match failure {
        JobFailure::ExitStatus { code, mut stderr } if stderr.len() > MAX_REPORT_DETAIL => {
            let mut cut = MAX_REPORT_DETAIL;
            while !stderr.is_char_boundary(cut) {
                cut -= 1;
            }
            stderr.truncate(cut);
            JobFailure::ExitStatus { code, stderr }
        }
        other => other,
    }
}

/// Why the fan-out strategy cannot be used on this host.
#[derive(Debug, Error)]
pub enum FanOutUnavailable {
    #[error("helper `{}` not found: {source}", .helper.display())]
    Helper { helper: PathBuf, source: which::Error },

    #[error("no worker executable configured")]
    NoWorker,

    #[error("worker executable `{}` does not exist", .0.display())]
    WorkerMissing(PathBuf),

    #[error("`{}` does not answer the `{check}` handshake", .0.display(), check = WORKER_CHECK_SUBCOMMAND)]
    WorkerUnresponsive(PathBuf),
}

/// How one wave through the helper ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaveOutcome {
    Finished,
    Cancelled,
    /// The helper ran but not a single worker reported back.
    HelperFailed,
}

pub struct FanOutRunner {
    helper: PathBuf,
    worker: PathBuf,
    codec_program: Option<PathBuf>,
    registry: ChildRegistry,
    fallback: DirectRunner<CodecInvoker>,
}

impl FanOutRunner {
    /// Resolves the helper on `PATH` and checks the worker executable answers
    /// the handshake.
    pub fn detect(helper: &Path, worker: Option<&Path>, codec_program: Option<PathBuf>) -> Result<Self, FanOutUnavailable> {
        let helper = which::which(helper).map_err(|source| FanOutUnavailable::Helper {
            helper: helper.to_path_buf(),
            source,
        })?;
        let worker = worker.ok_or(FanOutUnavailable::NoWorker)?;
        if !worker.is_file() {
            return Err(FanOutUnavailable::WorkerMissing(worker.to_path_buf()));
        }
        if !worker_answers(worker) {
            return Err(FanOutUnavailable::WorkerUnresponsive(worker.to_path_buf()));
        }

        Ok(Self {
            helper,
            worker: worker.to_path_buf(),
            fallback: DirectRunner::new(CodecInvoker::new().with_program(codec_program.clone())),
            codec_program,
            registry: ChildRegistry::new(),
        })
    }

    fn helper_command(&self, ctx: &RunContext<'_>) -> Command {
        let mut command = Command::new(&self.helper);
        command
            .arg("-0")
            .arg("-P")
            .arg(ctx.ceiling.to_string())
            .arg("-n")
            .arg(WORKER_ARGS_PER_JOB.to_string())
            .arg(&self.worker)
            .arg(WORKER_SUBCOMMAND);
        if let Some(program) = &self.codec_program {
            command.arg("--codec-binary").arg(program);
        }
        // Job records may start with '-'
        command
            .arg("--")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group so shutdown can signal the helper and all its workers at once
            command.process_group(0);
        }
        command
    }

    fn run_wave(
        &self,
        jobs: &[JobDescriptor],
        wave: &[usize],
        ctx: &RunContext<'_>,
        on_result: &mut dyn FnMut(JobResult),
    ) -> Result<WaveOutcome, DispatchError> {
        let mut child = self
            .helper_command(ctx)
            .spawn()
            .map_err(|source| DispatchError::HelperSpawn {
                helper: self.helper.clone(),
                source,
            })?;
        let handle = ChildHandle::Group(child.id());
        self.registry.register(handle);

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            self.registry.release(handle);
            return Err(DispatchError::HelperIo(io::Error::other("helper pipes were not captured")));
        };

        let payload = encode_wave(jobs, wave);
        let mut reported = vec![false; jobs.len()];
        let mut reports = 0usize;
        let mut cancelled = false;
        let (line_tx, line_rx) = channel::unbounded::<io::Result<String>>();

        thread::scope(|scope| {
            scope.spawn(move || {
                if let Err(e) = stdin.write_all(&payload) {
                    debug!(error = %e, "helper stopped reading job records");
                }
                // Dropping stdin signals end of input
            });
            scope.spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
            });

            loop {
                if !cancelled && ctx.shutdown_requested() {
                    warn!("shutdown requested, terminating fan-out helper");
                    cancelled = true;
                    self.registry.terminate_all();
                }

                match line_rx.recv_timeout(SHUTDOWN_POLL) {
                    Ok(Ok(line)) => {
                        if let Some(result) = accept_report(&line, jobs, wave, &mut reported) {
                            reports += 1;
                            on_result(result);
                        }
                    }
                    Ok(Err(e)) => warn!(error = %e, "failed to read worker output"),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        let status = child.wait();
        self.registry.release(handle);
        let status = status.map_err(DispatchError::HelperIo)?;

        // Killed workers never reach their own cleanup
        let unreported: Vec<usize> = wave.iter().copied().filter(|&index| !reported[index]).collect();
        for &index in &unreported {
            remove_partial_output(jobs[index].destination());
        }

        if cancelled {
            return Ok(WaveOutcome::Cancelled);
        }
        if reports == 0 && !wave.is_empty() {
            warn!(%status, helper = %self.helper.display(), "fan-out helper produced no reports");
            return Ok(WaveOutcome::HelperFailed);
        }
        if !status.success() {
            warn!(%status, "fan-out helper exited unsuccessfully");
        }

        // Every descriptor reports exactly once, even if its worker never printed
        for index in unreported {
            let job = &jobs[index];
            warn!(source = %job.source().display(), "no report from fan-out worker");
            let original_size = fs::metadata(job.source()).map(|m| m.len()).unwrap_or(0);
            on_result(JobResult::failed(job.clone(), original_size, JobFailure::NotReported, Duration::ZERO));
        }
        Ok(WaveOutcome::Finished)
    }
}

impl JobRunner for FanOutRunner {
    fn name(&self) -> &str {
        "fan-out"
    }

    fn run(
        &self,
        jobs: &[JobDescriptor],
        ctx: &RunContext<'_>,
        on_result: &mut dyn FnMut(JobResult),
    ) -> Result<(), DispatchError> {
        let waves = plan_waves(jobs);
        if waves.len() > 1 {
            debug!(waves = waves.len(), "colliding destinations split into waves");
        }

        for (position, wave) in waves.iter().enumerate() {
            match self.run_wave(jobs, wave, ctx, on_result)? {
                WaveOutcome::Finished => {}
                WaveOutcome::Cancelled => break,
                WaveOutcome::HelperFailed => {
                    // Nothing from this wave or later ones has reported yet
                    let mut remaining: Vec<usize> = waves[position..].iter().flatten().copied().collect();
                    remaining.sort_unstable();
                    warn!(
                        jobs = remaining.len(),
                        "fan-out helper unusable, finishing the batch with direct worker slots"
                    );
                    let remaining: Vec<JobDescriptor> = remaining.into_iter().map(|index| jobs[index].clone()).collect();
                    return self.fallback.run(&remaining, ctx, on_result);
                }
            }
        }
        Ok(())
    }
}

/// Runs `worker worker-check` and compares its answer with `WORKER_CHECK_REPLY`.
fn worker_answers(worker: &Path) -> bool {
    let mut child = match Command::new(worker)
        .arg(WORKER_CHECK_SUBCOMMAND)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            debug!(worker = %worker.display(), error = %e, "worker check could not start");
            return false;
        }
    };

    let deadline = Instant::now() + WORKER_CHECK_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
            _ => {
                debug!(worker = %worker.display(), "worker check timed out");
                let _ = child.kill();
                let _ = child.wait();
                return false;
            }
        }
    }

    match child.wait_with_output() {
        Ok(output) => output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == WORKER_CHECK_REPLY,
        Err(_) => false,
    }
}

/// Parses one worker line and checks it belongs to an unreported job of this wave.
fn accept_report(line: &str, jobs: &[JobDescriptor], wave: &[usize], reported: &mut [bool]) -> Option<JobResult> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let report: WorkerReport = match serde_json::from_str(line) {
        Ok(report) => report,
        Err(e) => {
            warn!(error = %e, "ignoring malformed worker output");
            return None;
        }
    };

    if !wave.contains(&report.index) || reported[report.index] {
        warn!(index = report.index, "ignoring unexpected worker report");
        return None;
    }
    reported[report.index] = true;

    let descriptor = jobs[report.index].clone();
    Some(report.into_result(descriptor))
}

/// NUL-separated job records for `xargs -0 -n 5`.
pub fn encode_wave(jobs: &[JobDescriptor], wave: &[usize]) -> Vec<u8> {
    let mut payload = Vec::new();
    for &index in wave {
        let job = &jobs[index];
        let fields: [Vec<u8>; WORKER_ARGS_PER_JOB] = [
            index.to_string().into_bytes(),
            job.algorithm().to_string().into_bytes(),
            job.effective_level().to_string().into_bytes(),
            os_bytes(job.destination().as_os_str()),
            os_bytes(job.source().as_os_str()),
        ];
        for field in fields {
            payload.extend_from_slice(&field);
            payload.push(0);
        }
    }
    payload
}

#[cfg(unix)]
fn os_bytes(value: &OsStr) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    value.as_bytes().to_vec()
}

#[cfg(not(unix))]
fn os_bytes(value: &OsStr) -> Vec<u8> {
    value.to_string_lossy().into_owned().into_bytes()
}

/// One job as received by a fan-out worker.
#[derive(Debug, Clone)]
pub struct WorkerJob {
    pub index: usize,
    pub algorithm: Algorithm,
    pub level: u32,
    pub destination: PathBuf,
    pub source: PathBuf,
}

/// Body of the `invoke-job` subcommand: compress one file, print one report line.
pub fn run_worker(job: WorkerJob, codec_program: Option<PathBuf>, out: &mut dyn Write) -> Result<(), CompressError> {
    let descriptor = JobDescriptor::with_destination(job.source, job.algorithm, job.level, job.destination)?;
    let result = CodecInvoker::new().with_program(codec_program).invoke(&descriptor);

    let report = WorkerReport::new(job.index, result);
    let mut line = serde_json::to_vec(&report).map_err(|e| CompressError::io("encode worker report", "<stdout>", e.into()))?;
    line.push(b'\n');

    // A single write keeps lines from concurrent workers intact
    out.write_all(&line)
        .and_then(|()| out.flush())
        .map_err(|e| CompressError::io("write worker report", "<stdout>", e))
}

/// Body of the `worker-check` subcommand.
pub fn answer_worker_check(out: &mut dyn Write) -> Result<(), CompressError> {
    writeln!(out, "{WORKER_CHECK_REPLY}")
        .and_then(|()| out.flush())
        .map_err(|e| CompressError::io("write worker check", "<stdout>", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn jobs(names: &[&str]) -> Vec<JobDescriptor> {
        names
            .iter()
            .map(|name| JobDescriptor::new(*name, Algorithm::Gzip, None, None).unwrap())
            .collect()
    }

    #[test]
    fn wave_records_are_nul_separated_fields() {
        let batch = jobs(&["a.txt", "-odd name"]);
        let payload = encode_wave(&batch, &[1]);
        let fields: Vec<&[u8]> = payload.split(|&b| b == 0).collect();

        // Trailing NUL leaves one empty element
        assert_eq!(fields.len(), WORKER_ARGS_PER_JOB + 1);
        assert_eq!(fields[0], b"1");
        assert_eq!(fields[1], b"gzip");
        assert_eq!(fields[2], b"6");
        assert_eq!(fields[3], b"-odd name.gz");
        assert_eq!(fields[4], b"-odd name");
    }

    #[test]
    fn reports_outside_the_wave_or_repeated_are_ignored() {
        let batch = jobs(&["a", "b"]);
        let mut reported = vec![false; 2];
        let report = WorkerReport::new(0, JobResult::succeeded(batch[0].clone(), 10, 5, Duration::ZERO));
        let line = serde_json::to_string(&report).unwrap();

        assert!(accept_report(&line, &batch, &[1], &mut reported).is_none());
        let accepted = accept_report(&line, &batch, &[0], &mut reported).unwrap();
        assert_eq!(accepted.descriptor, batch[0]);
        assert_eq!(accepted.compressed_size(), Some(5));
        assert!(accept_report(&line, &batch, &[0], &mut reported).is_none());
        assert!(accept_report("not json", &batch, &[0, 1], &mut reported).is_none());
        assert!(accept_report("", &batch, &[0, 1], &mut reported).is_none());
    }

    #[test]
    fn detect_reports_missing_helper_and_worker() {
        let missing_helper = FanOutRunner::detect(Path::new("no-such-helper-binary"), None, None);
        assert!(matches!(missing_helper, Err(FanOutUnavailable::Helper { .. })));

        let dir = tempdir().unwrap();
        let ghost = dir.path().join("ghost-worker");
        let missing_worker = FanOutRunner::detect(Path::new("sh"), Some(&ghost), None);
        assert!(matches!(missing_worker, Err(FanOutUnavailable::WorkerMissing(_))));

        let no_worker = FanOutRunner::detect(Path::new("sh"), None, None);
        assert!(matches!(no_worker, Err(FanOutUnavailable::NoWorker)));
    }

    #[test]
    fn detect_rejects_a_worker_that_ignores_the_handshake() {
        // `true` exists and exits 0 but prints nothing
        let silent = which::which("true").unwrap();
        let unresponsive = FanOutRunner::detect(Path::new("sh"), Some(&silent), None);
        assert!(matches!(unresponsive, Err(FanOutUnavailable::WorkerUnresponsive(_))));

        // A test binary does not know the subcommand either
        let harness = std::env::current_exe().unwrap();
        assert!(!worker_answers(&harness));
    }

    #[test]
    fn worker_check_answer_is_one_line() {
        let mut out = Vec::new();
        answer_worker_check(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), format!("{WORKER_CHECK_REPLY}\n"));
    }

    #[test]
    fn worker_prints_one_report_line() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("input.txt");
        fs::write(&source, b"payload").unwrap();
        let job = WorkerJob {
            index: 7,
            algorithm: Algorithm::Gzip,
            level: 6,
            destination: dir.path().join("input.txt.gz"),
            source: source.clone(),
        };

        let mut out = Vec::new();
        run_worker(job, Some(PathBuf::from("true")), &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        let report: WorkerReport = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(report.index, 7);
        assert_eq!(report.outcome, JobOutcome::Succeeded { compressed_size: 0 });
        assert_eq!(report.original_size, 7);
    }

    #[test]
    fn report_line_stays_short_for_long_paths() {
        let deep = "nested-directory/".repeat(200);
        let job = WorkerJob {
            index: 0,
            algorithm: Algorithm::Gzip,
            level: 6,
            destination: PathBuf::from(format!("{deep}input.txt.gz")),
            source: PathBuf::from(format!("{deep}input.txt")),
        };

        let mut out = Vec::new();
        run_worker(job, Some(PathBuf::from("true")), &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.len() < 512, "report was {} bytes", text.len());
        assert!(!text.contains("nested-directory"));
    }

    #[test]
    fn long_codec_stderr_is_clipped() {
        let failure = JobFailure::ExitStatus {
            code: 1,
            stderr: "é".repeat(1000),
        };
        let JobFailure::ExitStatus { code, stderr } = clip_detail(failure) else {
            panic!("variant changed");
        };
        assert_eq!(code, 1);
        assert!(stderr.len() <= MAX_REPORT_DETAIL);
        assert!(stderr.chars().all(|c| c == 'é'));

        let short = JobFailure::ExitStatus {
            code: 2,
            stderr: "bad flag".into(),
        };
        assert_eq!(clip_detail(short.clone()), short);
    }
}
