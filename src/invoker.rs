use crate::dispatch::children::{ChildHandle, ChildRegistry};
use crate::error::JobFailure;
use crate::job::{JobDescriptor, JobResult};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::debug;

/// Runs one unit of work to completion.
///
/// Implementations never panic and never return an error: every problem is
/// folded into the returned `JobResult`.
pub trait Invoke: Sync {
    fn invoke(&self, job: &JobDescriptor) -> JobResult;

    /// Asks every in-flight invocation to stop. Used on shutdown.
    fn cancel_all(&self) {}
}

/// Compresses a file by running the external codec program.
pub struct CodecInvoker {
    program: Option<PathBuf>,
    registry: ChildRegistry,
}

impl CodecInvoker {
    pub fn new() -> Self {
        Self {
            program: None,
            registry: ChildRegistry::new(),
        }
    }

    /// Runs `program` instead of the codec's default binary.
    pub fn with_program(mut self, program: Option<PathBuf>) -> Self {
        self.program = program;
        self
    }

    fn program_for(&self, job: &JobDescriptor) -> OsString {
        match &self.program {
            Some(program) => program.clone().into_os_string(),
            None => OsString::from(job.algorithm().codec().binary()),
        }
    }

    fn run(&self, job: &JobDescriptor, original_size: u64) -> Result<(u64, Duration), (JobFailure, Duration)> {
        let destination = job.destination();
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                (JobFailure::CreateDestination { message: e.to_string() }, Duration::ZERO)
            })?;
        }

        // The codec streams into a sibling file that only replaces the destination on success
        let partial = partial_path(destination);
        let output = File::create(&partial)
            .map_err(|e| (JobFailure::CreateDestination { message: e.to_string() }, Duration::ZERO))?;

        let program = self.program_for(job);
        let codec = job.algorithm().codec();
        let mut command = Command::new(&program);
        command
            .args(codec.args(job.effective_level()))
            .arg("--")
            .arg(job.source())
            .stdin(Stdio::null())
            .stdout(Stdio::from(output))
            .stderr(Stdio::piped());

        let start = Instant::now();
        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let elapsed = start.elapsed();
                discard(&partial);
                let failure = JobFailure::Spawn {
                    program: program.to_string_lossy().into_owned(),
                    message: e.to_string(),
                };
                return Err((failure, elapsed));
            }
        };

        let handle = ChildHandle::Process(child.id());
        self.registry.register(handle);
        let waited = child.wait_with_output();
        self.registry.release(handle);
        let elapsed = start.elapsed();

        let output = match waited {
            Ok(output) => output,
            Err(e) => {
                discard(&partial);
                return Err((JobFailure::Wait { message: e.to_string() }, elapsed));
            }
        };

        if !output.status.success() {
            discard(&partial);
            let failure = match output.status.code() {
                Some(code) => JobFailure::ExitStatus {
                    code,
                    stderr: last_line(&output.stderr),
                },
                None => JobFailure::Signalled,
            };
            return Err((failure, elapsed));
        }

        fs::rename(&partial, destination).map_err(|e| {
            discard(&partial);
            (JobFailure::Finalize { message: e.to_string() }, elapsed)
        })?;

        match fs::metadata(destination) {
            Ok(meta) => {
                debug!(
                    source = %job.source().display(),
                    original_size,
                    compressed_size = meta.len(),
                    "codec finished"
                );
                Ok((meta.len(), elapsed))
            }
            Err(_) => Err((JobFailure::OutputMissing, elapsed)),
        }
    }
}

impl Default for CodecInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl Invoke for CodecInvoker {
    fn invoke(&self, job: &JobDescriptor) -> JobResult {
        let original_size = match fs::metadata(job.source()) {
            Ok(meta) if meta.is_file() => meta.len(),
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                let failure = JobFailure::SourceUnreadable { message: e.to_string() };
                return JobResult::failed(job.clone(), 0, failure, Duration::ZERO);
            }
            _ => {
                return JobResult::failed(job.clone(), 0, JobFailure::SourceMissing, Duration::ZERO);
            }
        };

        match self.run(job, original_size) {
            Ok((compressed_size, elapsed)) => JobResult::succeeded(job.clone(), original_size, compressed_size, elapsed),
            Err((failure, elapsed)) => JobResult::failed(job.clone(), original_size, failure, elapsed),
        }
    }

    fn cancel_all(&self) {
        self.registry.terminate_all();
    }
}

/// Sibling file the codec writes into before it is renamed over `destination`.
pub(crate) fn partial_path(destination: &Path) -> PathBuf {
    let mut path = destination.as_os_str().to_os_string();
    path.push(".partial");
    PathBuf::from(path)
}

fn discard(partial: &Path) {
    if let Err(e) = fs::remove_file(partial) {
        debug!(path = %partial.display(), error = %e, "could not remove partial output");
    }
}

/// Removes partial output left behind by a codec that was killed before its
/// invoker could clean up.
pub(crate) fn remove_partial_output(destination: &Path) {
    let partial = partial_path(destination);
    if partial.exists() {
        discard(&partial);
    }
}

fn last_line(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim().to_string())
        .unwrap_or_default()
}
