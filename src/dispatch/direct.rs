use crate::dispatch::{JobRunner, RunContext, SHUTDOWN_POLL};
use crate::error::{DispatchError, JobFailure};
use crate::invoker::Invoke;
use crate::job::{JobDescriptor, JobResult};
use crossbeam::channel::{self, RecvTimeoutError};
use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Self-managed worker slots.
///
/// The control thread launches the first pending job whose destination is not
/// already being written whenever a slot is free, then blocks on a completion
/// channel until some running job reports back.
pub struct DirectRunner<I: Invoke> {
    invoker: I,
}

impl<I: Invoke> DirectRunner<I> {
    pub fn new(invoker: I) -> Self {
        Self { invoker }
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }
}

/// Next pending job that may start without racing a running job on its output.
fn next_launchable(pending: &mut VecDeque<usize>, jobs: &[JobDescriptor], writing: &HashSet<&Path>) -> Option<usize> {
    let position = pending
        .iter()
        .position(|&index| !writing.contains(jobs[index].destination()))?;
    pending.remove(position)
}

impl<I: Invoke + Send> JobRunner for DirectRunner<I> {
    fn name(&self) -> &str {
        "direct"
    }

    fn run(
        &self,
        jobs: &[JobDescriptor],
        ctx: &RunContext<'_>,
        on_result: &mut dyn FnMut(JobResult),
    ) -> Result<(), DispatchError> {
        let ceiling = ctx.ceiling.get();
        let (done_tx, done_rx) = channel::bounded::<(usize, JobResult)>(ceiling);

        thread::scope(|scope| {
            let mut pending: VecDeque<usize> = (0..jobs.len()).collect();
            let mut writing: HashSet<&Path> = HashSet::with_capacity(ceiling);
            let mut running = 0usize;
            let mut cancelled = false;

            loop {
                if !cancelled && ctx.shutdown_requested() {
                    warn!(running, pending = pending.len(), "shutdown requested, terminating running jobs");
                    cancelled = true;
                    pending.clear();
                    self.invoker.cancel_all();
                }

                // Fill free slots in input order
                while running < ceiling && !cancelled {
                    let Some(index) = next_launchable(&mut pending, jobs, &writing) else {
                        break;
                    };
                    let job = &jobs[index];
                    writing.insert(job.destination());
                    running += 1;
                    debug!(index, source = %job.source().display(), running, "launching job");

                    let done_tx = done_tx.clone();
                    let invoker = &self.invoker;
                    scope.spawn(move || {
                        let result = panic::catch_unwind(AssertUnwindSafe(|| invoker.invoke(job)))
                            .unwrap_or_else(|_| {
                                JobResult::failed(job.clone(), 0, JobFailure::WorkerPanicked, Duration::ZERO)
                            });
                        // The receiver outlives every worker inside this scope
                        let _ = done_tx.send((index, result));
                    });
                }

                if running == 0 {
                    break;
                }

                match done_rx.recv_timeout(SHUTDOWN_POLL) {
                    Ok((index, result)) => {
                        running -= 1;
                        writing.remove(jobs[index].destination());
                        on_result(result);
                    }
                    // Wake up to re-check the shutdown flag. After a shutdown,
                    // signal again: a codec may have been spawned since the last call.
                    Err(RecvTimeoutError::Timeout) => {
                        if cancelled {
                            self.invoker.cancel_all();
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        Ok(())
    }
}
