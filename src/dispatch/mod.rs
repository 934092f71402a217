//! Bounded concurrent dispatch of compression jobs.
//!
//! A `Dispatcher` owns the concurrency ceiling and one `JobRunner`. Two runners
//! exist: `DirectRunner` manages worker slots itself, `FanOutRunner` delegates
//! scheduling to an external helper. Both launch every descriptor exactly once,
//! never exceed the ceiling, keep jobs with the same destination from
//! overlapping, and report per-job failures as data.

pub mod children;
pub mod direct;
pub mod fan_out;

use crate::error::DispatchError;
use crate::invoker::CodecInvoker;
use crate::job::{JobDescriptor, JobResult};
use crate::report::{Aggregator, BatchSummary, Reporter};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use self::direct::DirectRunner;
use self::fan_out::FanOutRunner;

/// How long a waiting control thread sleeps on its completion channel before
/// re-checking the shutdown flag.
pub const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Maximum number of jobs in flight at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Concurrency(NonZeroUsize);

impl Concurrency {
    pub fn new(limit: usize) -> Option<Self> {
        NonZeroUsize::new(limit).map(Self)
    }

    /// One slot per logical CPU, but no more slots than jobs.
    pub fn default_for(jobs: usize) -> Self {
        let limit = num_cpus::get().min(jobs);
        Self(NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN))
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl fmt::Display for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-run inputs shared by every runner.
pub struct RunContext<'a> {
    pub ceiling: Concurrency,
    pub shutdown: &'a AtomicBool,
}

impl RunContext<'_> {
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// A way of executing a batch under a concurrency ceiling.
pub trait JobRunner: Send + Sync {
    /// Returns the name of the strategy.
    fn name(&self) -> &str;

    /// Runs every job, calling `on_result` once per job as each completes.
    ///
    /// Per-job failures are delivered through `on_result`; an `Err` means the
    /// runner itself could not continue.
    fn run(
        &self,
        jobs: &[JobDescriptor],
        ctx: &RunContext<'_>,
        on_result: &mut dyn FnMut(JobResult),
    ) -> Result<(), DispatchError>;
}

/// Execution strategy requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Worker slots managed by this process.
    Direct,
    /// Scheduling delegated to an external parallel-execution helper.
    FanOut,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Direct => "direct",
            Strategy::FanOut => "fan-out",
        })
    }
}

/// Settings needed to build a runner for a `Strategy`.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub strategy: Strategy,
    pub ceiling: Concurrency,
    /// Program used by the fan-out strategy (`xargs` by default).
    pub helper: PathBuf,
    /// Executable that understands the hidden `invoke-job` subcommand.
    pub worker: Option<PathBuf>,
    /// Codec binary override forwarded to invokers.
    pub codec_program: Option<PathBuf>,
}

/// Runs batches through a `JobRunner` and accounts for every result.
pub struct Dispatcher {
    runner: Box<dyn JobRunner>,
    ceiling: Concurrency,
    shutdown: &'static AtomicBool,
}

impl Dispatcher {
    pub fn new(runner: Box<dyn JobRunner>, ceiling: Concurrency) -> Self {
        Self {
            runner,
            ceiling,
            shutdown: children::shutdown_flag(),
        }
    }

    /// Watches `flag` instead of the process-wide signal flag.
    pub fn with_shutdown_flag(mut self, flag: &'static AtomicBool) -> Self {
        self.shutdown = flag;
        self
    }

    /// Builds the runner for `options.strategy`.
    ///
    /// A fan-out request falls back to the direct strategy, with a warning,
    /// when the helper or the worker executable is unavailable.
    pub fn for_strategy(options: &DispatchOptions) -> Self {
        let invoker = || CodecInvoker::new().with_program(options.codec_program.clone());

        let runner: Box<dyn JobRunner> = match options.strategy {
            Strategy::Direct => Box::new(DirectRunner::new(invoker())),
            Strategy::FanOut => {
                match FanOutRunner::detect(&options.helper, options.worker.as_deref(), options.codec_program.clone()) {
                    Ok(runner) => Box::new(runner),
                    Err(reason) => {
                        warn!(%reason, "fan-out helper unavailable, falling back to direct worker slots");
                        Box::new(DirectRunner::new(invoker()))
                    }
                }
            }
        };

        Self::new(runner, options.ceiling)
    }

    pub fn strategy_name(&self) -> &str {
        self.runner.name()
    }

    pub fn ceiling(&self) -> Concurrency {
        self.ceiling
    }

    /// Runs the whole batch, streaming each result to `reporter`.
    ///
    /// Returns the summary once every job is terminal. A batch cut short by a
    /// shutdown request returns `DispatchError::Interrupted` with the partial
    /// summary; a request that arrives after the last job finished does not.
    pub fn run_batch(&self, jobs: &[JobDescriptor], reporter: &mut dyn Reporter) -> Result<BatchSummary, DispatchError> {
        let ctx = RunContext {
            ceiling: self.ceiling,
            shutdown: self.shutdown,
        };
        info!(jobs = jobs.len(), ceiling = %self.ceiling, strategy = self.runner.name(), "dispatching batch");

        let mut aggregator = Aggregator::new();
        let start = Instant::now();
        let outcome = self.runner.run(jobs, &ctx, &mut |result| {
            if let Err(e) = reporter.job_finished(&result) {
                warn!(error = %e, "failed to report job result");
            }
            aggregator.record(&result);
        });
        let elapsed = start.elapsed();

        outcome?;
        let summary = aggregator.finish(elapsed);
        if ctx.shutdown_requested() && summary.attempted < jobs.len() {
            return Err(DispatchError::Interrupted { summary });
        }

        debug_assert_eq!(summary.attempted, jobs.len(), "every descriptor reports exactly once");
        if let Err(e) = reporter.batch_finished(&summary) {
            warn!(error = %e, "failed to report batch summary");
        }
        Ok(summary)
    }
}

/// Groups of job indices that share a destination, in input order.
///
/// Only groups with more than one member are returned.
pub fn destination_collisions(jobs: &[JobDescriptor]) -> Vec<Vec<usize>> {
    let mut by_destination: HashMap<&Path, Vec<usize>> = HashMap::new();
    for (index, job) in jobs.iter().enumerate() {
        by_destination.entry(job.destination()).or_default().push(index);
    }

    let mut groups: Vec<Vec<usize>> = by_destination.into_values().filter(|group| group.len() > 1).collect();
    groups.sort_by_key(|group| group[0]);
    groups
}

/// Splits jobs into waves whose members have pairwise distinct destinations.
///
/// The n-th job targeting a destination lands in wave n; input order is kept
/// inside each wave.
pub fn plan_waves(jobs: &[JobDescriptor]) -> Vec<Vec<usize>> {
    let mut seen: HashMap<&Path, usize> = HashMap::new();
    let mut waves: Vec<Vec<usize>> = Vec::new();

    for (index, job) in jobs.iter().enumerate() {
        let occurrence = seen.entry(job.destination()).or_insert(0);
        if waves.len() <= *occurrence {
            waves.push(Vec::new());
        }
        waves[*occurrence].push(index);
        *occurrence += 1;
    }
    waves
}
