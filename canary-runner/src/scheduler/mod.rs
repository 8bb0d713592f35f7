// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! The batch scheduling subsystem: the default partitioner that groups cases into
//! dependency-closed batches, the [`SchedulerBackend`] collaborator contract external
//! schedulers implement, and the [`BatchRunner`] that composes and submits one batch's job.
//!
//! Grounded in `_nvtest/hpc_scheduler.py::HPCScheduler` (the abstract submit/poll/cancel
//! contract) and `_nvtest/plugins/nvtest_pbs.py::PBS` (a concrete command-line backend).

mod batch_runner;
mod partition;
mod pbs;
mod shell;
mod slurm;

pub use batch_runner::BatchRunner;
pub use partition::partition_batches;
pub use pbs::PbsBackend;
pub use shell::ShellBackend;
pub use slurm::SlurmBackend;

use crate::errors::BatchError;
use camino::Utf8PathBuf;
use std::time::Duration;

/// Describes one job to submit to a scheduler backend: a self-contained script plus the
/// resource envelope it needs, assembled the way
/// `_nvtest/hpc_scheduler.py::HPCScheduler.write_submission_script`/`nvtest_invocation` compose
/// a submission script and its re-invocation command.
#[derive(Clone, Debug)]
pub struct JobDescription {
    pub name: String,
    pub script_path: Utf8PathBuf,
    pub stdout_path: Utf8PathBuf,
    pub wallclock: Duration,
    /// Task/core count the scheduler should reserve; the maximum per-case cpu demand across
    /// the batch's members.
    pub tasks: u32,
    pub extra_args: Vec<String>,
}

/// An opaque, scheduler-assigned job identifier.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobHandle(pub String);

/// The terminal outcome of a submitted job as observed by [`SchedulerBackend::wait`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobOutcome {
    Completed,
    Failed { reason: String },
}

/// An external batch scheduler collaborator.
///
/// Mirrors `HPCScheduler`'s `submit_and_wait`/`poll`/`cancel` contract, split into `submit` +
/// `wait` so [`BatchRunner`] can do its own bookkeeping between submission and completion
/// instead of blocking inside one call. Implementations are expected to do their own blocking
/// I/O; the executor calls through `tokio::task::spawn_blocking`.
pub trait SchedulerBackend: Send + Sync {
    fn submit(&self, job: &JobDescription) -> Result<JobHandle, BatchError>;
    fn wait(&self, handle: &JobHandle) -> Result<JobOutcome, BatchError>;
    fn cancel(&self, handle: &JobHandle) -> Result<(), BatchError>;
}

/// Renders a duration as `HH:MM:SS`, the walltime format both Slurm's `--time` and PBS's `-l
/// walltime=` expect.
pub(crate) fn format_hhmmss(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// The source's step-function wallclock estimate (`HPCScheduler.qtime`): short batches get
/// rounded up to generous fixed buckets rather than a tight multiple, since scheduler queue
/// wait times dwarf the difference for small jobs; long batches just get a 10% pad.
pub(crate) fn qtime_seconds(total_runtime: f64) -> f64 {
    if total_runtime < 100.0 {
        300.0
    } else if total_runtime < 300.0 {
        600.0
    } else if total_runtime < 600.0 {
        1200.0
    } else if total_runtime < 1800.0 {
        2400.0
    } else if total_runtime < 3600.0 {
        5000.0
    } else {
        total_runtime * 1.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qtime_buckets_short_runtimes_generously() {
        assert_eq!(qtime_seconds(10.0), 300.0);
        assert_eq!(qtime_seconds(250.0), 600.0);
    }

    #[test]
    fn qtime_pads_long_runtimes_proportionally() {
        assert_eq!(qtime_seconds(4000.0), 4400.0);
    }

    #[test]
    fn hhmmss_formats_durations() {
        assert_eq!(format_hhmmss(Duration::from_secs(3725)), "01:02:05");
    }
}
