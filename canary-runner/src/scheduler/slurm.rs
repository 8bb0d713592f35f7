// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! A thin `sbatch`/`squeue`/`scancel` wrapper, assembling submission arguments the way
//! `_nvtest/hpc_scheduler.py::HPCScheduler` composes its command line.

use super::{format_hhmmss, JobDescription, JobHandle, JobOutcome, SchedulerBackend};
use crate::errors::BatchError;
use std::process::Command;
use std::time::Duration;

/// Submits batch jobs to a Slurm cluster. Full accounting/QOS/partition integration is left to
/// `extra_args`, which are passed straight through to `sbatch`.
pub struct SlurmBackend {
    extra_args: Vec<String>,
}

impl SlurmBackend {
    pub fn new(extra_args: Vec<String>) -> Self {
        Self { extra_args }
    }
}

impl SchedulerBackend for SlurmBackend {
    fn submit(&self, job: &JobDescription) -> Result<JobHandle, BatchError> {
        let output = Command::new("sbatch")
            .arg("--parsable")
            .arg(format!("--job-name={}", job.name))
            .arg(format!("--ntasks={}", job.tasks))
            .arg(format!("--time={}", format_hhmmss(job.wallclock)))
            .arg(format!("--output={}", job.stdout_path))
            .args(&self.extra_args)
            .arg(job.script_path.as_std_path())
            .output()
            .map_err(|err| BatchError::SubmissionFailed { reason: err.to_string() })?;
        if !output.status.success() {
            return Err(BatchError::SubmissionFailed {
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        // `--parsable` prints just the job id, optionally `id;cluster`.
        let job_id = String::from_utf8_lossy(&output.stdout)
            .trim()
            .split(';')
            .next()
            .unwrap_or_default()
            .to_string();
        Ok(JobHandle(job_id))
    }

    fn wait(&self, handle: &JobHandle) -> Result<JobOutcome, BatchError> {
        loop {
            let output = Command::new("squeue")
                .args(["-j", &handle.0, "-h", "-o", "%T"])
                .output()
                .map_err(|source| BatchError::PollFailed { job_id: handle.0.clone(), source })?;
            let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if state.is_empty() {
                // The job no longer appears in the queue: it finished, one way or another.
                return Ok(JobOutcome::Completed);
            }
            if matches!(state.as_str(), "FAILED" | "CANCELLED" | "TIMEOUT" | "NODE_FAIL") {
                return Ok(JobOutcome::Failed { reason: state });
            }
            std::thread::sleep(Duration::from_millis(500));
        }
    }

    fn cancel(&self, handle: &JobHandle) -> Result<(), BatchError> {
        Command::new("scancel")
            .arg(&handle.0)
            .status()
            .map_err(|source| BatchError::PollFailed { job_id: handle.0.clone(), source })?;
        Ok(())
    }
}
