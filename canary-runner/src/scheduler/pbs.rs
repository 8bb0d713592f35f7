// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! A thin `qsub`/`qstat`/`qdel` wrapper.
//!
//! Grounded directly in `_nvtest/plugins/nvtest_pbs.py::PBS`: the submission arguments
//! (`-N`, `-l walltime=`, `-j oe`, `-o`) and the `qstat` output parsing in `poll` (including its
//! truncated-job-id-with-trailing-`*` handling) are carried over as-is.
use super::{format_hhmmss, JobDescription, JobHandle, JobOutcome, SchedulerBackend};
use crate::errors::BatchError;
use std::process::Command;
use std::time::Duration;

pub struct PbsBackend {
    extra_args: Vec<String>,
}

impl PbsBackend {
    pub fn new(extra_args: Vec<String>) -> Self {
        Self { extra_args }
    }

    /// Looks up `jobid`'s current state column in `qstat`'s output. Returns `None` once the job
    /// has dropped out of the listing entirely (PBS, unlike Slurm, doesn't keep finished jobs
    /// queryable for long).
    fn poll(&self, jobid: &str) -> Result<Option<String>, BatchError> {
        let output = Command::new("qstat")
            .output()
            .map_err(|source| BatchError::PollFailed { job_id: jobid.to_string(), source })?;
        let text = String::from_utf8_lossy(&output.stdout);
        for line in text.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 6 {
                continue;
            }
            let (jid, state) = (parts[0], parts[4]);
            if jid == jobid {
                return Ok(Some(state.to_string()));
            }
            if let Some(prefix) = jid.strip_suffix('*') {
                if jobid.starts_with(prefix) {
                    return Ok(Some(state.to_string()));
                }
            }
        }
        Ok(None)
    }
}

impl SchedulerBackend for PbsBackend {
    fn submit(&self, job: &JobDescription) -> Result<JobHandle, BatchError> {
        let output = Command::new("qsub")
            .arg("-N")
            .arg(&job.name)
            .arg("-l")
            .arg(format!("walltime={}", format_hhmmss(job.wallclock)))
            .arg("-j")
            .arg("oe")
            .arg("-o")
            .arg(job.stdout_path.as_std_path())
            .args(&self.extra_args)
            .arg(job.script_path.as_std_path())
            .output()
            .map_err(|err| BatchError::SubmissionFailed { reason: err.to_string() })?;
        if !output.status.success() {
            return Err(BatchError::SubmissionFailed {
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let job_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(JobHandle(job_id))
    }

    fn wait(&self, handle: &JobHandle) -> Result<JobOutcome, BatchError> {
        loop {
            match self.poll(&handle.0)? {
                Some(state) if matches!(state.as_str(), "R" | "Q" | "RUNNING" | "QUEUED" | "H") => {
                    std::thread::sleep(Duration::from_millis(500));
                }
                Some(state) => return Ok(JobOutcome::Failed { reason: state }),
                None => return Ok(JobOutcome::Completed),
            }
        }
    }

    fn cancel(&self, handle: &JobHandle) -> Result<(), BatchError> {
        Command::new("qdel")
            .arg(&handle.0)
            .status()
            .map_err(|source| BatchError::PollFailed { job_id: handle.0.clone(), source })?;
        Ok(())
    }
}
