// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Runs a composed batch job script as a local subprocess instead of submitting it to a real
//! scheduler: useful for tests and single-machine "batch" dry runs (§4.5).

use super::{JobDescription, JobHandle, JobOutcome, SchedulerBackend};
use crate::errors::BatchError;
use std::collections::HashMap;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

#[derive(Default)]
pub struct ShellBackend {
    children: Mutex<HashMap<String, Child>>,
}

impl ShellBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchedulerBackend for ShellBackend {
    fn submit(&self, job: &JobDescription) -> Result<JobHandle, BatchError> {
        let stdout = std::fs::File::create(&job.stdout_path).map_err(|source| BatchError::PollFailed {
            job_id: job.name.clone(),
            source,
        })?;
        let child = Command::new(job.script_path.as_std_path())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| BatchError::SubmissionFailed { reason: err.to_string() })?;
        let id = child.id().to_string();
        self.children.lock().expect("shell backend mutex poisoned").insert(id.clone(), child);
        Ok(JobHandle(id))
    }

    fn wait(&self, handle: &JobHandle) -> Result<JobOutcome, BatchError> {
        let mut child = self
            .children
            .lock()
            .expect("shell backend mutex poisoned")
            .remove(&handle.0)
            .ok_or_else(|| BatchError::SubmissionFailed { reason: format!("unknown job `{}`", handle.0) })?;
        let status = child.wait().map_err(|source| BatchError::PollFailed {
            job_id: handle.0.clone(),
            source,
        })?;
        if status.success() {
            Ok(JobOutcome::Completed)
        } else {
            Ok(JobOutcome::Failed { reason: format!("exited with {status}") })
        }
    }

    fn cancel(&self, handle: &JobHandle) -> Result<(), BatchError> {
        if let Some(mut child) = self.children.lock().expect("shell backend mutex poisoned").remove(&handle.0) {
            let _ = child.kill();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use camino_tempfile::tempdir;

    #[test]
    fn successful_script_completes() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("job.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        set_executable(&script);

        let backend = ShellBackend::new();
        let job = JobDescription {
            name: "job".to_string(),
            script_path: script,
            stdout_path: dir.path().join("job.out"),
            wallclock: std::time::Duration::from_secs(1),
            tasks: 1,
            extra_args: Vec::new(),
        };
        let handle = backend.submit(&job).unwrap();
        assert_eq!(backend.wait(&handle).unwrap(), JobOutcome::Completed);
    }

    #[test]
    fn nonzero_exit_is_a_failed_outcome() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("job.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 7\n").unwrap();
        set_executable(&script);

        let backend = ShellBackend::new();
        let job = JobDescription {
            name: "job".to_string(),
            script_path: script,
            stdout_path: dir.path().join("job.out"),
            wallclock: std::time::Duration::from_secs(1),
            tasks: 1,
            extra_args: Vec::new(),
        };
        let handle = backend.submit(&job).unwrap();
        assert!(matches!(backend.wait(&handle).unwrap(), JobOutcome::Failed { .. }));
    }

    fn set_executable(path: &Utf8PathBuf) {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).unwrap();
    }
}
