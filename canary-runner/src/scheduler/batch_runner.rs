// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Composes, submits, and reconciles one batch's external-scheduler job (§4.5).

use super::{format_hhmmss, qtime_seconds, JobDescription, JobOutcome, SchedulerBackend};
use crate::case::{CaseId, TestBatch, TestCase};
use crate::config::elements::BatchConfig;
use crate::errors::BatchError;
use crate::status::{Status, StatusValue};
use camino::Utf8Path;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{instrument, warn};

/// Every batch job's submission script re-invokes the tool on the same work tree with
/// `scheduler=none`, guarding against the re-invocation recursing into another round of batch
/// submission.
const SCHEDULER_GUARD: &str = "batch:scheduler:none";

/// Submits and waits on batches against a `SchedulerBackend`, writing their submission scripts
/// under `staging_root`.
pub struct BatchRunner<'a> {
    backend: &'a dyn SchedulerBackend,
    staging_root: &'a Utf8Path,
}

impl<'a> BatchRunner<'a> {
    pub fn new(backend: &'a dyn SchedulerBackend, staging_root: &'a Utf8Path) -> Self {
        Self { backend, staging_root }
    }

    /// Runs one batch to completion, mutating every member case's `status` in `cases` per
    /// §4.5. Submission failure is handled internally rather than propagated as a hard error:
    /// every `ready`/`pending` case in the batch becomes `not_run`, and the session continues
    /// with the next batch.
    #[instrument(skip(self, batch, cases, config), fields(batch = %batch.id))]
    pub fn run_batch(
        &self,
        batch: &TestBatch,
        cases: &mut HashMap<CaseId, TestCase>,
        config: &BatchConfig,
    ) -> Result<(), BatchError> {
        let job = self.compose_job(batch, cases, config)?;

        let handle = match self.backend.submit(&job) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(batch = %batch.id, %err, "batch submission failed");
                mark_not_run(batch, cases, "batch submission failed");
                return Ok(());
            }
        };

        let outcome = self.backend.wait(&handle)?;
        if let JobOutcome::Failed { reason } = &outcome {
            warn!(batch = %batch.id, %reason, "batch job reported a non-zero exit");
        }
        reconcile(batch, cases);
        Ok(())
    }

    fn compose_job(
        &self,
        batch: &TestBatch,
        cases: &HashMap<CaseId, TestCase>,
        config: &BatchConfig,
    ) -> Result<JobDescription, BatchError> {
        let members: Vec<&TestCase> = batch.cases.iter().filter_map(|id| cases.get(id)).collect();
        let runtime_estimate: f64 = members.iter().map(|c| c.runtime_estimate).sum();
        let wallclock = Duration::from_secs_f64(qtime_seconds(runtime_estimate) * 1.25);
        let tasks = members.iter().map(|c| c.cpu_slots()).max().unwrap_or(1);

        let script_path = self.staging_root.join(format!("{}.sh", batch.id));
        let stdout_path = self.staging_root.join(format!("{}.out", batch.id));

        let script = render_script(batch, &members, self.staging_root, &wallclock);
        std::fs::write(&script_path, script)
            .map_err(|err| BatchError::SubmissionFailed { reason: err.to_string() })?;
        set_executable(&script_path)?;

        Ok(JobDescription {
            name: batch.id.clone(),
            script_path,
            stdout_path,
            wallclock,
            tasks,
            extra_args: config.scheduler_args_placeholder(),
        })
    }
}

fn render_script(batch: &TestBatch, members: &[&TestCase], root: &Utf8Path, wallclock: &Duration) -> String {
    let mut script = String::new();
    script.push_str("#!/bin/sh\n");
    script.push_str(&format!("# batch {}\n", batch.id));
    script.push_str(&format!("# approximate wallclock: {}\n", format_hhmmss(*wallclock)));
    script.push_str(&format!("# {} test case(s):\n", members.len()));
    for case in members {
        script.push_str(&format!("# - {}\n", case.display_name));
    }
    script.push_str(&format!(
        "canary-cli -C {root} run -c {SCHEDULER_GUARD} ^{batch_id}\n",
        batch_id = batch.id,
    ));
    script
}

fn set_executable(path: &Utf8Path) -> Result<(), BatchError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)
        .map_err(|err| BatchError::SubmissionFailed { reason: err.to_string() })?
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).map_err(|err| BatchError::SubmissionFailed { reason: err.to_string() })
}

fn mark_not_run(batch: &TestBatch, cases: &mut HashMap<CaseId, TestCase>, detail: &str) {
    for id in &batch.cases {
        if let Some(case) = cases.get_mut(id) {
            if matches!(case.status.value(), StatusValue::Ready | StatusValue::Pending) {
                case.status = Status::terminal(StatusValue::NotRun, Some(detail.to_string()));
            }
        }
    }
}

/// After the job finishes (successfully or not), any case that never got far enough to persist
/// a terminal status of its own is resolved here: still `running` (or started but never
/// stopped) becomes `cancelled`, still `ready`/`pending` becomes `not_run`.
fn reconcile(batch: &TestBatch, cases: &mut HashMap<CaseId, TestCase>) {
    for id in &batch.cases {
        let Some(case) = cases.get_mut(id) else { continue };
        match case.status.value() {
            StatusValue::Running => {
                case.status = Status::terminal(StatusValue::Cancelled, Some("case failed to stop".to_string()));
            }
            StatusValue::Ready | StatusValue::Pending => {
                case.status = Status::terminal(StatusValue::NotRun, Some("case failed to start".to_string()));
            }
            _ => {}
        }
    }
}

trait SchedulerArgsPlaceholder {
    fn scheduler_args_placeholder(&self) -> Vec<String>;
}

impl SchedulerArgsPlaceholder for BatchConfig {
    /// `BatchConfig` doesn't carry free-form scheduler args of its own (§3a keeps config keys
    /// to the small scalar set `apply_override` understands); a full front end would thread a
    /// `-b scheduler_args=...` CLI option through here.
    fn scheduler_args_placeholder(&self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::CaseId;
    use camino::Utf8PathBuf;
    use camino_tempfile::tempdir;
    use std::collections::BTreeMap;

    struct FakeBackend {
        outcome: JobOutcome,
    }

    impl SchedulerBackend for FakeBackend {
        fn submit(&self, _job: &JobDescription) -> Result<super::super::JobHandle, BatchError> {
            Ok(super::super::JobHandle("fake-1".to_string()))
        }
        fn wait(&self, _handle: &super::super::JobHandle) -> Result<JobOutcome, BatchError> {
            Ok(self.outcome.clone())
        }
        fn cancel(&self, _handle: &super::super::JobHandle) -> Result<(), BatchError> {
            Ok(())
        }
    }

    struct FailingSubmitBackend;
    impl SchedulerBackend for FailingSubmitBackend {
        fn submit(&self, _job: &JobDescription) -> Result<super::super::JobHandle, BatchError> {
            Err(BatchError::SubmissionFailed { reason: "no sbatch on PATH".to_string() })
        }
        fn wait(&self, _handle: &super::super::JobHandle) -> Result<JobOutcome, BatchError> {
            unreachable!("wait should not be called when submit fails")
        }
        fn cancel(&self, _handle: &super::super::JobHandle) -> Result<(), BatchError> {
            Ok(())
        }
    }

    fn case(name: &str, status: StatusValue) -> TestCase {
        let mut c = TestCase::new(Utf8PathBuf::from("t.pyt"), name, BTreeMap::new(), vec!["true".to_string()]);
        c.id = name.to_string().into();
        c.status = if status.is_terminal() {
            Status::terminal(status, None::<String>)
        } else {
            Status::new(status, None::<String>)
        };
        c
    }

    fn batch(ids: &[&str]) -> TestBatch {
        TestBatch {
            id: "batch-0000".to_string(),
            cases: ids.iter().map(|s| CaseId::from(s.to_string())).collect(),
            worker_count: 1,
        }
    }

    #[test]
    fn submission_failure_marks_ready_cases_not_run() {
        let dir = tempdir().unwrap();
        let backend = FailingSubmitBackend;
        let runner = BatchRunner::new(&backend, dir.path());
        let b = batch(&["a"]);
        let mut cases: HashMap<CaseId, TestCase> =
            [("a".to_string().into(), case("a", StatusValue::Ready))].into_iter().collect();

        runner.run_batch(&b, &mut cases, &BatchConfig::default()).unwrap();
        assert_eq!(cases[&CaseId::from("a".to_string())].status.value(), StatusValue::NotRun);
    }

    #[test]
    fn completion_cancels_still_running_cases() {
        let dir = tempdir().unwrap();
        let backend = FakeBackend { outcome: JobOutcome::Completed };
        let runner = BatchRunner::new(&backend, dir.path());
        let b = batch(&["a"]);
        let mut cases: HashMap<CaseId, TestCase> =
            [("a".to_string().into(), case("a", StatusValue::Running))].into_iter().collect();

        runner.run_batch(&b, &mut cases, &BatchConfig::default()).unwrap();
        assert_eq!(cases[&CaseId::from("a".to_string())].status.value(), StatusValue::Cancelled);
    }

    #[test]
    fn completion_leaves_already_terminal_cases_alone() {
        let dir = tempdir().unwrap();
        let backend = FakeBackend { outcome: JobOutcome::Completed };
        let runner = BatchRunner::new(&backend, dir.path());
        let b = batch(&["a"]);
        let mut cases: HashMap<CaseId, TestCase> =
            [("a".to_string().into(), case("a", StatusValue::Success))].into_iter().collect();

        runner.run_batch(&b, &mut cases, &BatchConfig::default()).unwrap();
        assert_eq!(cases[&CaseId::from("a".to_string())].status.value(), StatusValue::Success);
    }
}
