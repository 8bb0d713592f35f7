// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! The batch-queue dispatcher (§4.3, §4.5): drives a [`BatchQueue`] to completion by submitting
//! each admitted batch through a [`SchedulerBackend`] via a [`BatchRunner`].
//!
//! Unlike [`super::Executor`], this loop is plain synchronous code rather than `tokio`-async:
//! `SchedulerBackend::submit`/`wait` are blocking subprocess calls (`sbatch`/`squeue`, `qsub`/
//! `qstat`, or a local child process), so there is no `.await` point worth having here. Batches
//! are processed one at a time; `BatchQueue`'s `workers` cap bounds how many scheduler jobs may
//! be concurrently in flight, but a single-threaded driver never exceeds one anyway, so the cap
//! currently only matters to a future threaded driver.
use super::rollup::{batch_terminal_status, compute_exit_code};
use crate::case::{CaseId, TestBatch, TestCase};
use crate::config::elements::BatchConfig;
use crate::queue::{BatchQueue, GetOutcome};
use crate::scheduler::{BatchRunner, SchedulerBackend};
use crate::session::{CaseStore, Reporter, TestEvent};
use crate::status::{Status, StatusValue};
use camino::Utf8Path;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{instrument, warn};

/// Session-wide settings for a batch-queue run; mirrors [`super::ExecutorConfig`] minus the
/// per-case timeout multiplier, which the batch path leaves to the scheduler's own wallclock
/// request (§4.5's `qtime` estimate already bakes in a multiplier-free pad).
#[derive(Clone, Copy, Debug, Default)]
pub struct BatchExecutorConfig {
    pub session_timeout: Option<Duration>,
}

/// The result of driving a [`BatchExecutor`] to completion.
#[derive(Debug)]
pub struct BatchExecutorReport {
    pub exit_code: u8,
    pub elapsed: Duration,
}

/// Drives a [`BatchQueue`] to completion, persisting every case's record through a [`CaseStore`]
/// as each batch resolves.
pub struct BatchExecutor<'a> {
    queue: BatchQueue,
    cases: HashMap<CaseId, TestCase>,
    store: CaseStore<'a>,
    runner: BatchRunner<'a>,
    batch_config: BatchConfig,
    config: BatchExecutorConfig,
    reporter: Option<Box<dyn Reporter + Send>>,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(
        queue: BatchQueue,
        cases: HashMap<CaseId, TestCase>,
        store: CaseStore<'a>,
        backend: &'a dyn SchedulerBackend,
        staging_root: &'a Utf8Path,
        batch_config: BatchConfig,
        config: BatchExecutorConfig,
    ) -> Self {
        Self {
            queue,
            cases,
            store,
            runner: BatchRunner::new(backend, staging_root),
            batch_config,
            config,
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Box<dyn Reporter + Send>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    fn emit(&mut self, event: TestEvent) {
        if let Some(reporter) = self.reporter.as_mut() {
            reporter.on_event(&event);
        }
    }

    fn persist_members(&self, batch: &TestBatch) {
        for id in &batch.cases {
            if let Some(case) = self.cases.get(id) {
                if let Err(err) = self.store.write(case) {
                    warn!(case = %id, %err, "failed to persist case record");
                }
            }
        }
    }

    /// Drives the queue to completion, mirroring [`super::Executor::run`]'s loop shape: admit,
    /// run (here, to completion synchronously rather than spawning), persist, repeat. Batches
    /// whose job itself failed (as opposed to a member case failing inside it) are retried up to
    /// the configured ceiling through [`BatchQueue::retry`].
    #[instrument(skip(self))]
    pub fn run(mut self) -> BatchExecutorReport {
        let overall_start = Instant::now();
        self.emit(TestEvent::RunStarted {
            case_count: self.cases.len(),
        });

        'dispatch: loop {
            if let Some(timeout) = self.config.session_timeout {
                if overall_start.elapsed() > timeout {
                    break 'dispatch;
                }
            }

            match self.queue.get() {
                GetOutcome::Admitted(iid, batch_id) => {
                    self.run_one(iid, &batch_id);
                }
                GetOutcome::Busy => {
                    // A single-threaded driver never has more than one batch busy at a time;
                    // `run_one` always resolves it before looping back to `get()` again.
                    break 'dispatch;
                }
                GetOutcome::Empty => break 'dispatch,
                GetOutcome::FailFast(_) => break 'dispatch,
            }
        }

        // Anything still buffered (fail-fast or session timeout stopped the loop early) or still
        // marked busy is swept into `not_run`/`finished` by `close()`; `finalize_not_run_batches`
        // then resolves any member case `close()` left short of a verdict.
        self.queue.close();
        self.finalize_not_run_batches();

        let exit_code = compute_exit_code(self.cases.values().map(|c| c.status.value()));
        let elapsed = overall_start.elapsed();
        self.emit(TestEvent::RunFinished { exit_code, elapsed });

        BatchExecutorReport { exit_code, elapsed }
    }

    fn run_one(&mut self, iid: u64, batch_id: &str) {
        let Some(batch) = self.queue.batch(batch_id).cloned() else {
            return;
        };

        self.emit(TestEvent::CaseStarted {
            id: CaseId::from(batch.id.clone()),
            display_name: batch.id.clone(),
        });

        match self.runner.run_batch(&batch, &mut self.cases, &self.batch_config) {
            Ok(()) => {
                // The job script re-invokes `canary-cli run` against the same session root, so
                // any member case the child process actually got to run has its real verdict on
                // disk by now; pull it back in over whatever `run_batch`'s reconcile provisionally
                // assigned in-memory (`not_run`/`cancelled` for cases that never got that far).
                self.reload_members(&batch);
                let terminal = batch_terminal_status(&batch.cases, &self.cases);
                self.persist_members(&batch);
                self.emit(TestEvent::CaseFinished {
                    id: CaseId::from(batch.id.clone()),
                    display_name: batch.id.clone(),
                    status: terminal.clone(),
                    elapsed: Duration::default(),
                });
                self.queue.done(iid, terminal);
            }
            Err(err) => {
                warn!(batch = %batch.id, %err, "batch job failed before producing a roll-up outcome; retrying");
                self.queue.retry(iid, &mut self.cases, &self.store);
            }
        }
    }

    fn reload_members(&mut self, batch: &TestBatch) {
        for id in &batch.cases {
            if let Ok(case) = self.store.read(id) {
                self.cases.insert(id.clone(), case);
            }
        }
    }

    /// After `close()`, any batch id in `not_run` whose member cases never got a terminal verdict
    /// (because `close()` force-finalized it rather than `retry()` exhausting its ceiling) is
    /// marked `not_run` and persisted.
    fn finalize_not_run_batches(&mut self) {
        let batch_ids: Vec<String> = self
            .queue
            .not_run_batch_ids()
            .into_iter()
            .map(str::to_string)
            .collect();
        for batch_id in batch_ids {
            let Some(batch) = self.queue.batch(&batch_id).cloned() else { continue };
            for id in &batch.cases {
                let Some(case) = self.cases.get_mut(id) else { continue };
                if !case.status.is_terminal() {
                    case.status = Status::terminal(StatusValue::NotRun, Some("batch never ran".to_string()));
                }
                if let Err(err) = self.store.write(case) {
                    warn!(case = %id, %err, "failed to persist case record");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BatchError;
    use crate::scheduler::{JobDescription, JobHandle, JobOutcome};
    use camino_tempfile::tempdir;
    use std::collections::BTreeMap;

    struct AlwaysSucceeds;
    impl SchedulerBackend for AlwaysSucceeds {
        fn submit(&self, _job: &JobDescription) -> Result<JobHandle, BatchError> {
            Ok(JobHandle("1".to_string()))
        }
        fn wait(&self, _handle: &JobHandle) -> Result<JobOutcome, BatchError> {
            Ok(JobOutcome::Completed)
        }
        fn cancel(&self, _handle: &JobHandle) -> Result<(), BatchError> {
            Ok(())
        }
    }

    fn case(name: &str) -> TestCase {
        let mut c = TestCase::new(camino::Utf8PathBuf::from("t.pyt"), name, BTreeMap::new(), vec!["true".to_string()]);
        c.id = name.to_string().into();
        c.status = Status::new(StatusValue::Ready, None::<String>);
        c
    }

    #[test]
    fn drains_every_batch_to_success() {
        let dir = tempdir().unwrap();
        let layout = crate::session::SessionLayout::init(dir.path()).unwrap();
        let store = CaseStore::new(&layout);

        let mut a = case("a");
        a.status = Status::terminal(StatusValue::Success, None::<String>);
        // Simulates the job script's re-invocation of `canary-cli run` having already persisted
        // the case's real outcome before the scheduler backend reports the job itself complete.
        store.write(&a).unwrap();
        let cases: HashMap<CaseId, TestCase> = [(a.id.clone(), a.clone())].into_iter().collect();
        let batch = TestBatch {
            id: "batch-0000".to_string(),
            cases: vec![a.id.clone()],
            worker_count: 1,
        };
        let queue = BatchQueue::new(vec![batch], 1, false, 3);
        let backend = AlwaysSucceeds;

        let executor = BatchExecutor::new(
            queue,
            cases,
            store,
            &backend,
            dir.path(),
            BatchConfig::default(),
            BatchExecutorConfig::default(),
        );
        let report = executor.run();

        assert_eq!(report.exit_code, 0);
        let persisted = CaseStore::new(&layout).read(&a.id).unwrap();
        assert_eq!(persisted.status.value(), StatusValue::Success);
    }
}
