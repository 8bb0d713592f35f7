// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! The top-level dispatcher (§4.6): pulls admissible cases out of a [`DirectQueue`], runs them
//! concurrently as worker tasks, applies the session-wide wall clock alongside each case's own
//! timeout, and persists every terminal status through a [`CaseStore`] as it lands.
//!
//! Grounded in `nextest-runner::runner::dispatcher::DispatcherContext::run`'s `tokio::select!`
//! loop over executor events and a global timeout sleep, simplified to this core's single
//! shared queue and a `JoinSet` of [`run_case`] futures rather than nextest's full
//! setup-script/list-test/stress-run state machine: `DirectQueue::get`/`done` play the role
//! nextest's `RunUnitRequest` channel plays there, synchronously, without the dispatcher ever
//! holding the queue across an `.await`.

mod batch;
mod rollup;

pub use batch::{BatchExecutor, BatchExecutorConfig, BatchExecutorReport};
pub use rollup::{batch_terminal_status, compute_exit_code};

use crate::case::CaseId;
use crate::queue::{DirectQueue, GetOutcome};
use crate::resource::Acquisition;
use crate::runner::{run_case, CaseOutcome};
use crate::session::{CaseStore, Reporter, TestEvent};
use crate::status::{Status, StatusValue};
use camino::Utf8PathBuf;
use chrono::Local;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

/// Session-wide executor settings (§4.6, §5).
#[derive(Clone, Copy, Debug)]
pub struct ExecutorConfig {
    /// Wall-clock budget for the whole session; `None` means unbounded. Checked at the top of
    /// every dispatch iteration, independent of any individual case's own timeout.
    pub session_timeout: Option<Duration>,
    /// Multiplies every case's declared `timeout_sec` before the runner acts on it.
    pub timeout_multiplier: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            session_timeout: None,
            timeout_multiplier: 1.0,
        }
    }
}

/// Why the dispatch loop stopped early, short of draining the queue to empty.
#[derive(Clone, Debug)]
pub enum StopReason {
    /// Fail-fast was configured and a terminal failure was observed; carries the failing ids.
    FailFast(Vec<CaseId>),
    /// The session-wide wall clock was exceeded.
    SessionTimeout(Duration),
}

/// The result of driving an [`Executor`] to completion.
#[derive(Debug)]
pub struct ExecutorReport {
    /// The process exit-code bitmask computed over every terminal case (§6).
    pub exit_code: u8,
    /// Set if the run ended early rather than by draining the queue.
    pub stop_reason: Option<StopReason>,
    pub elapsed: Duration,
}

/// One worker task's result: the queue slot it was admitted under, the case it ran, and
/// whatever the runner produced (a classified outcome, or an infrastructure error that never
/// got far enough to classify one).
struct Completion {
    iid: u64,
    case_id: CaseId,
    outcome: Result<CaseOutcome, crate::errors::RunnerError>,
}

/// Drives a [`DirectQueue`] to completion, persisting every case's record through a
/// [`CaseStore`] as it reaches a terminal status.
///
/// Owns the queue for the lifetime of the run: per §3's ownership note, only the executor (via
/// the queue's `get`/`done`/`close`) is allowed to transition a case's `status`, and only the
/// executor writes the case's ancillary runtime fields (`start_ts`, `stop_ts`, `working_dir`,
/// `returncode`, `measurements`).
pub struct Executor<'a> {
    queue: DirectQueue,
    store: CaseStore<'a>,
    work_root: Utf8PathBuf,
    config: ExecutorConfig,
    reporter: Option<Box<dyn Reporter + Send>>,
}

impl<'a> Executor<'a> {
    /// Builds an executor over `queue`, persisting through `store` and running each admitted
    /// case's working directory under `work_root` (ordinarily
    /// `SessionLayout::work_dir(iso_timestamp)`).
    pub fn new(queue: DirectQueue, store: CaseStore<'a>, work_root: Utf8PathBuf, config: ExecutorConfig) -> Self {
        Self {
            queue,
            store,
            work_root,
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

    /// Shards a case's working directory under `work_root` the same way the session store
    /// shards `cases/` records, so a large run doesn't put tens of thousands of directories
    /// side by side.
    fn working_dir_for(&self, id: &CaseId) -> Utf8PathBuf {
        let (prefix, rest) = id.shard();
        self.work_root.join(prefix).join(rest)
    }

    fn persist(&self, case_id: &CaseId) {
        if let Some(case) = self.queue.case(case_id) {
            if let Err(err) = self.store.write(case) {
                warn!(case = %case_id, %err, "failed to persist case record");
            }
        }
    }

    /// Drives the queue to completion.
    ///
    /// Each iteration either admits a new case and spawns it, or — when the queue reports
    /// `Busy`/`Empty` with work still outstanding — awaits whichever running case finishes next
    /// (or a short poll budget, to keep the session timeout check live). `FailFast` and a
    /// session timeout both end the loop the same way: stop admitting, ask every running case
    /// to cancel, drain what's left, then close the queue so anything still buffered is
    /// finalized to `not_run` rather than left dangling (§4.3 `close`).
    #[instrument(skip(self))]
    pub async fn run(mut self) -> ExecutorReport {
        let overall_start = Instant::now();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut in_flight: JoinSet<Completion> = JoinSet::new();
        let mut stop_reason: Option<StopReason> = None;

        self.emit(TestEvent::RunStarted {
            case_count: self.queue.counts().buffer,
        });

        'dispatch: loop {
            if let Some(timeout) = self.config.session_timeout {
                if overall_start.elapsed() > timeout {
                    stop_reason = Some(StopReason::SessionTimeout(overall_start.elapsed()));
                    break 'dispatch;
                }
            }

            match self.queue.get() {
                GetOutcome::Admitted(iid, case_id) => {
                    self.spawn_case(iid, case_id, &cancel_rx, &mut in_flight);
                }
                GetOutcome::Busy => {
                    self.wait_for_next_completion(&mut in_flight, Duration::from_millis(5)).await;
                }
                GetOutcome::Empty => {
                    if in_flight.is_empty() {
                        break 'dispatch;
                    }
                    // Nothing left to admit; wait on the next completion, but still on a budget
                    // short enough that a session timeout gets noticed promptly rather than
                    // only once every in-flight case happens to finish.
                    self.wait_for_next_completion(&mut in_flight, Duration::from_millis(200)).await;
                }
                GetOutcome::FailFast(failing) => {
                    stop_reason = Some(StopReason::FailFast(failing));
                    break 'dispatch;
                }
            }
        }

        if stop_reason.is_some() {
            debug!(?stop_reason, "dispatch loop stopping early, cancelling outstanding cases");
            let _ = cancel_tx.send(true);
        }
        while let Some(result) = in_flight.join_next().await {
            self.record_completion(result);
        }

        // Anything still sitting in `buffer` when we stopped early never got a chance to run;
        // `close` finalizes it to `not_run` (or `cancelled` for anything `close` still finds in
        // `busy`, though by this point `in_flight` has already been drained) so the roll-up
        // below sees a fully terminal case table.
        self.queue.close();
        let case_ids: Vec<CaseId> = self.queue.cases().map(|c| c.id.clone()).collect();
        for id in &case_ids {
            self.persist(id);
        }

        let exit_code = compute_exit_code(self.queue.cases().map(|c| c.status.value()));
        let elapsed = overall_start.elapsed();
        self.emit(TestEvent::RunFinished { exit_code, elapsed });

        ExecutorReport {
            exit_code,
            stop_reason,
            elapsed,
        }
    }

    fn spawn_case(
        &mut self,
        iid: u64,
        case_id: CaseId,
        cancel_rx: &watch::Receiver<bool>,
        in_flight: &mut JoinSet<Completion>,
    ) {
        let working_dir = self.working_dir_for(&case_id);
        if let Some(case) = self.queue.case_mut(&case_id) {
            case.start_ts = Some(Local::now());
            case.working_dir = Some(working_dir.clone());
        }

        let case = self
            .queue
            .case(&case_id)
            .expect("a case just admitted is always in the table")
            .clone();
        let acquisition = case.resources_held.clone().unwrap_or_else(Acquisition::empty);
        let pool = self.queue.pool().clone();
        let timeout_multiplier = self.config.timeout_multiplier;
        let mut cancel_rx = cancel_rx.clone();

        self.emit(TestEvent::CaseStarted {
            id: case_id.clone(),
            display_name: case.display_name.clone(),
        });

        in_flight.spawn(async move {
            let outcome = run_case(&case, &working_dir, &acquisition, &pool, timeout_multiplier, &mut cancel_rx).await;
            Completion {
                iid,
                case_id: case.id,
                outcome,
            }
        });
    }

    /// Awaits either the next completion or `budget`, whichever comes first. When nothing is
    /// in flight this just sleeps for a short tick so the caller's next loop iteration re-checks
    /// the session timeout and `queue.get()`.
    async fn wait_for_next_completion(&mut self, in_flight: &mut JoinSet<Completion>, budget: Duration) {
        if in_flight.is_empty() {
            tokio::time::sleep(budget.min(Duration::from_millis(5))).await;
            return;
        }
        tokio::select! {
            Some(result) = in_flight.join_next() => {
                self.record_completion(result);
            }
            _ = tokio::time::sleep(budget) => {}
        }
    }

    fn record_completion(&mut self, result: Result<Completion, tokio::task::JoinError>) {
        let completion = match result {
            Ok(completion) => completion,
            Err(join_err) => {
                warn!(%join_err, "a case's worker task panicked before reporting an outcome");
                return;
            }
        };
        let Completion { iid, case_id, outcome } = completion;

        let (terminal, returncode, measurements) = match outcome {
            Ok(case_outcome) => (case_outcome.status, Some(case_outcome.returncode), case_outcome.measurements),
            Err(err) => {
                warn!(case = %case_id, %err, "case runner failed before producing a classified outcome");
                (
                    Status::terminal(StatusValue::Failed, Some(err.to_string())),
                    None,
                    crate::runner::Measurements::default(),
                )
            }
        };

        if let Some(case) = self.queue.case_mut(&case_id) {
            case.stop_ts = Some(Local::now());
            case.returncode = returncode;
            case.measurements.merge_max(measurements);
        }

        self.queue.done(iid, terminal);

        // Build the owned event before calling `self.emit`, which needs `&mut self`: holding a
        // `&TestCase` borrowed from `self.queue` across that call would conflict with it.
        let event = self.queue.case(&case_id).map(|case| TestEvent::CaseFinished {
            id: case_id.clone(),
            display_name: case.display_name.clone(),
            status: case.status.clone(),
            elapsed: case
                .start_ts
                .zip(case.stop_ts)
                .map(|(start, stop)| (stop - start).to_std().unwrap_or_default())
                .unwrap_or_default(),
        });
        if let Some(event) = event {
            self.emit(event);
        }
        self.persist(&case_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::TestCase;
    use crate::resource::{NodeSpec, RequestItem, ResourcePool, ResourceRequest, SlotSpec};
    use crate::session::SessionLayout;
    use camino::Utf8PathBuf;
    use indexmap::IndexMap;
    use std::collections::BTreeMap;

    fn pool_2cpu() -> ResourcePool {
        let mut pool = ResourcePool::new();
        let mut resources = IndexMap::new();
        resources.insert(
            "cpus".to_string(),
            vec![
                SlotSpec { id: "0".into(), slots: 1 },
                SlotSpec { id: "1".into(), slots: 1 },
            ],
        );
        pool.fill(vec![NodeSpec { id: "n0".into(), resources }]).unwrap();
        pool
    }

    fn case(name: &str, command: &[&str]) -> TestCase {
        let mut c = TestCase::new(
            Utf8PathBuf::from("t.pyt"),
            name,
            BTreeMap::new(),
            command.iter().map(|s| s.to_string()).collect(),
        );
        c.id = name.to_string().into();
        c.required_resources = ResourceRequest::single_group([RequestItem::new("cpus", 1)]);
        c.timeout_sec = 5.0;
        c
    }

    #[tokio::test]
    async fn runs_two_independent_cases_to_success() {
        let dir = camino_tempfile::tempdir().unwrap();
        let layout = SessionLayout::init(dir.path()).unwrap();
        let store = CaseStore::new(&layout);
        let queue = DirectQueue::new(
            vec![case("a", &["true"]), case("b", &["true"])],
            pool_2cpu(),
            2,
            false,
        );
        let work_root = layout.work_dir("20260101T000000");

        let executor = Executor::new(queue, store, work_root, ExecutorConfig::default());
        let report = executor.run().await;

        assert_eq!(report.exit_code, 0);
        assert!(report.stop_reason.is_none());

        let a = store_for(&layout).read(&"a".to_string().into()).unwrap();
        let b = store_for(&layout).read(&"b".to_string().into()).unwrap();
        assert_eq!(a.status.value(), StatusValue::Success);
        assert_eq!(b.status.value(), StatusValue::Success);
        assert!(a.start_ts.is_some() && a.stop_ts.is_some());
    }

    #[tokio::test]
    async fn fail_fast_cancels_outstanding_and_skips_not_yet_admitted() {
        let dir = camino_tempfile::tempdir().unwrap();
        let layout = SessionLayout::init(dir.path()).unwrap();
        let store = CaseStore::new(&layout);
        let mut failing = case("a", &["false"]);
        failing.expected_exit = crate::case::ExpectedExit::Code(0);
        let queue = DirectQueue::new(vec![failing, case("b", &["true"])], pool_2cpu(), 1, true);
        let work_root = layout.work_dir("20260101T000000");

        let executor = Executor::new(queue, store, work_root, ExecutorConfig::default());
        let report = executor.run().await;

        assert!(matches!(report.stop_reason, Some(StopReason::FailFast(_))));
        assert_ne!(report.exit_code, 0);

        let b = store_for(&layout).read(&"b".to_string().into()).unwrap();
        assert_eq!(b.status.value(), StatusValue::NotRun);
    }

    #[tokio::test]
    async fn session_timeout_tears_down_a_long_running_case() {
        let dir = camino_tempfile::tempdir().unwrap();
        let layout = SessionLayout::init(dir.path()).unwrap();
        let store = CaseStore::new(&layout);
        let mut slow = case("a", &["sleep", "60"]);
        slow.timeout_sec = 60.0;
        let queue = DirectQueue::new(vec![slow], pool_2cpu(), 1, false);
        let work_root = layout.work_dir("20260101T000000");

        let config = ExecutorConfig {
            session_timeout: Some(Duration::from_millis(150)),
            timeout_multiplier: 1.0,
        };
        let executor = Executor::new(queue, store, work_root, config);
        let report = executor.run().await;

        assert!(matches!(report.stop_reason, Some(StopReason::SessionTimeout(_))));
        let a = store_for(&layout).read(&"a".to_string().into()).unwrap();
        assert_eq!(a.status.value(), StatusValue::Cancelled);
    }

    fn store_for(layout: &SessionLayout) -> CaseStore<'_> {
        CaseStore::new(layout)
    }
}
