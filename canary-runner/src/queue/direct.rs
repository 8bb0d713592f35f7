// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! The direct queue: the ordinary, no-external-scheduler path. Owns the canonical
//! `TestCase` table and the [`ResourcePool`] it arbitrates against.

use super::{GetOutcome, QueueCounts};
use crate::case::{
    all_dependencies_satisfied, first_blocking_dependency, CaseId, StatusLookup, TestCase,
};
use crate::resource::ResourcePool;
use crate::status::{Status, StatusValue};
use indexmap::IndexMap;
use tracing::{debug, instrument};

/// Statuses that, observed on `done()`, count as a "terminal failure" for fail-fast purposes.
/// Expected outcomes (`xfail`, `xdiff`) and non-execution outcomes (`skipped`, `cancelled`,
/// `not_run`) do not trigger it.
fn is_fail_fast_trigger(value: StatusValue) -> bool {
    matches!(value, StatusValue::Failed | StatusValue::Timeout)
}

/// The dependency-aware, resource-arbitrated queue of individual test cases.
///
/// `get`/`done` are the only two operations the dispatcher calls in steady state; both are
/// synchronous and meant to be called with an external lock held across the whole call (see
/// the concurrency note on [`crate::executor`]), never across an `.await`.
pub struct DirectQueue {
    table: IndexMap<CaseId, TestCase>,
    pool: ResourcePool,
    buffer: IndexMap<u64, CaseId>,
    busy: IndexMap<u64, CaseId>,
    finished: IndexMap<u64, CaseId>,
    not_run: IndexMap<u64, CaseId>,
    next_iid: u64,
    workers: usize,
    fail_fast: bool,
    exclusive_lock: bool,
    failed_seen: Vec<CaseId>,
}

impl StatusLookup for DirectQueue {
    fn status_of(&self, id: &CaseId) -> Option<StatusValue> {
        self.table.get(id).map(|c| c.status.value())
    }
}

impl DirectQueue {
    /// Builds a queue from a full case list and the resource pool it will arbitrate against.
    /// Every case starts in the `buffer` bucket; cases without dependencies are immediately
    /// marked `ready`, the rest start `pending`.
    pub fn new(mut cases: Vec<TestCase>, pool: ResourcePool, workers: usize, fail_fast: bool) -> Self {
        let mut table = IndexMap::with_capacity(cases.len());
        let mut buffer = IndexMap::with_capacity(cases.len());
        let mut next_iid = 0u64;

        for case in &mut cases {
            let next = if case.dependencies.is_empty() {
                Status::new(StatusValue::Ready, None::<String>)
            } else {
                Status::new(StatusValue::Pending, None::<String>)
            };
            case.status.transition_to(next);
        }

        for case in cases {
            let iid = next_iid;
            next_iid += 1;
            buffer.insert(iid, case.id.clone());
            table.insert(case.id.clone(), case);
        }

        Self {
            table,
            pool,
            buffer,
            busy: IndexMap::new(),
            finished: IndexMap::new(),
            not_run: IndexMap::new(),
            next_iid,
            workers,
            fail_fast,
            exclusive_lock: false,
            failed_seen: Vec::new(),
        }
    }

    pub fn counts(&self) -> QueueCounts {
        QueueCounts {
            buffer: self.buffer.len(),
            busy: self.busy.len(),
            finished: self.finished.len(),
            not_run: self.not_run.len(),
        }
    }

    pub fn status_line(&self) -> String {
        let c = self.counts();
        format!(
            "buffer={} busy={} finished={} not_run={}",
            c.buffer, c.busy, c.finished, c.not_run
        )
    }

    pub fn case(&self, id: &CaseId) -> Option<&TestCase> {
        self.table.get(id)
    }

    /// Mutable access to a case record for the executor to record ancillary runtime state
    /// (`start_ts`, `stop_ts`, `working_dir`, `returncode`, `measurements`) that isn't part of
    /// the lifecycle the queue itself arbitrates. Status transitions still only ever happen
    /// through [`Self::get`]/[`Self::done`]/[`Self::close`].
    pub fn case_mut(&mut self, id: &CaseId) -> Option<&mut TestCase> {
        self.table.get_mut(id)
    }

    pub fn cases(&self) -> impl Iterator<Item = &TestCase> {
        self.table.values()
    }

    /// The resource pool this queue arbitrates against, for building a running case's
    /// environment (gid -> local id resolution).
    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    /// Attempts to admit the next case the dispatcher should run.
    ///
    /// Walks the buffer once in priority order (largest estimated job first, ties broken by
    /// arrival order), advancing each candidate's dependency state as it goes and admitting the
    /// first one that both has `CanRun` on every dependency edge and can acquire its resources.
    /// Candidates that cannot yet run are left in the buffer for the next call rather than
    /// requeued, so admission order is stable across calls.
    #[instrument(skip(self))]
    pub fn get(&mut self) -> GetOutcome<CaseId> {
        if self.fail_fast && !self.failed_seen.is_empty() {
            return GetOutcome::FailFast(self.failed_seen.clone());
        }
        if self.busy.len() >= self.workers {
            return GetOutcome::Busy;
        }
        if self.buffer.is_empty() {
            return GetOutcome::Empty;
        }

        let mut candidates: Vec<(u64, CaseId)> = self
            .buffer
            .iter()
            .map(|(iid, id)| (*iid, id.clone()))
            .collect();
        candidates.sort_by(|(a_iid, a_id), (b_iid, b_id)| {
            let a_key = self.table[a_id].priority_key();
            let b_key = self.table[b_id].priority_key();
            b_key
                .partial_cmp(&a_key)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a_iid.cmp(b_iid))
        });

        for (iid, case_id) in candidates {
            if self.advance_and_skip_if_blocked(&case_id) {
                self.buffer.shift_remove(&iid);
                self.finished.insert(iid, case_id);
                continue;
            }

            let ready = self.table[&case_id].status.value() == StatusValue::Ready;
            if !ready {
                continue;
            }

            let exclusive = self.table[&case_id].exclusive;
            if exclusive && !self.busy.is_empty() {
                continue;
            }
            if self.exclusive_lock {
                continue;
            }

            if self.mask_if_unsatisfiable(&case_id) {
                self.buffer.shift_remove(&iid);
                self.finished.insert(iid, case_id);
                continue;
            }

            let request = self.table[&case_id].required_resources.clone();
            match self.pool.acquire(&request) {
                Ok(acquisition) => {
                    let case = self.table.get_mut(&case_id).expect("case in table");
                    case.resources_held = Some(acquisition);
                    case.status
                        .transition_to(Status::new(StatusValue::Running, None::<String>));
                    if exclusive {
                        self.exclusive_lock = true;
                    }
                    self.buffer.shift_remove(&iid);
                    self.busy.insert(iid, case_id.clone());
                    return GetOutcome::Admitted(iid, case_id);
                }
                Err(_unavailable) => continue,
            }
        }

        if self.buffer.is_empty() {
            GetOutcome::Empty
        } else {
            GetOutcome::Busy
        }
    }

    /// Advances `case_id`'s dependency-derived status (pending -> ready, or -> skipped if a
    /// dependency will never satisfy its edge). Returns `true` if the case was just finalized
    /// as `skipped` and should be moved out of the buffer.
    fn advance_and_skip_if_blocked(&mut self, case_id: &CaseId) -> bool {
        let status_value = self.table[case_id].status.value();
        if status_value != StatusValue::Pending && status_value != StatusValue::Ready {
            return false;
        }

        let case = &self.table[case_id];
        if case.dependencies.is_empty() {
            return false;
        }

        let blocking = first_blocking_dependency(case, self);
        if let Some(dep_id) = blocking {
            let detail = format!("dependency `{dep_id}` did not satisfy the expected condition");
            let case = self.table.get_mut(case_id).expect("case in table");
            case.status
                .transition_to(Status::terminal(StatusValue::Skipped, Some(detail)));
            return true;
        }

        if status_value == StatusValue::Pending && all_dependencies_satisfied(case, self) {
            let case = self.table.get_mut(case_id).expect("case in table");
            case.status
                .transition_to(Status::new(StatusValue::Ready, None::<String>));
        }

        false
    }

    /// If `case_id` just became `ready` and its resource request can never be satisfied by the
    /// pool as configured, masks it as `skipped` (permanent: no amount of waiting will change
    /// the answer). Returns whether it was masked this call.
    fn mask_if_unsatisfiable(&mut self, case_id: &CaseId) -> bool {
        let case = &self.table[case_id];
        if case.status.value() != StatusValue::Ready {
            return false;
        }
        match self.pool.satisfiable(&case.required_resources) {
            Ok(()) => false,
            Err(err) => {
                let case = self.table.get_mut(case_id).expect("case in table");
                case.status.transition_to(Status::terminal(
                    StatusValue::Skipped,
                    Some(format!("resources unsatisfiable: {}", err.reason)),
                ));
                true
            }
        }
    }

    /// Records a case's completion: releases its resources, clears an exclusive hold, and
    /// moves it from `busy` to `finished`.
    #[instrument(skip(self))]
    pub fn done(&mut self, iid: u64, terminal: Status) -> CaseId {
        let case_id = self
            .busy
            .shift_remove(&iid)
            .expect("done() called for an iid not in the busy bucket");

        let case = self.table.get_mut(&case_id).expect("case in table");
        if let Some(acquisition) = case.resources_held.take() {
            self.pool.reclaim(&acquisition);
        }
        if case.exclusive {
            self.exclusive_lock = false;
        }
        case.status.transition_to(terminal.clone());

        if self.fail_fast && is_fail_fast_trigger(terminal.value()) {
            debug!(case = %case_id, "fail-fast trigger observed");
            self.failed_seen.push(case_id.clone());
        }

        self.finished.insert(iid, case_id.clone());
        case_id
    }

    /// Force-terminates every case still in `buffer` or `busy`, used when the session is being
    /// torn down early (fail-fast, session timeout, or a keyboard-driven quit). Buffered cases
    /// become `not_run`; busy cases become `cancelled` (their resources are reclaimed).
    pub fn close(&mut self) {
        let buffered: Vec<(u64, CaseId)> = self.buffer.drain(..).collect();
        for (iid, case_id) in buffered {
            let case = self.table.get_mut(&case_id).expect("case in table");
            case.status.transition_to(Status::terminal(
                StatusValue::NotRun,
                Some("session closed before case could start".to_string()),
            ));
            self.not_run.insert(iid, case_id);
        }

        let busy: Vec<(u64, CaseId)> = self.busy.drain(..).collect();
        for (iid, case_id) in busy {
            let case = self.table.get_mut(&case_id).expect("case in table");
            if let Some(acquisition) = case.resources_held.take() {
                self.pool.reclaim(&acquisition);
            }
            case.status.transition_to(Status::terminal(
                StatusValue::Cancelled,
                Some("session closed while case was running".to_string()),
            ));
            self.finished.insert(iid, case_id);
        }
        self.exclusive_lock = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{DepExpect, Dependency};
    use crate::resource::{NodeSpec, RequestItem, ResourceRequest, SlotSpec};
    use camino::Utf8PathBuf;
    use indexmap::IndexMap as Map;
    use std::collections::BTreeMap;

    fn pool_1cpu() -> ResourcePool {
        let mut pool = ResourcePool::new();
        let mut resources = Map::new();
        resources.insert(
            "cpus".to_string(),
            vec![SlotSpec {
                id: "0".into(),
                slots: 1,
            }],
        );
        pool.fill(vec![NodeSpec {
            id: "n0".into(),
            resources,
        }])
        .unwrap();
        pool
    }

    fn case(name: &str) -> TestCase {
        let mut c = TestCase::new(
            Utf8PathBuf::from("t.pyt"),
            name,
            BTreeMap::new(),
            vec!["true".to_string()],
        );
        c.id = name.to_string().into();
        c.required_resources = ResourceRequest::single_group([RequestItem::new("cpus", 1)]);
        c
    }

    #[test]
    fn admits_case_with_no_dependencies() {
        let mut queue = DirectQueue::new(vec![case("a")], pool_1cpu(), 1, false);
        match queue.get() {
            GetOutcome::Admitted(_, id) => assert_eq!(id, "a".to_string().into()),
            other => panic!("expected admission, got {other:?}"),
        }
    }

    #[test]
    fn blocks_on_pending_dependency_then_admits_once_satisfied() {
        let mut b = case("b");
        b.dependencies.push(Dependency {
            case_id: "a".to_string().into(),
            expect: DepExpect::Any,
        });
        let mut queue = DirectQueue::new(vec![case("a"), b], pool_1cpu(), 1, false);

        let GetOutcome::Admitted(a_iid, a_id) = queue.get() else {
            panic!("expected a to admit first");
        };
        assert_eq!(a_id, "a".to_string().into());
        assert!(matches!(queue.get(), GetOutcome::Busy));

        queue.done(a_iid, Status::terminal(StatusValue::Success, None::<String>));

        match queue.get() {
            GetOutcome::Admitted(_, id) => assert_eq!(id, "b".to_string().into()),
            other => panic!("expected b to admit after a finished, got {other:?}"),
        }
    }

    #[test]
    fn skips_case_whose_dependency_failed_exact_expectation() {
        let mut b = case("b");
        b.dependencies.push(Dependency {
            case_id: "a".to_string().into(),
            expect: DepExpect::Exact(StatusValue::Success),
        });
        let mut queue = DirectQueue::new(vec![case("a"), b], pool_1cpu(), 1, false);

        let GetOutcome::Admitted(a_iid, _) = queue.get() else {
            panic!("expected a to admit");
        };
        queue.done(a_iid, Status::terminal(StatusValue::Failed, None::<String>));

        assert!(matches!(queue.get(), GetOutcome::Empty));
        assert_eq!(
            queue.case(&"b".to_string().into()).unwrap().status.value(),
            StatusValue::Skipped
        );
    }

    #[test]
    fn fail_fast_surfaces_after_first_terminal_failure() {
        let mut queue = DirectQueue::new(vec![case("a"), case("b")], pool_1cpu(), 1, true);
        let GetOutcome::Admitted(iid, id) = queue.get() else {
            panic!("expected admission");
        };
        queue.done(iid, Status::terminal(StatusValue::Failed, None::<String>));
        match queue.get() {
            GetOutcome::FailFast(ids) => assert_eq!(ids, vec![id]),
            other => panic!("expected fail-fast, got {other:?}"),
        }
    }

    #[test]
    fn exclusive_case_holds_the_queue_until_it_finishes() {
        let mut pool = ResourcePool::new();
        let mut resources = Map::new();
        resources.insert(
            "cpus".to_string(),
            vec![
                SlotSpec {
                    id: "0".into(),
                    slots: 1,
                },
                SlotSpec {
                    id: "1".into(),
                    slots: 1,
                },
            ],
        );
        pool.fill(vec![NodeSpec {
            id: "n0".into(),
            resources,
        }])
        .unwrap();

        let mut a = case("a");
        a.exclusive = true;
        let mut queue = DirectQueue::new(vec![a, case("b")], pool, 2, false);

        let GetOutcome::Admitted(a_iid, a_id) = queue.get() else {
            panic!("expected the exclusive case to admit into an otherwise-idle queue");
        };
        assert_eq!(a_id, "a".to_string().into());

        // `b` has a free slot available but must wait: the exclusive case now holds the queue.
        assert!(matches!(queue.get(), GetOutcome::Busy));

        queue.done(a_iid, Status::terminal(StatusValue::Success, None::<String>));
        match queue.get() {
            GetOutcome::Admitted(_, id) => assert_eq!(id, "b".to_string().into()),
            other => panic!("expected b to admit once the exclusive case finished, got {other:?}"),
        }
    }

    #[test]
    fn mask_permanently_skips_unsatisfiable_resource_request() {
        let mut a = case("a");
        a.required_resources = ResourceRequest::single_group([RequestItem::new("gpus", 1)]);
        let mut queue = DirectQueue::new(vec![a], pool_1cpu(), 1, false);
        assert!(matches!(queue.get(), GetOutcome::Busy | GetOutcome::Empty));
        assert_eq!(
            queue.case(&"a".to_string().into()).unwrap().status.value(),
            StatusValue::Skipped
        );
    }

    #[test]
    fn close_drains_buffer_to_not_run_and_busy_to_cancelled() {
        let mut queue = DirectQueue::new(vec![case("a"), case("b")], pool_1cpu(), 1, false);
        let GetOutcome::Admitted(_, _) = queue.get() else {
            panic!("expected admission");
        };
        queue.close();
        assert_eq!(
            queue.case(&"b".to_string().into()).unwrap().status.value(),
            StatusValue::NotRun
        );
        assert_eq!(
            queue.case(&"a".to_string().into()).unwrap().status.value(),
            StatusValue::Cancelled
        );
        assert_eq!(queue.counts().buffer, 0);
        assert_eq!(queue.counts().busy, 0);
    }
}
