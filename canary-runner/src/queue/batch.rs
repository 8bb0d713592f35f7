// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! The batch queue: admits [`TestBatch`] jobs to an external scheduler backend.
//!
//! Unlike [`super::DirectQueue`], a batch queue does not arbitrate resources itself (the
//! scheduler owns that) and does not resolve inter-batch dependencies (batches are only formed
//! from cases whose dependency edges already closed within the direct queue's world, or from
//! fully independent cases); what it adds over a plain FIFO is retry-with-ceiling, since a batch
//! job can fail for reasons unrelated to the cases inside it (a node going down, a scheduler
//! hiccup) and deserves a bounded number of resubmissions.

use super::{GetOutcome, QueueCounts};
use crate::case::{CaseId, TestBatch, TestCase};
use crate::session::CaseStore;
use crate::status::{Status, StatusValue};
use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

/// Statuses that count as a "terminal failure" for fail-fast purposes; mirrors the matching
/// rule in the direct queue.
fn is_fail_fast_trigger(value: StatusValue) -> bool {
    matches!(value, StatusValue::Failed | StatusValue::Timeout)
}

pub struct BatchQueue {
    batches: IndexMap<String, TestBatch>,
    buffer: IndexMap<u64, String>,
    busy: IndexMap<u64, String>,
    finished: IndexMap<u64, String>,
    not_run: IndexMap<u64, String>,
    next_iid: u64,
    workers: usize,
    fail_fast: bool,
    retry_ceiling: u32,
    retries: HashMap<String, u32>,
    failed_seen: Vec<String>,
}

impl BatchQueue {
    pub fn new(batches: Vec<TestBatch>, workers: usize, fail_fast: bool, retry_ceiling: u32) -> Self {
        let mut table = IndexMap::with_capacity(batches.len());
        let mut buffer = IndexMap::with_capacity(batches.len());
        let mut next_iid = 0u64;
        for batch in batches {
            let iid = next_iid;
            next_iid += 1;
            buffer.insert(iid, batch.id.clone());
            table.insert(batch.id.clone(), batch);
        }
        Self {
            batches: table,
            buffer,
            busy: IndexMap::new(),
            finished: IndexMap::new(),
            not_run: IndexMap::new(),
            next_iid,
            workers,
            fail_fast,
            retry_ceiling,
            retries: HashMap::new(),
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

    pub fn batch(&self, id: &str) -> Option<&TestBatch> {
        self.batches.get(id)
    }

    /// Admits the next batch in arrival order (batches have no priority key of their own; the
    /// partitioner that built them already ordered work by packing larger batches first).
    #[instrument(skip(self))]
    pub fn get(&mut self) -> GetOutcome<String> {
        if self.fail_fast && !self.failed_seen.is_empty() {
            return GetOutcome::FailFast(
                self.failed_seen
                    .iter()
                    .map(|id| id.clone().into())
                    .collect(),
            );
        }
        if self.busy.len() >= self.workers {
            return GetOutcome::Busy;
        }
        let Some((&iid, batch_id)) = self.buffer.iter().next() else {
            return GetOutcome::Empty;
        };
        let batch_id = batch_id.clone();
        self.buffer.shift_remove(&iid);
        self.busy.insert(iid, batch_id.clone());
        GetOutcome::Admitted(iid, batch_id)
    }

    /// Records a batch job's completion. `terminal` is the roll-up status derived from the
    /// batch's member cases (see [`crate::runner::classify`]).
    #[instrument(skip(self))]
    pub fn done(&mut self, iid: u64, terminal: Status) -> String {
        let batch_id = self
            .busy
            .shift_remove(&iid)
            .expect("done() called for an iid not in the busy bucket");

        if self.fail_fast && is_fail_fast_trigger(terminal.value()) {
            debug!(batch = %batch_id, "fail-fast trigger observed");
            self.failed_seen.push(batch_id.clone());
        }

        self.finished.insert(iid, batch_id.clone());
        batch_id
    }

    /// Resubmits a batch that failed for a reason unrelated to its cases (e.g. the scheduler
    /// reported the job itself as failed to launch).
    ///
    /// On ceiling-exceed, every member case still short of a verdict is marked
    /// `failed("Maximum retries exceeded")` and persisted through `store`. On requeue, every
    /// member case is reset to `ready` (no outstanding dependencies) or `pending` (has some) and
    /// persisted, so the next dispatch pass picks the batch back up as if freshly admitted.
    /// Returns `true` if the batch was put back in `buffer` for another attempt, `false` if its
    /// retry ceiling was reached and it was instead finalized into `not_run`.
    #[instrument(skip(self, cases, store))]
    pub fn retry(&mut self, iid: u64, cases: &mut HashMap<CaseId, TestCase>, store: &CaseStore<'_>) -> bool {
        let batch_id = self
            .busy
            .shift_remove(&iid)
            .expect("retry() called for an iid not in the busy bucket");

        let count = self.retries.entry(batch_id.clone()).or_insert(0);
        *count += 1;
        let member_ids = self.batches.get(&batch_id).map(|batch| batch.cases.clone()).unwrap_or_default();

        if *count > self.retry_ceiling {
            debug!(batch = %batch_id, retries = *count, "retry ceiling exceeded");
            mark_failed(&member_ids, cases, store, "Maximum retries exceeded");
            self.not_run.insert(iid, batch_id);
            return false;
        }

        debug!(batch = %batch_id, retries = *count, ceiling = self.retry_ceiling, "retrying batch");
        reset_for_retry(&member_ids, cases, store);
        self.buffer.insert(iid, batch_id);
        true
    }

    /// Force-terminates every batch still in `buffer` or `busy`.
    pub fn close(&mut self) {
        let buffered: Vec<(u64, String)> = self.buffer.drain(..).collect();
        for (iid, batch_id) in buffered {
            self.not_run.insert(iid, batch_id);
        }
        let busy: Vec<(u64, String)> = self.busy.drain(..).collect();
        for (iid, batch_id) in busy {
            self.finished.insert(iid, batch_id);
        }
    }

    /// Batch ids currently finalized into `not_run`, in case a caller needs to reconcile member
    /// case statuses for batches `close()` swept up without ever retrying them.
    pub fn not_run_batch_ids(&self) -> Vec<&str> {
        self.not_run.values().map(|id| id.as_str()).collect()
    }
}

/// Marks every member case still short of a verdict as `failed(detail)` and persists it,
/// mirroring `scheduler::batch_runner`'s forced-terminal-assignment idiom (bypassing
/// `Status::transition_to`'s narrower legal-transition set, since a retry ceiling forces a
/// verdict regardless of where the case currently sits).
fn mark_failed(member_ids: &[crate::case::CaseId], cases: &mut HashMap<CaseId, TestCase>, store: &CaseStore<'_>, detail: &str) {
    for id in member_ids {
        let Some(case) = cases.get_mut(id) else { continue };
        if !case.status.is_terminal() {
            case.status = Status::terminal(StatusValue::Failed, Some(detail.to_string()));
        }
        if let Err(err) = store.write(case) {
            warn!(case = %id, %err, "failed to persist case record");
        }
    }
}

/// Resets every member case back to `ready`/`pending` so the next dispatch pass treats the
/// retried batch as freshly admitted.
fn reset_for_retry(member_ids: &[crate::case::CaseId], cases: &mut HashMap<CaseId, TestCase>, store: &CaseStore<'_>) {
    for id in member_ids {
        let Some(case) = cases.get_mut(id) else { continue };
        let next = if case.dependencies.is_empty() {
            StatusValue::Ready
        } else {
            StatusValue::Pending
        };
        case.status = Status::new(next, None::<String>);
        if let Err(err) = store.write(case) {
            warn!(case = %id, %err, "failed to persist case record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(id: &str) -> TestBatch {
        TestBatch {
            id: id.to_string(),
            cases: Vec::new(),
            worker_count: 1,
        }
    }

    #[test]
    fn admits_in_arrival_order_and_respects_worker_limit() {
        let mut queue = BatchQueue::new(vec![batch("b0"), batch("b1")], 1, false, 3);
        match queue.get() {
            GetOutcome::Admitted(_, id) => assert_eq!(id, "b0"),
            other => panic!("expected b0 admitted, got {other:?}"),
        }
        assert!(matches!(queue.get(), GetOutcome::Busy));
    }

    fn batch_with_case(id: &str, case_id: &str) -> TestBatch {
        TestBatch {
            id: id.to_string(),
            cases: vec![CaseId::from(case_id.to_string())],
            worker_count: 1,
        }
    }

    fn member_case(case_id: &str) -> TestCase {
        let mut case = TestCase::new(
            camino::Utf8PathBuf::from("t.pyt"),
            case_id,
            std::collections::BTreeMap::new(),
            vec!["true".to_string()],
        );
        case.id = case_id.to_string().into();
        case.status = Status::new(StatusValue::Ready, None::<String>);
        case
    }

    #[test]
    fn retry_requeues_until_ceiling_then_gives_up() {
        let dir = camino_tempfile::tempdir().unwrap();
        let layout = crate::session::SessionLayout::init(dir.path()).unwrap();
        let store = CaseStore::new(&layout);
        let mut cases: HashMap<CaseId, TestCase> =
            [(CaseId::from("a".to_string()), member_case("a"))].into_iter().collect();

        let mut queue = BatchQueue::new(vec![batch_with_case("b0", "a")], 1, false, 2);
        for attempt in 0..2 {
            let GetOutcome::Admitted(iid, _) = queue.get() else {
                panic!("expected admission on attempt {attempt}");
            };
            // Simulate the case having moved to `pending` while its batch was in flight, so the
            // requeue reset has something to observably undo.
            cases.get_mut(&CaseId::from("a".to_string())).unwrap().status =
                Status::new(StatusValue::Running, None::<String>);
            assert!(queue.retry(iid, &mut cases, &store), "attempt {attempt} should still have budget");
            assert_eq!(
                cases[&CaseId::from("a".to_string())].status.value(),
                StatusValue::Ready,
                "a requeued batch resets its member cases to ready"
            );
        }
        let GetOutcome::Admitted(iid, _) = queue.get() else {
            panic!("expected final admission");
        };
        assert!(!queue.retry(iid, &mut cases, &store), "ceiling should now be exceeded");
        assert_eq!(queue.counts().not_run, 1);
        assert_eq!(queue.counts().buffer, 0);
        assert_eq!(cases[&CaseId::from("a".to_string())].status.value(), StatusValue::Failed);
        assert_eq!(cases[&CaseId::from("a".to_string())].status.detail(), Some("Maximum retries exceeded"));

        let persisted = store.read(&CaseId::from("a".to_string())).unwrap();
        assert_eq!(persisted.status.value(), StatusValue::Failed);
    }

    #[test]
    fn fail_fast_surfaces_batch_id_after_terminal_failure() {
        let mut queue = BatchQueue::new(vec![batch("b0"), batch("b1")], 2, true, 3);
        let GetOutcome::Admitted(iid, id) = queue.get() else {
            panic!("expected admission");
        };
        queue.done(iid, Status::terminal(StatusValue::Failed, None::<String>));
        match queue.get() {
            GetOutcome::FailFast(ids) => assert_eq!(ids, vec![crate::case::CaseId::from(id)]),
            other => panic!("expected fail-fast, got {other:?}"),
        }
    }
}
