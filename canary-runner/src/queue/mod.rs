// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! The dependency-aware resource queue: the single gate between "cases (or batches) to try"
//! and "workers".
//!
//! Per the design notes (§9), `get()` returning `Busy`/`Empty` as exceptions (as the Python
//! source does) is replaced here with an explicit result enum the dispatcher matches on.

mod batch;
mod direct;

pub use batch::BatchQueue;
pub use direct::DirectQueue;

use crate::case::CaseId;

/// The result of a single [`DirectQueue::get`] / [`BatchQueue::get`] call.
#[derive(Debug)]
pub enum GetOutcome<T> {
    /// An item was admitted: resources were acquired and it moved to the `busy` bucket.
    Admitted(u64, T),
    /// No workers are free right now; try again shortly.
    Busy,
    /// The buffer is empty: there is nothing left to try admitting.
    Empty,
    /// Fail-fast is enabled and a terminal failure has been observed.
    FailFast(Vec<CaseId>),
}

/// Read-only aggregate view of queue bucket sizes, for progress reporting.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct QueueCounts {
    pub buffer: usize,
    pub busy: usize,
    pub finished: usize,
    pub not_run: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.buffer + self.busy + self.finished + self.not_run
    }
}
