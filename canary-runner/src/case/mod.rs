// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Test case records and the dependency graph they form.

mod graph;
mod id;
mod test_case;

pub use graph::{
    all_dependencies_satisfied, dep_condition_flags, first_blocking_dependency, reachable_from,
    topological_order, DepFlag, StatusLookup,
};
pub use id::CaseId;
pub use test_case::{
    Asset, AssetAction, DepExpect, Dependency, EnvironmentMod, ExpectedExit, TestCase,
};

/// A dependency-closed batch of cases submitted to an external scheduler as one job.
///
/// Exists only when a [`crate::scheduler::SchedulerBackend`] other than the no-op direct path
/// is configured; see [`crate::queue::batch`].
#[derive(Clone, Debug)]
pub struct TestBatch {
    pub id: String,
    pub cases: Vec<CaseId>,
    pub worker_count: usize,
}

impl TestBatch {
    /// Computes this batch's aggregate resource request: the maximum per-type, per-group
    /// demand across its cases, since the cases inside a batch run cooperatively against a
    /// sub-allocation rather than each acquiring their own node.
    pub fn required_cpu_slots(&self, cases: &[TestCase]) -> u32 {
        cases
            .iter()
            .filter(|c| self.cases.contains(&c.id))
            .map(|c| c.cpu_slots())
            .max()
            .unwrap_or(0)
    }

    /// Sum of the member cases' runtime estimates, used to size the scheduler job's wallclock
    /// request.
    pub fn runtime_estimate(&self, cases: &[TestCase]) -> f64 {
        cases
            .iter()
            .filter(|c| self.cases.contains(&c.id))
            .map(|c| c.runtime_estimate)
            .sum()
    }
}
