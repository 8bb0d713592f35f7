// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! The `TestCase` record: immutable identity and inputs, plus the mutable runtime state the
//! queue and runner advance as the case moves through its lifecycle.

use super::id::CaseId;
use crate::resource::{Acquisition, ResourceRequest};
use crate::runner::Measurements;
use crate::status::{Status, StatusValue};
use camino::Utf8PathBuf;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The outcome a case's exit code is checked against.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedExit {
    /// An exact exit code is expected.
    ///
    /// `Code(0)` is the ordinary "this test should pass" case. A positive `Code(n)` for `n !=
    /// 0` requires an *exact* match to count as the expected (`xfail`) outcome. A negative
    /// `Code(n)` is treated identically to [`ExpectedExit::Fail`]: any nonzero exit counts,
    /// since the source's own runner variants disagree on whether the magnitude of a negative
    /// expectation matters, and requiring an exact match on a signal-derived negative number
    /// is rarely what a test author means (see DESIGN.md, Open Question (a)).
    Code(i32),
    /// The case is expected to report a diff (exit with the well-known diff code).
    Diff,
    /// The case is expected to fail: any nonzero exit code is the expected outcome.
    Fail,
}

impl Default for ExpectedExit {
    fn default() -> Self {
        Self::Code(0)
    }
}

/// A single environment mutation applied, in declared order, over a copy of the process
/// environment before the case's command is spawned.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EnvironmentMod {
    Set { var: String, value: String },
    Unset { var: String },
    PrependPath { var: String, value: String },
    AppendPath { var: String, value: String },
}

/// How an [`Asset`] should be staged into the case's working directory.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetAction {
    Copy,
    Link,
}

/// A source file the case needs staged into its working directory before it runs.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub action: AssetAction,
    pub src: Utf8PathBuf,
    pub dst: Utf8PathBuf,
}

/// What a dependency edge requires of the upstream case's terminal status.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepExpect {
    /// Any terminal status satisfies the edge (most dependencies just need the upstream case
    /// to have *run*, not to have succeeded).
    Any,
    /// The upstream case must land on this exact status.
    Exact(StatusValue),
    /// The upstream case must land on one of these statuses.
    OneOf(Vec<StatusValue>),
}

impl DepExpect {
    /// Whether `status` (assumed terminal) satisfies this expectation.
    pub fn is_satisfied_by(&self, status: StatusValue) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => *expected == status,
            Self::OneOf(set) => set.contains(&status),
        }
    }
}

/// One dependency edge: the upstream case and what its terminal status must be.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub case_id: CaseId,
    pub expect: DepExpect,
}

/// A single test case: its immutable spec plus the mutable state the scheduler advances.
///
/// `TestCase` records are conceptually shared by reference once a session begins: the
/// [`crate::queue`] module owns the canonical copy and is the only thing that mutates
/// `status`/`start_ts`/`stop_ts`/`returncode`/`resources_held` (through the persistence channel
/// described in [`crate::session`]), mirroring the "only the owning Runner may mutate a case's
/// terminal status" rule from the design.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestCase {
    // --- immutable identity -------------------------------------------------
    pub id: CaseId,
    pub display_name: String,
    pub file_path: Utf8PathBuf,
    pub keywords: Vec<String>,
    pub parameters: BTreeMap<String, String>,
    pub required_resources: ResourceRequest,
    pub timeout_sec: f64,
    pub expected_exit: ExpectedExit,
    pub dependencies: Vec<Dependency>,
    pub environment_mods: Vec<EnvironmentMod>,
    pub assets: Vec<Asset>,
    pub exclusive: bool,
    /// The command to run, as an argv list (no shell is invoked unless `command[0]` is itself
    /// a shell).
    pub command: Vec<String>,
    /// Estimated wall-clock runtime in seconds, used by the queue's priority key and the batch
    /// partitioner. Defaults to `timeout_sec` when no better estimate is known.
    pub runtime_estimate: f64,

    // --- mutable runtime state ----------------------------------------------
    pub status: Status,
    pub start_ts: Option<DateTime<Local>>,
    pub stop_ts: Option<DateTime<Local>>,
    pub returncode: Option<i32>,
    pub resources_held: Option<Acquisition>,
    pub working_dir: Option<Utf8PathBuf>,
    /// Peak resource usage sampled while the case ran; `Default` (all `None`) until a runner
    /// records a sample.
    pub measurements: Measurements,
}

impl TestCase {
    /// Builds a case's identity from its spec fields, leaving runtime state freshly created.
    pub fn new(
        file_path: Utf8PathBuf,
        display_name: impl Into<String>,
        parameters: BTreeMap<String, String>,
        command: Vec<String>,
    ) -> Self {
        let display_name = display_name.into();
        let id = CaseId::compute(&file_path, &display_name, &parameters);
        Self {
            id,
            display_name,
            file_path,
            keywords: Vec::new(),
            parameters,
            required_resources: ResourceRequest::empty(),
            timeout_sec: 60.0,
            expected_exit: ExpectedExit::default(),
            dependencies: Vec::new(),
            environment_mods: Vec::new(),
            assets: Vec::new(),
            exclusive: false,
            command,
            runtime_estimate: 60.0,
            status: Status::created(),
            start_ts: None,
            stop_ts: None,
            returncode: None,
            resources_held: None,
            working_dir: None,
            measurements: Measurements::default(),
        }
    }

    pub fn cpu_slots(&self) -> u32 {
        self.required_resources.total_slots("cpus")
    }

    /// The priority key used by the direct queue to order admission candidates: larger jobs
    /// (by a blend of cpu demand and estimated runtime) are tried first, so they don't end up
    /// stuck waiting behind a long tail of small jobs near the end of a run.
    pub fn priority_key(&self) -> f64 {
        let cpus = self.cpu_slots() as f64;
        let runtime = self.runtime_estimate;
        (cpus * cpus + runtime * runtime).sqrt()
    }
}
