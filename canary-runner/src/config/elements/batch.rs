// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Batch-queue-specific configuration: which external scheduler (if any) batches are
//! submitted through, and how the default partitioner packs cases into batches.

use super::retry::RetryCeiling;
use serde::{Deserialize, Serialize};

/// Which external scheduler backend (if any) batch cases are submitted through.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    /// No external scheduler: every case runs through the direct queue.
    None,
    /// Run composed batch job scripts as local subprocesses (useful for tests, and for
    /// "batch" dry runs on a single machine).
    Shell,
    Slurm,
    Pbs,
}

impl Default for SchedulerKind {
    fn default() -> Self {
        Self::None
    }
}

/// Whether a batch job runs all its cases cooperatively in one scheduler job, or as one
/// sub-job per case.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchScheme {
    Sequential,
    Isolate,
}

impl Default for BatchScheme {
    fn default() -> Self {
        Self::Sequential
    }
}

/// Batch-queue-specific configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub scheduler: SchedulerKind,
    pub workers: usize,
    pub scheme: BatchScheme,
    pub retry_ceiling: RetryCeiling,
    /// Maximum aggregate runtime (seconds) the default partitioner packs into one batch.
    pub max_batch_runtime_sec: f64,
    /// If set, caps the number of batches the partitioner produces regardless of runtime.
    pub max_batch_count: Option<usize>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerKind::default(),
            workers: 5,
            scheme: BatchScheme::default(),
            retry_ceiling: RetryCeiling::default(),
            max_batch_runtime_sec: 3600.0,
            max_batch_count: None,
        }
    }
}
