// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Per-case timeout scaling.

use serde::{Deserialize, Serialize};

/// Multiplies a case's declared `timeout_sec` before the runner's poll loop acts on it, so a
/// slow shared machine can be given slack without editing every test's timeout.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeoutMultiplier(pub f64);

impl Default for TimeoutMultiplier {
    fn default() -> Self {
        Self(1.0)
    }
}
