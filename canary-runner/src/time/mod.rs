// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Timekeeping helpers shared by the runner and executor.

mod stopwatch;

pub(crate) use stopwatch::{stopwatch, StopwatchSnapshot, StopwatchStart};
