// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! One small struct per configuration concern, mirroring `nextest-runner::config::elements`.

mod batch;
mod retry;
mod timeout;

pub use batch::{BatchConfig, BatchScheme, SchedulerKind};
pub use retry::RetryCeiling;
pub use timeout::TimeoutMultiplier;
