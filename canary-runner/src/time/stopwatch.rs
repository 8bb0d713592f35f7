// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Stopwatch for tracking how long a case or session has been running.
//!
//! We use a combination of a `SystemTime`-backed `DateTime<Local>` (so we can persist a
//! human-readable, wall-clock `start_ts`) and a monotonic `Instant` (so elapsed-time
//! comparisons against timeouts are immune to clock adjustments).

use chrono::{DateTime, Local};
use std::time::{Duration, Instant};

pub(crate) fn stopwatch() -> StopwatchStart {
    StopwatchStart::new()
}

#[derive(Clone, Debug)]
pub(crate) struct StopwatchStart {
    start_time: DateTime<Local>,
    instant: Instant,
}

impl StopwatchStart {
    fn new() -> Self {
        Self {
            start_time: Local::now(),
            instant: Instant::now(),
        }
    }

    pub(crate) fn snapshot(&self) -> StopwatchSnapshot {
        StopwatchSnapshot {
            start_time: self.start_time,
            elapsed: self.instant.elapsed(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct StopwatchSnapshot {
    pub(crate) start_time: DateTime<Local>,
    pub(crate) elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_grows_monotonically() {
        let start = stopwatch();
        let first = start.snapshot().elapsed;
        std::thread::sleep(Duration::from_millis(20));
        let second = start.snapshot().elapsed;
        assert!(second >= first);
    }
}
