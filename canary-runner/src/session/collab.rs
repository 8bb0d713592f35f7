// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Collaborator contracts: the traits through which the core integrates with discovery,
//! reporting, and (see [`crate::scheduler::SchedulerBackend`]) external batch schedulers,
//! without implementing any of their full logic itself.
//!
//! Grounded in `nextest-runner::reporter`'s `TestEvent`/`Reporter` split, simplified to an
//! owned, non-generic event type: this core has no zero-copy test-list borrow to thread through
//! a lifetime, so `TestEvent` just owns its fields.

use crate::case::{CaseId, TestCase};
use crate::errors::SessionError;
use crate::status::Status;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single notable transition in a session's lifecycle, passed to every configured
/// [`Reporter`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestEvent {
    /// The session started with the given number of cases selected to run.
    RunStarted { case_count: usize },
    /// A case was admitted and started running.
    CaseStarted { id: CaseId, display_name: String },
    /// A case reached a terminal status.
    CaseFinished {
        id: CaseId,
        display_name: String,
        status: Status,
        elapsed: Duration,
    },
    /// The session finished; `exit_code` is the bitmask described in §6.
    RunFinished { exit_code: u8, elapsed: Duration },
}

/// Discovers the set of [`TestCase`]s a `pathspec`/filter expression selects.
///
/// The core ships [`JsonDiscoverer`], sufficient to drive `run`/`find`/`describe` end-to-end
/// against a pre-built list of case records; a full tool built on this core would supply a
/// directive-parsing discoverer instead.
pub trait Discoverer {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Discovers cases under `pathspec`, given an opaque filter expression (keyword/parameter/
    /// regex syntax is not parsed here — see §6).
    fn discover(&self, pathspec: &Utf8Path, filter_expr: Option<&str>) -> Result<Vec<TestCase>, Self::Error>;
}

/// Receives [`TestEvent`]s as a session progresses.
///
/// The core ships [`PlainReporter`] (one line per terminal transition) and [`JsonlReporter`]
/// (one JSON object per line); neither attempts a full-screen progress renderer.
pub trait Reporter {
    fn on_event(&mut self, event: &TestEvent);
}

/// Reads a pre-built list of [`TestCase`] records from a JSON file: the output shape a real
/// file-walker/directive-parser would produce, without implementing that parsing itself.
pub struct JsonDiscoverer;

/// The on-disk shape a `JsonDiscoverer` source file holds.
#[derive(Debug, Serialize, Deserialize)]
struct JsonDiscoverySource {
    cases: Vec<TestCase>,
}

impl Discoverer for JsonDiscoverer {
    type Error = SessionError;

    fn discover(&self, pathspec: &Utf8Path, _filter_expr: Option<&str>) -> Result<Vec<TestCase>, Self::Error> {
        let text = std::fs::read_to_string(pathspec).map_err(|source| SessionError::Read {
            path: pathspec.to_path_buf(),
            source,
        })?;
        let source: JsonDiscoverySource = serde_json::from_str(&text).map_err(|source| SessionError::Parse {
            path: pathspec.to_path_buf(),
            source,
        })?;
        Ok(source.cases)
    }
}

/// One line per terminal transition, human-readable: `<status> <display_name> (<elapsed>)`.
#[derive(Default)]
pub struct PlainReporter {
    lines: Vec<String>,
}

impl PlainReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl Reporter for PlainReporter {
    fn on_event(&mut self, event: &TestEvent) {
        let line = match event {
            TestEvent::RunStarted { case_count } => format!("running {case_count} cases"),
            TestEvent::CaseStarted { display_name, .. } => format!("     START {display_name}"),
            TestEvent::CaseFinished { display_name, status, elapsed, .. } => {
                format!("{:>10} {display_name} ({:.2}s)", status.value().to_string().to_uppercase(), elapsed.as_secs_f64())
            }
            TestEvent::RunFinished { exit_code, elapsed } => {
                format!("session finished: exit_code={exit_code} elapsed={:.2}s", elapsed.as_secs_f64())
            }
        };
        self.lines.push(line);
    }
}

/// One JSON object per line, for machine consumption.
#[derive(Default)]
pub struct JsonlReporter {
    lines: Vec<String>,
}

impl JsonlReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl Reporter for JsonlReporter {
    fn on_event(&mut self, event: &TestEvent) {
        match serde_json::to_string(event) {
            Ok(line) => self.lines.push(line),
            Err(err) => self.lines.push(format!("{{\"kind\":\"serialize_error\",\"message\":{err:?}}}")),
        }
    }
}
