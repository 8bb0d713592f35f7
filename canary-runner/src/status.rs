// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! The lifecycle state machine for test cases and batches.
//!
//! Transitions are strictly forward: `Created -> Pending|Ready -> Running -> {terminal}`, with
//! `Retry` routing back to `Ready`. See the module-level docs on [`Status::is_terminal`] for the
//! set of terminal values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A lifecycle tag for a test case or batch, with an optional human-readable detail.
///
/// `Status` intentionally does not carry a generic "unknown" bucket: every transition is made
/// by code that knows exactly why, so there is always a concrete variant and (for terminal
/// states) a detail string explaining it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Status {
    value: StatusValue,
    detail: Option<String>,
}

/// The bare lifecycle tag, without a detail message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusValue {
    Created,
    Pending,
    Ready,
    Running,
    Retry,
    Success,
    Xfail,
    Xdiff,
    Diffed,
    Failed,
    Timeout,
    Skipped,
    Cancelled,
    NotRun,
}

impl StatusValue {
    /// Terminal states are the ones a case can never leave.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success
                | Self::Xfail
                | Self::Xdiff
                | Self::Diffed
                | Self::Failed
                | Self::Timeout
                | Self::Skipped
                | Self::Cancelled
                | Self::NotRun
        )
    }

    /// Terminal states that represent "the case ran and produced a verdict", as opposed to
    /// "something external prevented a verdict" (`Skipped`, `Cancelled`, `NotRun`).
    pub fn is_executed_terminal(self) -> bool {
        self.is_terminal() && !matches!(self, Self::Skipped | Self::Cancelled | Self::NotRun)
    }

    /// Whether this state is part of the "success family" for roll-up purposes: `Xdiff` and
    /// `Xfail` are expected, declared outcomes and do not count as failures.
    pub fn is_success_family(self) -> bool {
        matches!(self, Self::Success | Self::Xfail | Self::Xdiff)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Retry => "retry",
            Self::Success => "success",
            Self::Xfail => "xfail",
            Self::Xdiff => "xdiff",
            Self::Diffed => "diffed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
            Self::NotRun => "not_run",
        }
    }
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-terminal states may not carry a detail message: there is nothing yet to explain.
const NO_DETAIL_ALLOWED: [StatusValue; 4] = [
    StatusValue::Created,
    StatusValue::Pending,
    StatusValue::Ready,
    StatusValue::Retry,
];

impl Status {
    /// Creates the initial status for a freshly discovered case.
    pub fn created() -> Self {
        Self {
            value: StatusValue::Created,
            detail: None,
        }
    }

    /// Constructs a status, panicking if `detail` is supplied for a state that may not carry
    /// one. This mirrors the source's `Status.set` validation, made a compile-adjacent
    /// invariant instead of a runtime-only check buried in a setter.
    pub fn new(value: StatusValue, detail: Option<impl Into<String>>) -> Self {
        let detail = detail.map(Into::into);
        if detail.is_some() {
            assert!(
                !NO_DETAIL_ALLOWED.contains(&value),
                "detail not compatible with status {value}"
            );
        }
        Self { value, detail }
    }

    /// Constructs a terminal status. Terminal statuses that are normally expected to carry a
    /// detail (`skipped`, `failed`, `diffed`) fall back to `"unknown"` if none is given, the
    /// way the source does, so a report never has to special-case a missing reason.
    pub fn terminal(value: StatusValue, detail: Option<impl Into<String>>) -> Self {
        assert!(value.is_terminal(), "{value} is not a terminal status");
        let detail = detail.map(Into::into).or_else(|| {
            matches!(
                value,
                StatusValue::Skipped | StatusValue::Failed | StatusValue::Diffed
            )
            .then(|| "unknown".to_string())
        });
        Self { value, detail }
    }

    pub fn value(&self) -> StatusValue {
        self.value
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.value.is_terminal()
    }

    pub fn is_ready(&self) -> bool {
        self.value == StatusValue::Ready
    }

    pub fn is_running(&self) -> bool {
        self.value == StatusValue::Running
    }

    /// Transitions this status forward, panicking on an illegal transition. Illegal
    /// transitions are a programmer error in the scheduler, not a recoverable runtime
    /// condition, so this mirrors the teacher's stance on internal invariant violations.
    pub fn transition_to(&mut self, next: Status) {
        assert!(
            self.can_transition_to(next.value),
            "illegal status transition: {} -> {}",
            self.value,
            next.value
        );
        *self = next;
    }

    fn can_transition_to(&self, next: StatusValue) -> bool {
        use StatusValue::*;
        match (self.value, next) {
            (Created, Pending | Ready) => true,
            (Pending, Ready | Pending) => true,
            (Ready, Running | Ready) => true,
            (Running, next) if next.is_terminal() || next == Retry => true,
            (Retry, Ready) => true,
            // A case can also be force-terminated without ever passing through `running`: a
            // dependency that will never satisfy its edge, or an unsatisfiable resource
            // request, masks a `pending`/`ready` case as `skipped`; `Queue::close` drains
            // whatever is left in the buffer (`created`/`pending`/`ready`/`retry`) as
            // `not_run`. Unlike the open-ended `Running -> any terminal` arm above, this is
            // deliberately narrow: it does not legalize e.g. `created -> success`.
            (Created | Pending | Ready | Retry, Skipped | NotRun | Cancelled) => true,
            // Re-setting the same terminal value (e.g. re-persisting) is always allowed.
            (a, b) if a == b && a.is_terminal() => true,
            _ => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}
