// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Maps a case's process exit back to a terminal [`Status`].
//!
//! `returncode` follows the POSIX wait-status convention used throughout this crate: a
//! non-negative value is the process's own exit code, a negative value `-n` means the process
//! was killed by signal `n`. This mirrors what `libc::WIFSIGNALED`/`WTERMSIG` report and lets a
//! single `i32` carry both cases without an extra enum at every call site.

use crate::case::ExpectedExit;
use crate::status::{Status, StatusValue};

/// The case's own process reported a diff.
pub const DIFF_CODE: i32 = 64;
/// The case's own process reported a failure.
pub const FAIL_CODE: i32 = 65;
/// The case's own process reported a timeout.
pub const TIMEOUT_CODE: i32 = 66;
/// The case's own process reported that it should be skipped.
pub const SKIP_CODE: i32 = 63;

const SIGINT: i32 = 2;

/// Classifies a case's terminal status from a normal (non-timed-out) process exit.
///
/// Timeout and cancellation are not reachable through this function: the poll loop in
/// [`super::process`] recognizes those conditions directly (a timer expiring, or an
/// explicit shutdown request) and builds the corresponding `Status` itself before the child's
/// exit is even observed.
pub fn classify_normal_exit(expected: &ExpectedExit, returncode: i32) -> Status {
    match expected {
        ExpectedExit::Diff => {
            if returncode == DIFF_CODE {
                Status::terminal(StatusValue::Xdiff, None::<String>)
            } else {
                Status::terminal(
                    StatusValue::Failed,
                    Some(format!(
                        "expected a diff (exit {DIFF_CODE}) but got exit {returncode}"
                    )),
                )
            }
        }
        ExpectedExit::Fail => classify_expect_fail(returncode),
        ExpectedExit::Code(n) if *n < 0 => classify_expect_fail(returncode),
        ExpectedExit::Code(0) => well_known_mapping(returncode),
        ExpectedExit::Code(n) => {
            if returncode == *n {
                Status::terminal(StatusValue::Xfail, None::<String>)
            } else {
                Status::terminal(
                    StatusValue::Failed,
                    Some(format!("expected exit {n} but got {returncode}")),
                )
            }
        }
    }
}

/// Shared by `ExpectedExit::Fail` and the negative-`Code` case: any nonzero exit is the
/// expected outcome.
fn classify_expect_fail(returncode: i32) -> Status {
    if returncode != 0 {
        Status::terminal(StatusValue::Xfail, None::<String>)
    } else {
        Status::terminal(
            StatusValue::Failed,
            Some("expected a nonzero exit but the case exited 0".to_string()),
        )
    }
}

fn well_known_mapping(returncode: i32) -> Status {
    match returncode {
        0 => Status::terminal(StatusValue::Success, None::<String>),
        DIFF_CODE => Status::terminal(StatusValue::Diffed, None::<String>),
        SKIP_CODE => Status::terminal(StatusValue::Skipped, Some("case reported skip".to_string())),
        FAIL_CODE => Status::terminal(StatusValue::Failed, Some("case reported failure".to_string())),
        TIMEOUT_CODE => Status::terminal(StatusValue::Timeout, Some("case reported timeout".to_string())),
        n if n == -SIGINT => {
            Status::terminal(StatusValue::Cancelled, Some("interrupted".to_string()))
        }
        n => Status::terminal(StatusValue::Failed, Some(format!("exited {n}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(ExpectedExit::Diff, 64, StatusValue::Xdiff; "diff matches")]
    #[test_case(ExpectedExit::Diff, 0, StatusValue::Failed; "diff expected but exited 0")]
    #[test_case(ExpectedExit::Fail, 1, StatusValue::Xfail; "fail expected, nonzero exit")]
    #[test_case(ExpectedExit::Fail, 0, StatusValue::Failed; "fail expected but exited 0")]
    #[test_case(ExpectedExit::Code(-1), 7, StatusValue::Xfail; "negative expectation treated as fail, nonzero")]
    #[test_case(ExpectedExit::Code(-1), 0, StatusValue::Failed; "negative expectation treated as fail, zero exit")]
    #[test_case(ExpectedExit::Code(0), 0, StatusValue::Success; "ordinary success")]
    #[test_case(ExpectedExit::Code(0), DIFF_CODE, StatusValue::Diffed; "self-reported diff code")]
    #[test_case(ExpectedExit::Code(0), SKIP_CODE, StatusValue::Skipped; "self-reported skip code")]
    #[test_case(ExpectedExit::Code(0), FAIL_CODE, StatusValue::Failed; "self-reported fail code")]
    #[test_case(ExpectedExit::Code(0), TIMEOUT_CODE, StatusValue::Timeout; "self-reported timeout code")]
    #[test_case(ExpectedExit::Code(0), -SIGINT, StatusValue::Cancelled; "killed by sigint")]
    #[test_case(ExpectedExit::Code(0), 17, StatusValue::Failed; "unrecognized nonzero exit")]
    #[test_case(ExpectedExit::Code(3), 3, StatusValue::Xfail; "exact positive code matches")]
    #[test_case(ExpectedExit::Code(3), 1, StatusValue::Failed; "exact positive code mismatches")]
    fn classifies_as_expected(expected: ExpectedExit, returncode: i32, want: StatusValue) {
        let status = classify_normal_exit(&expected, returncode);
        assert_eq!(status.value(), want);
    }
}
