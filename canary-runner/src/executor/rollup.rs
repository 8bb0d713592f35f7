// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Aggregate-outcome computations: the process exit-code bitmask (§6) and a batch job's
//! roll-up terminal status from its member cases (§4.5).

use crate::case::{CaseId, TestCase};
use crate::status::{Status, StatusValue};
use std::collections::HashMap;

const BIT_DIFFED: u8 = 1 << 0;
const BIT_FAILED: u8 = 1 << 1;
const BIT_TIMEOUT: u8 = 1 << 2;
const BIT_SKIPPED_OR_NOT_RUN: u8 = 1 << 3;
const BIT_CANCELLED: u8 = 1 << 4;
const BIT_UNCLASSIFIED: u8 = 1 << 5;

/// Computes the process exit-code bitmask over every terminal case status observed this
/// session, per §6. `not_run` shares [`BIT_SKIPPED_OR_NOT_RUN`] with `skipped` rather than
/// getting a distinct bit (Open Question (b), resolved — see `DESIGN.md`): both mean "this case
/// never produced a pass/fail verdict because something external prevented it."
///
/// `xdiff`/`xfail` are part of the success family and never set a bit on their own; a bare
/// `diffed` (an *unexpected* diff) sets bit 1.
pub fn compute_exit_code(statuses: impl IntoIterator<Item = StatusValue>) -> u8 {
    let mut code = 0u8;
    for status in statuses {
        match status {
            StatusValue::Diffed => code |= BIT_DIFFED,
            StatusValue::Failed => code |= BIT_FAILED,
            StatusValue::Timeout => code |= BIT_TIMEOUT,
            StatusValue::Skipped | StatusValue::NotRun => code |= BIT_SKIPPED_OR_NOT_RUN,
            StatusValue::Cancelled => code |= BIT_CANCELLED,
            StatusValue::Success | StatusValue::Xfail | StatusValue::Xdiff => {}
            // Any non-terminal status observed at roll-up time means a case got stuck without
            // ever reaching a terminal state (a supervisor bug, not a case outcome); count it as
            // unclassified rather than silently dropping it from the bitmask.
            StatusValue::Created | StatusValue::Pending | StatusValue::Ready | StatusValue::Running | StatusValue::Retry => {
                code |= BIT_UNCLASSIFIED;
            }
        }
    }
    code
}

/// Derives a batch job's own roll-up terminal status from its member cases, for
/// [`crate::queue::BatchQueue::done`]: `failed` if any member failed or timed out, `timeout` if
/// any member timed out and none failed outright, otherwise `success`.
pub fn batch_terminal_status(member_ids: &[CaseId], cases: &HashMap<CaseId, TestCase>) -> Status {
    let mut any_timeout = false;
    let mut any_failed = false;
    for id in member_ids {
        match cases.get(id).map(|c| c.status.value()) {
            Some(StatusValue::Failed) => any_failed = true,
            Some(StatusValue::Timeout) => any_timeout = true,
            _ => {}
        }
    }
    if any_failed {
        Status::terminal(StatusValue::Failed, Some("one or more member cases failed".to_string()))
    } else if any_timeout {
        Status::terminal(StatusValue::Timeout, Some("one or more member cases timed out".to_string()))
    } else {
        Status::terminal(StatusValue::Success, None::<String>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_family_never_sets_a_bit() {
        let statuses = [StatusValue::Success, StatusValue::Xfail, StatusValue::Xdiff];
        assert_eq!(compute_exit_code(&statuses), 0);
    }

    #[test]
    fn skipped_and_not_run_share_bit_four() {
        assert_eq!(compute_exit_code(&[StatusValue::Skipped]), compute_exit_code(&[StatusValue::NotRun]));
        assert_eq!(compute_exit_code(&[StatusValue::Skipped]), 1 << 3);
    }

    #[test]
    fn mixed_outcomes_combine_their_bits() {
        let statuses = [StatusValue::Failed, StatusValue::Timeout, StatusValue::Skipped];
        let code = compute_exit_code(&statuses);
        assert_eq!(code, (1 << 1) | (1 << 2) | (1 << 3));
    }

    #[test]
    fn batch_status_prefers_failed_over_timeout() {
        let mut cases = HashMap::new();
        let a: CaseId = "a".to_string().into();
        let b: CaseId = "b".to_string().into();
        let mut case_a = sample("a");
        case_a.status = Status::terminal(StatusValue::Failed, None::<String>);
        let mut case_b = sample("b");
        case_b.status = Status::terminal(StatusValue::Timeout, None::<String>);
        cases.insert(a.clone(), case_a);
        cases.insert(b.clone(), case_b);

        let status = batch_terminal_status(&[a, b], &cases);
        assert_eq!(status.value(), StatusValue::Failed);
    }

    fn sample(name: &str) -> TestCase {
        TestCase::new(camino::Utf8PathBuf::from("t.pyt"), name, Default::default(), vec!["true".into()])
    }
}
