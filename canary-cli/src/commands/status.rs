// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! `canary status`: report on a completed (or in-flight) session by re-reading persisted case
//! records, the way a real tool re-derives its report from disk rather than trusting
//! in-process state that may not have survived the invocation that produced it.

use super::open_session;
use crate::cli::StatusArgs;
use crate::errors::CliError;
use canary_runner::executor::compute_exit_code;
use canary_runner::session::CaseStore;
use canary_runner::status::StatusValue;
use std::collections::BTreeMap;

pub fn status(args: &StatusArgs) -> Result<i32, CliError> {
    let cwd = std::env::current_dir()?;
    let cwd = camino::Utf8PathBuf::from_path_buf(cwd).expect("current directory is valid UTF-8");
    let (layout, _config) = open_session(&cwd)?;

    if let Some(session) = &args.session {
        println!("# session {session}");
    }

    let store = CaseStore::new(&layout);
    let cases = store.read_all()?;

    let mut by_status: BTreeMap<StatusValue, Vec<&canary_runner::case::TestCase>> = BTreeMap::new();
    for case in &cases {
        by_status.entry(case.status.value()).or_default().push(case);
    }

    for (status, group) in &by_status {
        println!("{status} ({})", group.len());
        for case in group {
            match case.status.detail() {
                Some(detail) => println!("  {}: {detail}", case.display_name),
                None => println!("  {}", case.display_name),
            }
        }
    }

    let exit_code = compute_exit_code(cases.iter().map(|c| c.status.value()));
    println!("exit_code={exit_code}");
    Ok(exit_code as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canary_runner::case::TestCase;
    use canary_runner::session::SessionLayout;
    use canary_runner::status::Status;

    #[test]
    fn status_reports_persisted_case_outcomes() {
        let dir = camino_tempfile::tempdir().unwrap();
        let layout = SessionLayout::init(dir.path()).unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        let store = CaseStore::new(&layout);
        let mut case = TestCase::new(
            camino::Utf8PathBuf::from("t.pyt"),
            "test_a",
            Default::default(),
            vec!["true".into()],
        );
        case.status = Status::terminal(StatusValue::Success, None::<String>);
        store.write(&case).unwrap();

        let exit_code = status(&StatusArgs { session: None }).unwrap();
        assert_eq!(exit_code, 0);
    }

    #[test]
    fn status_rolls_up_a_failure_into_a_nonzero_exit_code() {
        let dir = camino_tempfile::tempdir().unwrap();
        let layout = SessionLayout::init(dir.path()).unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        let store = CaseStore::new(&layout);
        let mut case = TestCase::new(
            camino::Utf8PathBuf::from("t.pyt"),
            "test_a",
            Default::default(),
            vec!["false".into()],
        );
        case.status = Status::terminal(StatusValue::Failed, Some("non-zero exit".to_string()));
        store.write(&case).unwrap();

        let exit_code = status(&StatusArgs { session: None }).unwrap();
        assert_ne!(exit_code, 0);
    }
}
