// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! `canary describe`: dump one case's resolved metadata as JSON.

use crate::cli::DescribeArgs;
use crate::errors::CliError;
use canary_runner::session::{Discoverer, JsonDiscoverer};

pub fn describe(args: &DescribeArgs) -> Result<i32, CliError> {
    let cases = JsonDiscoverer.discover(&args.source, None)?;
    let case = cases
        .into_iter()
        .find(|c| c.id.as_str() == args.case_id)
        .ok_or_else(|| CliError::CaseNotFound {
            case_id: args.case_id.clone(),
        })?;

    let text = serde_json::to_string_pretty(&case)?;
    println!("{text}");
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canary_runner::case::TestCase;
    use std::collections::BTreeMap;

    #[test]
    fn describes_a_known_case() {
        let dir = camino_tempfile::tempdir().unwrap();
        let source = dir.path().join("cases.json");
        let case = TestCase::new(
            camino::Utf8PathBuf::from("t.pyt"),
            "test_a",
            BTreeMap::new(),
            vec!["true".into()],
        );
        let id = case.id.clone();
        std::fs::write(&source, serde_json::json!({"cases": [case]}).to_string()).unwrap();

        let args = DescribeArgs {
            source: camino::Utf8PathBuf::from_path_buf(source).unwrap(),
            case_id: id.as_str().to_string(),
        };
        assert_eq!(describe(&args).unwrap(), 0);
    }

    #[test]
    fn unknown_case_id_errors() {
        let dir = camino_tempfile::tempdir().unwrap();
        let source = dir.path().join("cases.json");
        std::fs::write(&source, serde_json::json!({"cases": []}).to_string()).unwrap();

        let args = DescribeArgs {
            source: camino::Utf8PathBuf::from_path_buf(source).unwrap(),
            case_id: "nope".to_string(),
        };
        assert!(matches!(describe(&args), Err(CliError::CaseNotFound { .. })));
    }
}
