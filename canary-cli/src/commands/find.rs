// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! `canary find`: resolve a selection the same way `run` would, but only print it.

use super::{apply_config_overrides, open_session};
use crate::cli::{FindArgs, GlobalOpts};
use crate::errors::CliError;
use canary_runner::session::{Discoverer, JsonDiscoverer};

pub fn find(global: &GlobalOpts, args: &FindArgs) -> Result<i32, CliError> {
    let cwd = std::env::current_dir()?;
    let cwd = camino::Utf8PathBuf::from_path_buf(cwd).expect("current directory is valid UTF-8");

    let (_layout, mut config) = open_session(&cwd)?;
    apply_config_overrides(&mut config, &global.config_overrides)?;

    let filter_description = describe_filters(args);
    let cases = JsonDiscoverer.discover(&args.source, Some(&filter_description))?;

    for case in &cases {
        println!("{} {}", case.id.as_str(), case.display_name);
    }

    Ok(0)
}

fn describe_filters(args: &FindArgs) -> String {
    let mut parts = Vec::new();
    if !args.selection.pathspec.is_empty() {
        parts.push(args.selection.pathspec.join(" "));
    }
    if let Some(k) = &args.selection.keyword {
        parts.push(format!("-k {k}"));
    }
    if let Some(p) = &args.selection.parameter {
        parts.push(format!("-p {p}"));
    }
    if let Some(owner) = &args.selection.owner {
        parts.push(format!("--owner {owner}"));
    }
    if let Some(grep) = &args.selection.grep {
        parts.push(format!("--grep {grep}"));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use canary_runner::case::TestCase;
    use canary_runner::session::SessionLayout;
    use std::collections::BTreeMap;

    #[test]
    fn find_lists_every_discovered_case() {
        let dir = camino_tempfile::tempdir().unwrap();
        SessionLayout::init(dir.path()).unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        let source = dir.path().join("cases.json");
        let case = TestCase::new(
            camino::Utf8PathBuf::from("t.pyt"),
            "test_a",
            BTreeMap::new(),
            vec!["true".into()],
        );
        std::fs::write(&source, serde_json::json!({"cases": [case]}).to_string()).unwrap();

        let global = GlobalOpts {
            chdir: None,
            config_overrides: vec![],
            env: vec![],
            plugin_dirs: vec![],
            verbose: 0,
            echo: false,
        };
        let args = FindArgs {
            selection: Default::default(),
            source: camino::Utf8PathBuf::from_path_buf(source).unwrap(),
        };

        assert_eq!(find(&global, &args).unwrap(), 0);
    }
}
