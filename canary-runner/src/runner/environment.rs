// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Assembles the environment a case's child process is spawned with: a copy of the process
//! environment, the case's declared [`EnvironmentMod`]s, and the `CANARY_<TYPE>` /
//! `CTEST_RESOURCE_GROUP_*` variables derived from its resource [`Acquisition`].
//!
//! Grounded in `_canary/testcase.py::environment` and
//! `_canary/plugins/ctest/generator.py::set_resource_groups_vars`.

use crate::case::{EnvironmentMod, TestCase};
use crate::resource::{Acquisition, ResourcePool};
use camino::Utf8Path;
use std::collections::BTreeMap;

/// The fully assembled environment variable table for a case's child process.
pub(crate) type EnvironmentTable = BTreeMap<String, String>;

/// Builds the environment table for `case`, given the resources it acquired and the pool they
/// were acquired from (needed to translate gids back into the local ids children expect to
/// see).
pub(crate) fn build_environment(
    case: &TestCase,
    acquisition: &Acquisition,
    pool: &ResourcePool,
    working_dir: &Utf8Path,
) -> EnvironmentTable {
    let mut vars: EnvironmentTable = std::env::vars().collect();

    for modification in &case.environment_mods {
        apply_mod(&mut vars, modification);
    }

    // `CANARY_<TYPE>` plus the bare `<type>_ids` substitution table (e.g. `cpus` -> `cpu_ids`
    // -> `%(cpu)_ids` in a declared environment mod value).
    let mut substitutions: BTreeMap<String, String> = BTreeMap::new();
    for kind in distinct_kinds(acquisition) {
        let ids: Vec<&str> = acquisition
            .local_ids_for(kind, |gid| pool.local_id(gid))
            .into_iter()
            .collect();
        let joined = ids.join(",");
        vars.insert(format!("CANARY_{}", kind.to_uppercase()), joined.clone());
        substitutions.insert(format!("{}_ids", singularize(kind)), joined);
    }

    for value in vars.values_mut() {
        *value = substitute_placeholders(value, &substitutions);
    }

    emit_ctest_resource_groups(&mut vars, acquisition, pool);

    let path = std::env::var("PATH").unwrap_or_default();
    vars.insert("PATH".to_string(), format!("{working_dir}:{path}"));
    let pythonpath = std::env::var("PYTHONPATH").unwrap_or_default();
    vars.insert(
        "PYTHONPATH".to_string(),
        format!("{working_dir}:{pythonpath}"),
    );

    vars
}

fn apply_mod(vars: &mut EnvironmentTable, modification: &EnvironmentMod) {
    match modification {
        EnvironmentMod::Set { var, value } => {
            vars.insert(var.clone(), value.clone());
        }
        EnvironmentMod::Unset { var } => {
            vars.remove(var);
        }
        EnvironmentMod::PrependPath { var, value } => {
            let existing = vars.get(var).cloned().unwrap_or_default();
            vars.insert(var.clone(), format!("{value}:{existing}"));
        }
        EnvironmentMod::AppendPath { var, value } => {
            let existing = vars.get(var).cloned().unwrap_or_default();
            vars.insert(var.clone(), format!("{existing}:{value}"));
        }
    }
}

/// `cpus` -> `cpu`, `gpus` -> `gpu`; a resource type that doesn't end in `s` is left as-is.
fn singularize(kind: &str) -> &str {
    kind.strip_suffix('s').unwrap_or(kind)
}

fn distinct_kinds(acquisition: &Acquisition) -> Vec<&str> {
    let mut kinds: Vec<&str> = acquisition
        .groups
        .iter()
        .flat_map(|group| group.keys())
        .map(String::as_str)
        .collect();
    kinds.sort_unstable();
    kinds.dedup();
    kinds
}

/// Replaces every `%(key)s`-style placeholder in `value` with its substitution, mirroring the
/// source's `value % vars` string-interpolation step. Unknown placeholders are left untouched
/// (the source swallows the `KeyError` and keeps the literal value).
fn substitute_placeholders(value: &str, substitutions: &BTreeMap<String, String>) -> String {
    let mut out = value.to_string();
    for (key, replacement) in substitutions {
        let placeholder = format!("%({key})s");
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, replacement);
        }
    }
    out
}

fn emit_ctest_resource_groups(vars: &mut EnvironmentTable, acquisition: &Acquisition, pool: &ResourcePool) {
    vars.insert(
        "CTEST_RESOURCE_GROUP_COUNT".to_string(),
        acquisition.groups.len().to_string(),
    );
    for (i, group) in acquisition.groups.iter().enumerate() {
        let types: Vec<&str> = {
            let mut t: Vec<&str> = group.keys().map(String::as_str).collect();
            t.sort_unstable();
            t
        };
        vars.insert(format!("CTEST_RESOURCE_GROUP_{i}"), types.join(","));
        for (kind, items) in group {
            let values: Vec<String> = items
                .iter()
                .map(|item| {
                    let local = pool.local_id(item.gid).unwrap_or("?");
                    format!("id:{local},slots:{}", item.slots)
                })
                .collect();
            vars.insert(
                format!("CTEST_RESOURCE_GROUP_{i}_{}", kind.to_uppercase()),
                values.join(";"),
            );
        }
    }
}
