// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! The default batch partitioner: groups cases into dependency-closed batches bounded by an
//! aggregate runtime ceiling or a batch-count cap.

use crate::case::{CaseId, TestCase, TestBatch};
use crate::config::elements::BatchConfig;
use std::collections::HashMap;

/// Groups `cases` into batches, each a connected component under the dependency graph (so no
/// batch ever splits a case from its dependency), packed first-fit-decreasing by runtime
/// estimate under `config.max_batch_runtime_sec`. If `config.max_batch_count` caps the batch
/// count below what packing naturally produced, the smallest batches are merged pairwise
/// (exceeding the runtime ceiling if necessary) until the cap is met: the dependency-closure
/// invariant is never negotiable, but the runtime ceiling is a packing target, not a hard limit.
pub fn partition_batches(cases: &[TestCase], config: &BatchConfig) -> Vec<TestBatch> {
    let runtimes: HashMap<&CaseId, f64> = cases.iter().map(|c| (&c.id, c.runtime_estimate)).collect();
    let mut components = connected_components(cases);
    components.sort_by(|a, b| {
        component_runtime(b, &runtimes)
            .partial_cmp(&component_runtime(a, &runtimes))
            .expect("runtime estimates are never NaN")
    });

    let mut batches: Vec<Vec<CaseId>> = Vec::new();
    let mut batch_runtimes: Vec<f64> = Vec::new();

    'component: for component in components {
        let runtime = component_runtime(&component, &runtimes);
        for (i, existing) in batches.iter_mut().enumerate() {
            let combined = batch_runtimes[i] + runtime;
            if combined <= config.max_batch_runtime_sec {
                existing.extend(component.iter().cloned());
                batch_runtimes[i] = combined;
                continue 'component;
            }
        }
        batch_runtimes.push(runtime);
        batches.push(component);
    }

    if let Some(max) = config.max_batch_count {
        while batches.len() > max.max(1) {
            batches.sort_by(|a, b| {
                component_runtime(a, &runtimes)
                    .partial_cmp(&component_runtime(b, &runtimes))
                    .expect("runtime estimates are never NaN")
            });
            let smallest = batches.remove(0);
            batches[0].extend(smallest);
        }
    }

    batches
        .into_iter()
        .enumerate()
        .map(|(i, batch_cases)| TestBatch {
            id: format!("batch-{i:04}"),
            cases: batch_cases,
            worker_count: config.workers,
        })
        .collect()
}

fn component_runtime(component: &[CaseId], runtimes: &HashMap<&CaseId, f64>) -> f64 {
    component.iter().filter_map(|id| runtimes.get(id)).sum()
}

/// Connected components of the dependency graph, treated as undirected for grouping purposes:
/// if `A` depends on `B` they must end up in the same batch regardless of which way the edge
/// points. Each component is returned sorted by id for deterministic batch naming.
fn connected_components(cases: &[TestCase]) -> Vec<Vec<CaseId>> {
    let index: HashMap<&CaseId, usize> = cases.iter().enumerate().map(|(i, c)| (&c.id, i)).collect();
    let mut parent: Vec<usize> = (0..cases.len()).collect();

    fn find(parent: &mut [usize], x: usize) -> usize {
        if parent[x] != x {
            parent[x] = find(parent, parent[x]);
        }
        parent[x]
    }

    for (i, case) in cases.iter().enumerate() {
        for dep in &case.dependencies {
            if let Some(&j) = index.get(&dep.case_id) {
                let (ra, rb) = (find(&mut parent, i), find(&mut parent, j));
                if ra != rb {
                    parent[ra] = rb;
                }
            }
        }
    }

    let mut groups: HashMap<usize, Vec<CaseId>> = HashMap::new();
    for i in 0..cases.len() {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(cases[i].id.clone());
    }

    let mut components: Vec<Vec<CaseId>> = groups.into_values().collect();
    for component in &mut components {
        component.sort();
    }
    components.sort_by(|a, b| a.first().cmp(&b.first()));
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{DepExpect, Dependency};
    use camino::Utf8PathBuf;
    use std::collections::BTreeMap;

    fn case(name: &str, runtime: f64, deps: &[&str]) -> TestCase {
        let mut c = TestCase::new(Utf8PathBuf::from("t.pyt"), name, BTreeMap::new(), vec!["true".to_string()]);
        c.id = name.to_string().into();
        c.runtime_estimate = runtime;
        c.dependencies = deps
            .iter()
            .map(|d| Dependency { case_id: (*d).to_string().into(), expect: DepExpect::Any })
            .collect();
        c
    }

    #[test]
    fn dependent_cases_land_in_the_same_batch() {
        let cases = vec![case("a", 10.0, &[]), case("b", 10.0, &["a"])];
        let config = BatchConfig { max_batch_runtime_sec: 1.0, ..BatchConfig::default() };
        let batches = partition_batches(&cases, &config);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].cases.len(), 2);
    }

    #[test]
    fn independent_cases_pack_under_the_runtime_ceiling() {
        let cases = vec![case("a", 100.0, &[]), case("b", 100.0, &[]), case("c", 100.0, &[])];
        let config = BatchConfig { max_batch_runtime_sec: 150.0, ..BatchConfig::default() };
        let batches = partition_batches(&cases, &config);
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn batch_count_cap_forces_merges_past_the_runtime_ceiling() {
        let cases = vec![case("a", 100.0, &[]), case("b", 100.0, &[]), case("c", 100.0, &[])];
        let config = BatchConfig {
            max_batch_runtime_sec: 1.0,
            max_batch_count: Some(1),
            ..BatchConfig::default()
        };
        let batches = partition_batches(&cases, &config);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].cases.len(), 3);
    }
}
