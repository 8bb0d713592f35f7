// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Dependency graph utilities shared by the queue and the CLI's `run <testname>` prerequisite
//! resolution.
//!
//! These functions deliberately take a `&dyn StatusLookup` rather than mutable references into
//! a live case table: per the design notes (§9), the canonical status for each case id lives in
//! one arena-style table owned by the queue, and these helpers only ever *read* it.

use super::id::CaseId;
use super::test_case::TestCase;
use crate::status::StatusValue;
use std::collections::{HashMap, HashSet, VecDeque};

/// A read-only view onto the current status of every case in a session, used by
/// [`dep_condition_flags`] without requiring callers to hand over mutable access.
pub trait StatusLookup {
    fn status_of(&self, id: &CaseId) -> Option<StatusValue>;
}

/// A dependency edge's current admissibility.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DepFlag {
    /// The dependency is masked, or terminated in a status that does not satisfy the edge:
    /// this case can never become ready.
    WontRun,
    /// The dependency has not yet reached a terminal status.
    Pending,
    /// The dependency is terminal and satisfies the edge.
    CanRun,
}

/// Computes the dependency edge flags for `case` given the current status of every other case.
///
/// A case should transition to `ready` exactly when every flag is `CanRun`, and to `skipped`
/// (citing the first `WontRun` dependency) if any flag is `WontRun`.
pub fn dep_condition_flags(case: &TestCase, lookup: &impl StatusLookup) -> Vec<(CaseId, DepFlag)> {
    case.dependencies
        .iter()
        .map(|dep| {
            let flag = match lookup.status_of(&dep.case_id) {
                None => DepFlag::Pending,
                Some(status) if !status.is_terminal() => DepFlag::Pending,
                Some(status) if dep.expect.is_satisfied_by(status) => DepFlag::CanRun,
                Some(_) => DepFlag::WontRun,
            };
            (dep.case_id.clone(), flag)
        })
        .collect()
}

/// Returns the first dependency (in declared order) whose flag is `WontRun`, if any. Used to
/// build the "one or more dependency failed" detail message cited when a case is skipped.
pub fn first_blocking_dependency(
    case: &TestCase,
    lookup: &impl StatusLookup,
) -> Option<CaseId> {
    dep_condition_flags(case, lookup)
        .into_iter()
        .find(|(_, flag)| *flag == DepFlag::WontRun)
        .map(|(id, _)| id)
}

/// Whether every dependency edge on `case` is `CanRun`.
pub fn all_dependencies_satisfied(case: &TestCase, lookup: &impl StatusLookup) -> bool {
    dep_condition_flags(case, lookup)
        .iter()
        .all(|(_, flag)| *flag == DepFlag::CanRun)
}

/// Kahn's algorithm, with ties among simultaneously-ready nodes broken by case id so that the
/// order is deterministic across runs (and across different hashmap iteration orders).
pub fn topological_order(cases: &[TestCase]) -> Vec<CaseId> {
    let by_id: HashMap<&CaseId, &TestCase> = cases.iter().map(|c| (&c.id, c)).collect();

    let mut indegree: HashMap<&CaseId, usize> = cases.iter().map(|c| (&c.id, 0)).collect();
    let mut dependents: HashMap<&CaseId, Vec<&CaseId>> = HashMap::new();

    for case in cases {
        for dep in &case.dependencies {
            if by_id.contains_key(&dep.case_id) {
                *indegree.get_mut(&case.id).expect("case is in indegree map") += 1;
                dependents.entry(&dep.case_id).or_default().push(&case.id);
            }
        }
    }

    let mut ready: Vec<&CaseId> = indegree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();
    ready.sort();

    let mut queue: VecDeque<&CaseId> = ready.into();
    let mut order = Vec::with_capacity(cases.len());

    while let Some(id) = queue.pop_front() {
        order.push(id.clone());
        if let Some(children) = dependents.get(id) {
            let mut newly_ready = Vec::new();
            for child in children {
                let deg = indegree.get_mut(child).expect("child is in indegree map");
                *deg -= 1;
                if *deg == 0 {
                    newly_ready.push(*child);
                }
            }
            newly_ready.sort();
            // Merge newly-ready nodes into the queue keeping it sorted-ish: we re-sort the
            // whole remaining queue so ties across separate "waves" are still id-ordered.
            for child in newly_ready {
                queue.push_back(child);
            }
            let mut as_vec: Vec<_> = queue.into_iter().collect();
            as_vec.sort();
            queue = as_vec.into();
        }
    }

    order
}

/// The forward transitive closure of dependencies starting at `id`: every case `id` needs to
/// have run first, directly or transitively. Used for "run test X and its prerequisites".
pub fn reachable_from(id: &CaseId, cases: &[TestCase]) -> HashSet<CaseId> {
    let by_id: HashMap<&CaseId, &TestCase> = cases.iter().map(|c| (&c.id, c)).collect();
    let mut seen = HashSet::new();
    let mut stack = vec![id.clone()];

    while let Some(current) = stack.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        if let Some(case) = by_id.get(&current) {
            for dep in &case.dependencies {
                if !seen.contains(&dep.case_id) {
                    stack.push(dep.case_id.clone());
                }
            }
        }
    }

    seen.remove(id);
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::test_case::{DepExpect, Dependency};
    use camino::Utf8PathBuf;
    use std::collections::BTreeMap;

    fn case(name: &str, deps: &[&str]) -> TestCase {
        let mut c = TestCase::new(
            Utf8PathBuf::from("t.pyt"),
            name,
            BTreeMap::new(),
            vec!["true".to_string()],
        );
        // Force a predictable id for test readability instead of the content hash.
        c.id = name.to_string().into();
        c.dependencies = deps
            .iter()
            .map(|d| Dependency {
                case_id: (*d).to_string().into(),
                expect: DepExpect::Any,
            })
            .collect();
        c
    }

    struct MapLookup(HashMap<CaseId, StatusValue>);
    impl StatusLookup for MapLookup {
        fn status_of(&self, id: &CaseId) -> Option<StatusValue> {
            self.0.get(id).copied()
        }
    }

    #[test]
    fn topo_order_respects_edges_and_breaks_ties_by_id() {
        let cases = vec![case("c", &["a", "b"]), case("b", &["a"]), case("a", &[])];
        let order = topological_order(&cases);
        assert_eq!(order, vec!["a".to_string().into(), "b".to_string().into(), "c".to_string().into()]);
    }

    #[test]
    fn reachable_from_collects_transitive_prerequisites() {
        let cases = vec![case("c", &["b"]), case("b", &["a"]), case("a", &[])];
        let reach = reachable_from(&"c".to_string().into(), &cases);
        assert_eq!(reach.len(), 2);
        assert!(reach.contains(&"a".to_string().into()));
        assert!(reach.contains(&"b".to_string().into()));
    }

    #[test]
    fn dep_flags_classify_pending_canrun_wontrun() {
        let case_c = case("c", &["a", "b"]);
        let mut statuses = HashMap::new();
        statuses.insert("a".to_string().into(), StatusValue::Success);
        statuses.insert("b".to_string().into(), StatusValue::Failed);
        let lookup = MapLookup(statuses);

        let flags = dep_condition_flags(&case_c, &lookup);
        assert_eq!(flags[0].1, DepFlag::CanRun);
        assert_eq!(flags[1].1, DepFlag::WontRun);
        assert!(!all_dependencies_satisfied(&case_c, &lookup));
        assert_eq!(first_blocking_dependency(&case_c, &lookup), Some("b".to_string().into()));
    }

    #[test]
    fn dep_flags_pending_when_dependency_unknown() {
        let case_c = case("c", &["a"]);
        let lookup = MapLookup(HashMap::new());
        let flags = dep_condition_flags(&case_c, &lookup);
        assert_eq!(flags[0].1, DepFlag::Pending);
    }
}
