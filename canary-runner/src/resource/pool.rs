// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! The multi-node resource pool: accounting and atomic acquisition of named, slot-countable
//! resources such as `cpus` and `gpus`.

use super::request::{AcquiredItem, Acquisition, AcquisitionGroup, ResourceRequest};
use crate::errors::{PoolError, Unavailable, Unsatisfiable};
use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::{instrument, warn};

/// A single resource instance bound to one node: e.g. "GPU `02` on node `01`, 1 of 1 slots
/// free".
#[derive(Clone, Debug)]
pub struct ResourceInstance {
    pub gid: u64,
    pub node_id: String,
    pub local_id: String,
    pub slots_total: u32,
    pub slots_free: u32,
}

/// The specification of a single node's resources, as read from the resource pool file (see
/// [`crate::config`]).
#[derive(Clone, Debug)]
pub struct NodeSpec {
    pub id: String,
    /// Resource type (e.g. `"cpus"`, `"gpus"`) to the list of local instances it provides.
    pub resources: IndexMap<String, Vec<SlotSpec>>,
}

/// One instance's `{id, slots}` as given in the pool file, before gid assignment.
#[derive(Clone, Debug)]
pub struct SlotSpec {
    pub id: String,
    pub slots: u32,
}

#[derive(Clone, Debug, Default)]
struct NodeRecord {
    id: String,
    resources: IndexMap<String, Vec<ResourceInstance>>,
}

/// Accounts for, and atomically grants, resources across a set of nodes.
///
/// `ResourcePool` exclusively owns every [`ResourceInstance`]; the queue and runner only ever
/// see an opaque [`Acquisition`] handed back by [`ResourcePool::acquire`].
#[derive(Clone, Debug, Default)]
pub struct ResourcePool {
    nodes: Vec<NodeRecord>,
    /// `(type, node_id, local_id) -> gid`, built fresh on every [`ResourcePool::fill`].
    gid_index: HashMap<(String, String, String), u64>,
    /// Inverse of `gid_index`: `gid -> (type, node_id, local_id)`.
    gid_rindex: HashMap<u64, (String, String, String)>,
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the pool's contents with the given nodes, reassigning gids in traversal order
    /// (node, then local id, then resource type in the order given).
    #[instrument(skip(self, nodes))]
    pub fn fill(&mut self, nodes: Vec<NodeSpec>) -> Result<(), PoolError> {
        let mut new_nodes = Vec::with_capacity(nodes.len());
        let mut gid_index = HashMap::new();
        let mut gid_rindex = HashMap::new();
        let mut next_gid: HashMap<String, u64> = HashMap::new();

        for spec in nodes {
            if !spec.resources.contains_key("cpus") {
                return Err(PoolError::MissingCpus {
                    node_id: spec.id.clone(),
                });
            }

            let mut resources = IndexMap::new();
            for (kind, slots) in spec.resources {
                let mut seen_local_ids = std::collections::HashSet::new();
                let mut instances = Vec::with_capacity(slots.len());
                for slot in slots {
                    if !seen_local_ids.insert(slot.id.clone()) {
                        return Err(PoolError::DuplicateLocalId {
                            node_id: spec.id.clone(),
                            kind: kind.clone(),
                            local_id: slot.id.clone(),
                        });
                    }
                    let gid = *next_gid
                        .entry(kind.clone())
                        .and_modify(|g| *g += 1)
                        .or_insert(0);
                    let key = (kind.clone(), spec.id.clone(), slot.id.clone());
                    gid_index.insert(key.clone(), gid);
                    gid_rindex.insert(gid, key);
                    instances.push(ResourceInstance {
                        gid,
                        node_id: spec.id.clone(),
                        local_id: slot.id,
                        slots_total: slot.slots,
                        slots_free: slot.slots,
                    });
                }
                resources.insert(kind, instances);
            }

            new_nodes.push(NodeRecord {
                id: spec.id,
                resources,
            });
        }

        self.nodes = new_nodes;
        self.gid_index = gid_index;
        self.gid_rindex = gid_rindex;
        Ok(())
    }

    /// Total slots of `kind` across the whole pool.
    pub fn total_slots(&self, kind: &str) -> u32 {
        self.nodes
            .iter()
            .filter_map(|n| n.resources.get(kind))
            .flat_map(|instances| instances.iter())
            .map(|i| i.slots_total)
            .sum()
    }

    /// Largest per-node capacity for `kind`, used by [`Self::min_nodes_required`].
    fn max_node_capacity(&self, kind: &str) -> u32 {
        self.nodes
            .iter()
            .filter_map(|n| n.resources.get(kind))
            .map(|instances| instances.iter().map(|i| i.slots_total).sum::<u32>())
            .max()
            .unwrap_or(0)
    }

    /// The local id recorded for `gid`, if any. Used to build `CANARY_<TYPE>` variables.
    pub fn local_id(&self, gid: u64) -> Option<&str> {
        self.gid_rindex.get(&gid).map(|(_, _, local)| local.as_str())
    }

    /// Resource type recorded for `gid`, if any.
    pub fn kind_of(&self, gid: u64) -> Option<&str> {
        self.gid_rindex.get(&gid).map(|(kind, _, _)| kind.as_str())
    }

    /// Minimum number of nodes needed to ever satisfy `request`, independent of current load:
    /// per type, sum the requested slots across groups and divide (ceiling) by the largest
    /// single node's capacity for that type; the answer is the maximum across types.
    pub fn min_nodes_required(&self, request: &ResourceRequest) -> u32 {
        let mut max_nodes = 0;
        for kind in dedup(request.resource_kinds()) {
            let capacity = self.max_node_capacity(kind);
            if capacity == 0 {
                continue;
            }
            let needed = request.total_slots(kind);
            let nodes = needed.div_ceil(capacity);
            max_nodes = max_nodes.max(nodes);
        }
        max_nodes.max(1)
    }

    /// Checks whether `request` can ever be satisfied by the pool as configured (ignoring
    /// current load). An `Unsatisfiable` result is permanent for the lifetime of this pool
    /// configuration: the caller should mask the case rather than retry.
    pub fn satisfiable(&self, request: &ResourceRequest) -> Result<(), Unsatisfiable> {
        for kind in dedup(request.resource_kinds()) {
            if !self.nodes.iter().any(|n| n.resources.contains_key(kind)) {
                return Err(Unsatisfiable {
                    reason: format!("unknown resource type `{kind}`"),
                });
            }
            let total = self.total_slots(kind);
            let needed = request.total_slots(kind);
            if needed > total {
                return Err(Unsatisfiable {
                    reason: format!(
                        "request needs {needed} slots of `{kind}` but the pool only has {total}"
                    ),
                });
            }
        }
        Ok(())
    }

    /// Attempts to atomically grant `request`. On success, slots are decremented and an
    /// [`Acquisition`] describing exactly what was granted is returned. On failure, the pool is
    /// left byte-for-byte as it was: a snapshot is taken before any mutation and restored if any
    /// group cannot be placed.
    #[instrument(skip(self, request))]
    pub fn acquire(&mut self, request: &ResourceRequest) -> Result<Acquisition, Unavailable> {
        let snapshot = self.nodes.clone();

        let mut groups = Vec::with_capacity(request.groups.len());
        for group in &request.groups {
            match self.acquire_group(group) {
                Some(acquired) => groups.push(acquired),
                None => {
                    // Roll back: restore the pre-acquire snapshot wholesale rather than trying
                    // to undo partial acquisitions item by item.
                    self.nodes = snapshot;
                    return Err(Unavailable {
                        reason: "insufficient free slots for one or more resource groups"
                            .to_string(),
                    });
                }
            }
        }

        Ok(Acquisition { groups })
    }

    /// Attempts to place every item in `group` within a single node, returning `None` (without
    /// mutating anything further, since the caller rolls back the whole snapshot on failure) if
    /// no single node can satisfy the whole group.
    fn acquire_group(&mut self, group: &[super::request::RequestItem]) -> Option<AcquisitionGroup> {
        for node in &mut self.nodes {
            if let Some(granted) = Self::try_acquire_on_node(node, group) {
                return Some(granted);
            }
        }
        None
    }

    fn try_acquire_on_node(
        node: &mut NodeRecord,
        group: &[super::request::RequestItem],
    ) -> Option<AcquisitionGroup> {
        // Snapshot just this node so a group that needs several types can be tried atomically
        // without touching the rest of the pool.
        let node_snapshot = node.resources.clone();
        let mut acquired: AcquisitionGroup = AcquisitionGroup::new();

        for item in group {
            let instances = node.resources.get_mut(&item.kind)?;
            // Smallest-fit-first: pick the smallest instance that can still satisfy the
            // request, so larger instances remain free for larger future requests.
            let candidate = instances
                .iter_mut()
                .filter(|inst| inst.slots_free >= item.slots)
                .min_by_key(|inst| inst.slots_free);

            match candidate {
                Some(inst) => {
                    inst.slots_free -= item.slots;
                    acquired.entry(item.kind.clone()).or_default().push(AcquiredItem {
                        gid: inst.gid,
                        slots: item.slots,
                    });
                }
                None => {
                    node.resources = node_snapshot;
                    return None;
                }
            }
        }

        Some(acquired)
    }

    /// Returns every slot held by `acquisition` back to the pool. Unknown gids are logged and
    /// skipped rather than treated as an error: by the time `reclaim` runs, the pool may have
    /// been refilled (e.g. between sessions), and a stale acquisition should not be able to
    /// crash the dispatcher.
    #[instrument(skip(self, acquisition))]
    pub fn reclaim(&mut self, acquisition: &Acquisition) {
        for group in &acquisition.groups {
            for (kind, items) in group {
                for item in items {
                    let Some((_, node_id, local_id)) = self.gid_rindex.get(&item.gid).cloned()
                    else {
                        warn!(gid = item.gid, "reclaim: unknown gid, ignoring");
                        continue;
                    };
                    let Some(node) = self.nodes.iter_mut().find(|n| n.id == node_id) else {
                        warn!(gid = item.gid, node_id, "reclaim: unknown node, ignoring");
                        continue;
                    };
                    let Some(inst) = node
                        .resources
                        .get_mut(kind)
                        .and_then(|instances| instances.iter_mut().find(|i| i.local_id == local_id))
                    else {
                        warn!(gid = item.gid, "reclaim: unknown instance, ignoring");
                        continue;
                    };
                    inst.slots_free = (inst.slots_free + item.slots).min(inst.slots_total);
                }
            }
        }
    }

    /// Sum of `slots_free` plus sum of outstanding acquisitions equals sum of `slots_total`,
    /// for every resource type. Exposed for the pool-conservation property test below.
    pub fn free_slots_total(&self, kind: &str) -> u32 {
        self.nodes
            .iter()
            .filter_map(|n| n.resources.get(kind))
            .flat_map(|instances| instances.iter())
            .map(|i| i.slots_free)
            .sum()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

fn dedup<'a>(iter: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = std::collections::HashSet::new();
    iter.filter(|k| seen.insert(*k)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::request::RequestItem;

    fn pool_2x4() -> ResourcePool {
        let mut pool = ResourcePool::new();
        pool.fill(vec![
            node("n0", 4, 2),
            node("n1", 4, 2),
        ])
        .unwrap();
        pool
    }

    fn node(id: &str, cpus: u32, gpus: u32) -> NodeSpec {
        let mut resources = IndexMap::new();
        resources.insert(
            "cpus".to_string(),
            (0..cpus)
                .map(|i| SlotSpec {
                    id: i.to_string(),
                    slots: 1,
                })
                .collect(),
        );
        if gpus > 0 {
            resources.insert(
                "gpus".to_string(),
                (0..gpus)
                    .map(|i| SlotSpec {
                        id: i.to_string(),
                        slots: 1,
                    })
                    .collect(),
            );
        }
        NodeSpec {
            id: id.to_string(),
            resources,
        }
    }

    #[test]
    fn fill_rejects_missing_cpus() {
        let mut pool = ResourcePool::new();
        let mut resources = IndexMap::new();
        resources.insert(
            "gpus".to_string(),
            vec![SlotSpec {
                id: "0".into(),
                slots: 1,
            }],
        );
        let err = pool
            .fill(vec![NodeSpec {
                id: "n0".into(),
                resources,
            }])
            .unwrap_err();
        assert!(matches!(err, PoolError::MissingCpus { .. }));
    }

    #[test]
    fn fill_rejects_duplicate_local_id() {
        let mut pool = ResourcePool::new();
        let mut resources = IndexMap::new();
        resources.insert(
            "cpus".to_string(),
            vec![
                SlotSpec {
                    id: "0".into(),
                    slots: 1,
                },
                SlotSpec {
                    id: "0".into(),
                    slots: 1,
                },
            ],
        );
        let err = pool
            .fill(vec![NodeSpec {
                id: "n0".into(),
                resources,
            }])
            .unwrap_err();
        assert!(matches!(err, PoolError::DuplicateLocalId { .. }));
    }

    #[test]
    fn acquire_grants_and_reclaim_restores() {
        let mut pool = pool_2x4();
        let request = ResourceRequest::single_group([RequestItem::new("cpus", 3)]);
        let acquisition = pool.acquire(&request).unwrap();
        assert_eq!(pool.free_slots_total("cpus"), 5);

        pool.reclaim(&acquisition);
        assert_eq!(pool.free_slots_total("cpus"), 8);
    }

    #[test]
    fn acquire_fails_atomically_without_mutating() {
        let mut pool = pool_2x4();
        // One group asking for more gpus than any single node has (2) should fail, and the
        // earlier cpu group in the same request must be rolled back too.
        let request = ResourceRequest {
            groups: vec![
                vec![RequestItem::new("cpus", 1)],
                vec![RequestItem::new("gpus", 99)],
            ],
        };
        let before_cpus = pool.free_slots_total("cpus");
        let before_gpus = pool.free_slots_total("gpus");
        let err = pool.acquire(&request);
        assert!(err.is_err());
        assert_eq!(pool.free_slots_total("cpus"), before_cpus);
        assert_eq!(pool.free_slots_total("gpus"), before_gpus);
    }

    #[test]
    fn satisfiable_rejects_unknown_type() {
        let pool = pool_2x4();
        let request = ResourceRequest::single_group([RequestItem::new("tpus", 1)]);
        assert!(pool.satisfiable(&request).is_err());
    }

    #[test]
    fn satisfiable_rejects_oversized_request() {
        let pool = pool_2x4();
        let request = ResourceRequest::single_group([RequestItem::new("cpus", 100)]);
        assert!(pool.satisfiable(&request).is_err());
    }

    #[test]
    fn min_nodes_required_divides_ceiling() {
        let pool = pool_2x4();
        // 5 cpus requested, 4 per node => ceil(5/4) = 2 nodes.
        let request = ResourceRequest::single_group([RequestItem::new("cpus", 5)]);
        assert_eq!(pool.min_nodes_required(&request), 2);
    }

    #[test]
    fn smallest_fit_packing_prefers_tighter_instance() {
        // Node with a 1-slot and a 4-slot cpu instance; a request for 1 slot should land on
        // the 1-slot instance, leaving the 4-slot instance free for a larger future request.
        let mut pool = ResourcePool::new();
        let mut resources = IndexMap::new();
        resources.insert(
            "cpus".to_string(),
            vec![
                SlotSpec {
                    id: "small".into(),
                    slots: 1,
                },
                SlotSpec {
                    id: "large".into(),
                    slots: 4,
                },
            ],
        );
        pool.fill(vec![NodeSpec {
            id: "n0".into(),
            resources,
        }])
        .unwrap();

        let request = ResourceRequest::single_group([RequestItem::new("cpus", 1)]);
        let acquisition = pool.acquire(&request).unwrap();
        let gid = acquisition.groups[0]["cpus"][0].gid;
        assert_eq!(pool.local_id(gid), Some("small"));

        // A subsequent request for 4 slots must still succeed, proving the large instance
        // was preserved.
        let big_request = ResourceRequest::single_group([RequestItem::new("cpus", 4)]);
        assert!(pool.acquire(&big_request).is_ok());
    }

    #[test]
    fn reclaim_ignores_unknown_gid() {
        let mut pool = pool_2x4();
        let bogus = Acquisition {
            groups: vec![{
                let mut g = AcquisitionGroup::new();
                g.insert("cpus".to_string(), vec![AcquiredItem { gid: 9999, slots: 1 }]);
                g
            }],
        };
        // Must not panic.
        pool.reclaim(&bogus);
    }

    use proptest::prelude::*;
    use test_strategy::proptest;

    /// A single-node, single-type pool plus a batch of acquire requests to throw at it, sized so
    /// that some requests are expected to fail.
    #[derive(Debug)]
    struct ConservationInput {
        total_slots: u32,
        requests: Vec<u32>,
    }

    impl Arbitrary for ConservationInput {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
            (1..=16u32, prop::collection::vec(1..=8u32, 0..=12))
                .prop_map(|(total_slots, requests)| ConservationInput { total_slots, requests })
                .boxed()
        }
    }

    fn pool_of(total_slots: u32) -> ResourcePool {
        let mut pool = ResourcePool::new();
        pool.fill(vec![NodeSpec {
            id: "n0".into(),
            resources: IndexMap::from([(
                "cpus".to_string(),
                vec![SlotSpec {
                    id: "0".into(),
                    slots: total_slots,
                }],
            )]),
        }])
        .unwrap();
        pool
    }

    #[proptest]
    fn pool_conservation_holds_across_acquire_and_reclaim(input: ConservationInput) {
        let mut pool = pool_of(input.total_slots);
        let mut held = Vec::new();

        for slots in input.requests {
            let request = ResourceRequest::single_group([RequestItem::new("cpus", slots)]);
            if let Ok(acquisition) = pool.acquire(&request) {
                held.push(acquisition);
            }
            let outstanding: u32 = held
                .iter()
                .flat_map(|a| a.groups.iter())
                .flat_map(|g| g.values())
                .flat_map(|items| items.iter())
                .map(|item| item.slots)
                .sum();
            proptest::prop_assert_eq!(pool.free_slots_total("cpus") + outstanding, input.total_slots);
        }

        for acquisition in held.drain(..) {
            pool.reclaim(&acquisition);
        }
        proptest::prop_assert_eq!(pool.free_slots_total("cpus"), input.total_slots);
    }

    #[proptest]
    fn failing_acquire_never_mutates_the_pool(
        #[strategy(1..=16u32)] total_slots: u32,
        #[strategy(17..=64u32)] oversized: u32,
    ) {
        let mut pool = pool_of(total_slots);
        let before = pool.free_slots_total("cpus");
        let request = ResourceRequest::single_group([RequestItem::new("cpus", oversized)]);
        let result = pool.acquire(&request);
        proptest::prop_assert!(result.is_err());
        proptest::prop_assert_eq!(pool.free_slots_total("cpus"), before);
    }
}
