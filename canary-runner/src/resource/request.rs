// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Resource requests and the acquisitions granted against them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single `{type, slots}` demand within a co-location group.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RequestItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub slots: u32,
}

impl RequestItem {
    pub fn new(kind: impl Into<String>, slots: u32) -> Self {
        Self {
            kind: kind.into(),
            slots,
        }
    }
}

/// A list of items that must be co-located within a single node.
pub type RequestGroup = Vec<RequestItem>;

/// A request for resources, expressed as a list of co-location groups.
///
/// Multiple groups represent independent co-location constraints: each group must be satisfied
/// within one node, but different groups may land on different nodes. A single-node job with
/// one CPU group and one GPU group that must share a node should express both demands in the
/// *same* group; two groups are for jobs that need several independent node allocations (e.g. a
/// batch covering several unrelated cases).
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub groups: Vec<RequestGroup>,
}

impl ResourceRequest {
    pub fn empty() -> Self {
        Self { groups: Vec::new() }
    }

    /// Convenience constructor for the common case of a single co-located group.
    pub fn single_group(items: impl IntoIterator<Item = RequestItem>) -> Self {
        Self {
            groups: vec![items.into_iter().collect()],
        }
    }

    /// Total slots requested for `kind` across every group.
    pub fn total_slots(&self, kind: &str) -> u32 {
        self.groups
            .iter()
            .flat_map(|group| group.iter())
            .filter(|item| item.kind == kind)
            .map(|item| item.slots)
            .sum()
    }

    /// Every distinct resource type named anywhere in the request.
    pub fn resource_kinds(&self) -> impl Iterator<Item = &str> {
        self.groups
            .iter()
            .flat_map(|group| group.iter())
            .map(|item| item.kind.as_str())
    }
}

/// A concrete resource instance granted to a request: the process-unique id of the instance,
/// plus how many of its slots were taken.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AcquiredItem {
    pub gid: u64,
    pub slots: u32,
}

/// One group of an [`Acquisition`]: a map from resource type to the instances granted for it.
pub type AcquisitionGroup = BTreeMap<String, Vec<AcquiredItem>>;

/// The result of a successful [`crate::resource::ResourcePool::acquire`] call.
///
/// Held by a running case as `resources_held`; must be passed to
/// [`crate::resource::ResourcePool::reclaim`] exactly once, on completion.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Acquisition {
    pub groups: Vec<AcquisitionGroup>,
}

impl Acquisition {
    pub fn empty() -> Self {
        Self { groups: Vec::new() }
    }

    /// The local ids (as understood by the instance's node) granted for `kind`, flattened
    /// across all groups. Used to build `CANARY_<TYPE>` environment variables.
    pub fn local_ids_for<'a>(
        &'a self,
        kind: &'a str,
        gid_to_local: impl Fn(u64) -> Option<&'a str> + 'a,
    ) -> Vec<&'a str> {
        self.groups
            .iter()
            .filter_map(|group| group.get(kind))
            .flat_map(|items| items.iter())
            .filter_map(|item| gid_to_local(item.gid))
            .collect()
    }
}
