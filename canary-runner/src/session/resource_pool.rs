// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Loads the resource pool file (§6): a YAML or JSON document describing the nodes and typed,
//! slot-countable resources a session arbitrates against, turned into the [`NodeSpec`]s
//! [`crate::resource::ResourcePool::fill`] expects.

use crate::errors::SessionError;
use crate::resource::{NodeSpec, SlotSpec};
use camino::Utf8Path;
use indexmap::IndexMap;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct PoolFile {
    resource_pool: Vec<PoolNode>,
}

#[derive(Debug, Deserialize)]
struct PoolNode {
    id: String,
    #[serde(default)]
    cpus: Vec<PoolSlot>,
    #[serde(default)]
    gpus: Vec<PoolSlot>,
}

#[derive(Debug, Deserialize)]
struct PoolSlot {
    id: String,
    slots: u32,
}

/// Reads and parses a resource pool file, dispatching on its extension (`.yaml`/`.yml` or
/// `.json`; JSON is also valid YAML, so an unrecognized extension falls back to YAML).
pub fn load_resource_pool_file(path: &Utf8Path) -> Result<Vec<NodeSpec>, SessionError> {
    let text = std::fs::read_to_string(path).map_err(|source| SessionError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: PoolFile = if path.extension() == Some("json") {
        serde_json::from_str(&text).map_err(|source| SessionError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        // YAML has no dedicated `SessionError` variant (its error type isn't shared with the
        // TOML/JSON parse paths elsewhere in the crate); wrap it as an `io::Error` under `Read`.
        serde_yaml::from_str(&text).map_err(|err| SessionError::Read {
            path: path.to_path_buf(),
            source: std::io::Error::other(err),
        })?
    };
    Ok(parsed.resource_pool.into_iter().map(to_node_spec).collect())
}

fn to_node_spec(node: PoolNode) -> NodeSpec {
    let mut resources = IndexMap::new();
    resources.insert("cpus".to_string(), node.cpus.into_iter().map(to_slot_spec).collect());
    if !node.gpus.is_empty() {
        resources.insert("gpus".to_string(), node.gpus.into_iter().map(to_slot_spec).collect());
    }
    NodeSpec { id: node.id, resources }
}

fn to_slot_spec(slot: PoolSlot) -> SlotSpec {
    SlotSpec { id: slot.id, slots: slot.slots }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_yaml_pool_file() {
        let dir = camino_tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.yaml");
        std::fs::write(
            &path,
            indoc::indoc! {r#"
                resource_pool:
                  - id: n0
                    cpus:
                      - id: "0"
                        slots: 1
                      - id: "1"
                        slots: 1
                    gpus:
                      - id: "0"
                        slots: 1
            "#},
        )
        .unwrap();

        let nodes = load_resource_pool_file(&path).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, "n0");
        assert_eq!(nodes[0].resources["cpus"].len(), 2);
        assert_eq!(nodes[0].resources["gpus"].len(), 1);
    }

    #[test]
    fn loads_a_json_pool_file_with_no_gpus() {
        let dir = camino_tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.json");
        std::fs::write(
            &path,
            indoc::indoc! {r#"
                {"resource_pool": [{"id": "n0", "cpus": [{"id": "0", "slots": 4}]}]}
            "#},
        )
        .unwrap();

        let nodes = load_resource_pool_file(&path).unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(!nodes[0].resources.contains_key("gpus"));
    }
}
