// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! The append-only dependency index: `cases/index.jsons`, one `{id, dep_ids}` record per line,
//! used to reconstruct the dependency graph without re-reading every case record.

use super::layout::SessionLayout;
use crate::case::CaseId;
use crate::errors::SessionError;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};

#[derive(Debug, Serialize, Deserialize)]
struct IndexRecord {
    id: CaseId,
    dep_ids: Vec<CaseId>,
}

/// Append-only log mapping each case id to the ids it depends on.
pub struct DependencyIndex<'layout> {
    layout: &'layout SessionLayout,
}

impl<'layout> DependencyIndex<'layout> {
    pub fn new(layout: &'layout SessionLayout) -> Self {
        Self { layout }
    }

    /// Appends one record per case to the index. Idempotent in effect (later entries for the
    /// same id shadow earlier ones when the index is read back), so re-running discovery over
    /// an existing session is safe.
    pub fn append(&self, entries: &[(CaseId, Vec<CaseId>)]) -> Result<(), SessionError> {
        let path = self.layout.index_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SessionError::Write { path: parent.to_path_buf(), source })?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| SessionError::Write { path: path.clone(), source })?;
        for (id, dep_ids) in entries {
            let record = IndexRecord { id: id.clone(), dep_ids: dep_ids.clone() };
            let mut line = serde_json::to_string(&record).map_err(|source| SessionError::Parse { path: path.clone(), source })?;
            line.push('\n');
            file.write_all(line.as_bytes()).map_err(|source| SessionError::Write { path: path.clone(), source })?;
        }
        Ok(())
    }

    /// Rebuilds the in-memory `id -> dep_ids` map from the log, keeping only the last entry
    /// written for each id.
    pub fn rebuild(&self) -> Result<std::collections::HashMap<CaseId, Vec<CaseId>>, SessionError> {
        let path = self.layout.index_path();
        let mut map = std::collections::HashMap::new();
        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(map),
            Err(source) => return Err(SessionError::Read { path, source }),
        };
        for line in std::io::BufReader::new(file).lines() {
            let line = line.map_err(|source| SessionError::Read { path: path.clone(), source })?;
            if line.trim().is_empty() {
                continue;
            }
            let record: IndexRecord = serde_json::from_str(&line).map_err(|source| SessionError::Parse { path: path.clone(), source })?;
            map.insert(record.id, record.dep_ids);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_rebuild_reconstructs_the_map() {
        let dir = camino_tempfile::tempdir().unwrap();
        let layout = SessionLayout::init(dir.path()).unwrap();
        let index = DependencyIndex::new(&layout);

        let a: CaseId = "a".to_string().into();
        let b: CaseId = "b".to_string().into();
        index.append(&[(b.clone(), vec![a.clone()]), (a.clone(), vec![])]).unwrap();

        let map = index.rebuild().unwrap();
        assert_eq!(map.get(&b), Some(&vec![a]));
        assert_eq!(map.get(&a), Some(&vec![]));
    }

    #[test]
    fn later_append_shadows_earlier_entry_for_the_same_id() {
        let dir = camino_tempfile::tempdir().unwrap();
        let layout = SessionLayout::init(dir.path()).unwrap();
        let index = DependencyIndex::new(&layout);

        let a: CaseId = "a".to_string().into();
        let b: CaseId = "b".to_string().into();
        index.append(&[(a.clone(), vec![])]).unwrap();
        index.append(&[(a.clone(), vec![b.clone()])]).unwrap();

        let map = index.rebuild().unwrap();
        assert_eq!(map.get(&a), Some(&vec![b]));
    }

    #[test]
    fn rebuild_on_missing_index_returns_empty_map() {
        let dir = camino_tempfile::tempdir().unwrap();
        let layout = SessionLayout::init(dir.path()).unwrap();
        let index = DependencyIndex::new(&layout);
        assert!(index.rebuild().unwrap().is_empty());
    }
}
