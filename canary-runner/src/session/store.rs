// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Atomic, sharded persistence of per-case records.
//!
//! Grounded in `nextest-runner::run_store::RunRecorder`'s use of `atomicwrites::AtomicFile` to
//! write `runs.json`: a crash mid-write must never corrupt a previously-valid record, so every
//! write goes through write-temp-then-rename rather than a truncating in-place write.

use super::layout::SessionLayout;
use crate::case::{CaseId, TestCase};
use crate::errors::SessionError;
use std::io::Write;

/// Reads and writes `testcase.lock` records under a session's `cases/` tree.
pub struct CaseStore<'layout> {
    layout: &'layout SessionLayout,
}

impl<'layout> CaseStore<'layout> {
    pub fn new(layout: &'layout SessionLayout) -> Self {
        Self { layout }
    }

    /// Persists `case`'s full record (immutable spec plus current mutable state) atomically.
    pub fn write(&self, case: &TestCase) -> Result<(), SessionError> {
        let path = self.layout.case_record_path(&case.id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SessionError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let bytes = serde_json::to_vec_pretty(case).map_err(|source| SessionError::Parse {
            path: path.clone(),
            source,
        })?;
        atomicwrites::AtomicFile::new(path.as_std_path(), atomicwrites::AllowOverwrite)
            .write(|file| file.write_all(&bytes))
            .map_err(|err| match err {
                atomicwrites::Error::Internal(source) => SessionError::Write { path: path.clone(), source },
                atomicwrites::Error::User(source) => SessionError::Write { path: path.clone(), source },
            })?;
        Ok(())
    }

    /// Reads a single case's record back off disk.
    pub fn read(&self, id: &CaseId) -> Result<TestCase, SessionError> {
        let path = self.layout.case_record_path(id);
        let text = std::fs::read_to_string(&path).map_err(|source| SessionError::Read { path: path.clone(), source })?;
        serde_json::from_str(&text).map_err(|source| SessionError::Parse { path, source })
    }

    /// Reads every persisted case record back off disk, in no particular order. Used to
    /// reconstruct a session's state for the `status` command.
    pub fn read_all(&self) -> Result<Vec<TestCase>, SessionError> {
        let cases_dir = self.layout.cases_dir();
        if !cases_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut cases = Vec::new();
        for entry in walkdir::WalkDir::new(&cases_dir) {
            let entry = entry.map_err(|err| SessionError::Read {
                path: cases_dir.clone(),
                source: err.into_io_error().unwrap_or_else(|| std::io::Error::other("walkdir error")),
            })?;
            if entry.file_name() == "testcase.lock" {
                let path = camino::Utf8PathBuf::from_path_buf(entry.into_path())
                    .expect("session paths are always utf8");
                let text = std::fs::read_to_string(&path).map_err(|source| SessionError::Read { path: path.clone(), source })?;
                let case = serde_json::from_str(&text).map_err(|source| SessionError::Parse { path, source })?;
                cases.push(case);
            }
        }
        Ok(cases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use std::collections::BTreeMap;

    fn sample_case(name: &str) -> TestCase {
        TestCase::new(Utf8PathBuf::from("t.pyt"), name, BTreeMap::new(), vec!["true".into()])
    }

    #[test]
    fn write_then_read_round_trips_a_case() {
        let dir = camino_tempfile::tempdir().unwrap();
        let layout = SessionLayout::init(dir.path()).unwrap();
        let store = CaseStore::new(&layout);

        let case = sample_case("test_a");
        store.write(&case).unwrap();

        let read_back = store.read(&case.id).unwrap();
        assert_eq!(read_back.id, case.id);
        assert_eq!(read_back.display_name, "test_a");
    }

    #[test]
    fn overwriting_a_record_replaces_it_atomically() {
        let dir = camino_tempfile::tempdir().unwrap();
        let layout = SessionLayout::init(dir.path()).unwrap();
        let store = CaseStore::new(&layout);

        let mut case = sample_case("test_b");
        store.write(&case).unwrap();
        case.returncode = Some(0);
        store.write(&case).unwrap();

        let read_back = store.read(&case.id).unwrap();
        assert_eq!(read_back.returncode, Some(0));
    }

    #[test]
    fn read_all_finds_every_persisted_case() {
        let dir = camino_tempfile::tempdir().unwrap();
        let layout = SessionLayout::init(dir.path()).unwrap();
        let store = CaseStore::new(&layout);

        store.write(&sample_case("test_a")).unwrap();
        store.write(&sample_case("test_b")).unwrap();

        let all = store.read_all().unwrap();
        assert_eq!(all.len(), 2);
    }
}
