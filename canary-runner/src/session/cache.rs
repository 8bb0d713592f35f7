// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! The selection cache: a content-hash-keyed cache of a resolved case selection, so repeated
//! `run` invocations with identical filters reuse the same discovery/filter result without
//! re-discovery. Keyed off `(case ids, filter description)`, not file mtimes.

use super::layout::SessionLayout;
use crate::case::CaseId;
use crate::errors::SessionError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;

/// A resolved selection: the exact set of case ids a `run`/`find` invocation settled on, plus
/// the filter expressions that produced it (kept for display, not re-evaluated).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Selection {
    pub case_ids: Vec<CaseId>,
    pub filter_description: String,
}

impl Selection {
    /// The content hash this selection would be cached under: a hash of the sorted case ids
    /// plus the filter description, so the same underlying selection always lands on the same
    /// cache entry regardless of discovery order.
    pub fn content_hash(&self) -> String {
        let mut sorted: Vec<&str> = self.case_ids.iter().map(CaseId::as_str).collect();
        sorted.sort_unstable();
        let mut hasher = Sha256::new();
        for id in &sorted {
            hasher.update(id.as_bytes());
            hasher.update(b"\0");
        }
        hasher.update(self.filter_description.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for byte in digest {
            use std::fmt::Write as _;
            write!(out, "{byte:02x}").expect("writing to a String never fails");
        }
        out
    }
}

pub struct SelectionCache<'layout> {
    layout: &'layout SessionLayout,
}

impl<'layout> SelectionCache<'layout> {
    pub fn new(layout: &'layout SessionLayout) -> Self {
        Self { layout }
    }

    /// Stores `selection`, returning the content hash it was stored under.
    pub fn store(&self, selection: &Selection) -> Result<String, SessionError> {
        let hash = selection.content_hash();
        let path = self.layout.cache_entry_path(&hash);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SessionError::Write { path: parent.to_path_buf(), source })?;
        }
        let bytes = serde_json::to_vec(selection).map_err(|source| SessionError::Parse { path: path.clone(), source })?;
        atomicwrites::AtomicFile::new(path.as_std_path(), atomicwrites::AllowOverwrite)
            .write(|file| file.write_all(&bytes))
            .map_err(|err| match err {
                atomicwrites::Error::Internal(source) | atomicwrites::Error::User(source) => {
                    SessionError::Write { path: path.clone(), source }
                }
            })?;
        Ok(hash)
    }

    /// Looks up a previously stored selection by its content hash.
    pub fn lookup(&self, content_hash: &str) -> Result<Option<Selection>, SessionError> {
        let path = self.layout.cache_entry_path(content_hash);
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let selection = serde_json::from_str(&text).map_err(|source| SessionError::Parse { path, source })?;
                Ok(Some(selection))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SessionError::Read { path, source }),
        }
    }

    /// Names `tag` as a pointer to the given content hash's cache entry, so `--reuse-selection
    /// <tag>`-style invocations can recall it without recomputing the hash.
    pub fn tag(&self, tag: &str, content_hash: &str) -> Result<(), SessionError> {
        let path = self.layout.tag_path(tag);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SessionError::Write { path: parent.to_path_buf(), source })?;
        }
        atomicwrites::AtomicFile::new(path.as_std_path(), atomicwrites::AllowOverwrite)
            .write(|file| file.write_all(content_hash.as_bytes()))
            .map_err(|err| match err {
                atomicwrites::Error::Internal(source) | atomicwrites::Error::User(source) => {
                    SessionError::Write { path: path.clone(), source }
                }
            })?;
        Ok(())
    }

    pub fn resolve_tag(&self, tag: &str) -> Result<Option<Selection>, SessionError> {
        let path = self.layout.tag_path(tag);
        let hash = match std::fs::read_to_string(&path) {
            Ok(hash) => hash,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SessionError::Read { path, source }),
        };
        self.lookup(hash.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection() -> Selection {
        Selection {
            case_ids: vec!["b".to_string().into(), "a".to_string().into()],
            filter_description: "-k smoke".to_string(),
        }
    }

    #[test]
    fn content_hash_is_independent_of_case_id_order() {
        let a = selection();
        let mut b = selection();
        b.case_ids.reverse();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn store_then_lookup_round_trips() {
        let dir = camino_tempfile::tempdir().unwrap();
        let layout = SessionLayout::init(dir.path()).unwrap();
        let cache = SelectionCache::new(&layout);

        let selection = selection();
        let hash = cache.store(&selection).unwrap();
        let found = cache.lookup(&hash).unwrap().unwrap();
        assert_eq!(found.filter_description, selection.filter_description);
    }

    #[test]
    fn tag_resolves_to_the_tagged_selection() {
        let dir = camino_tempfile::tempdir().unwrap();
        let layout = SessionLayout::init(dir.path()).unwrap();
        let cache = SelectionCache::new(&layout);

        let selection = selection();
        let hash = cache.store(&selection).unwrap();
        cache.tag("smoke", &hash).unwrap();

        let found = cache.resolve_tag("smoke").unwrap().unwrap();
        assert_eq!(found.filter_description, selection.filter_description);
    }

    #[test]
    fn lookup_of_unknown_hash_returns_none() {
        let dir = camino_tempfile::tempdir().unwrap();
        let layout = SessionLayout::init(dir.path()).unwrap();
        let cache = SelectionCache::new(&layout);
        assert!(cache.lookup("deadbeef").unwrap().is_none());
    }
}
