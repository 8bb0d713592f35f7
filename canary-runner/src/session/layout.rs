// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Session root discovery and the fixed `.canary/` directory layout.
//!
//! Grounded in `nextest-runner::cargo_config`'s ancestor walk for `.cargo/config.toml`: there is
//! no external metadata tool to delegate to here (no `guppy`/`cargo_metadata` equivalent), so the
//! walk is done directly against a single marker file.

use crate::errors::SessionError;
use camino::{Utf8Path, Utf8PathBuf};

const SESSION_TAG: &str = "SESSION.TAG";
const CANARY_DIR: &str = ".canary";

/// The resolved `.canary/` directory layout rooted at a session work tree.
///
/// Every path helper returns a location under `root`; nothing here touches the filesystem
/// except [`SessionLayout::discover`] and [`SessionLayout::init`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionLayout {
    root: Utf8PathBuf,
}

impl SessionLayout {
    /// Locates an existing session by walking up from `start` looking for `.canary/SESSION.TAG`,
    /// the way `cargo`/`nextest` locate the nearest workspace manifest.
    pub fn discover(start: &Utf8Path) -> Result<Self, SessionError> {
        let mut dir = start.to_path_buf();
        loop {
            if dir.join(CANARY_DIR).join(SESSION_TAG).is_file() {
                return Ok(Self { root: dir });
            }
            if !dir.pop() {
                return Err(SessionError::NoSessionRoot {
                    searched_from: start.to_path_buf(),
                });
            }
        }
    }

    /// Creates a fresh session rooted at `root`, writing the marker file and the fixed
    /// subdirectory skeleton. Idempotent: re-initializing an existing root is a no-op beyond
    /// touching the marker.
    pub fn init(root: &Utf8Path) -> Result<Self, SessionError> {
        let canary_dir = root.join(CANARY_DIR);
        for sub in ["cases", "sessions", "cache", "tags", "refs"] {
            std::fs::create_dir_all(canary_dir.join(sub)).map_err(|source| SessionError::Write {
                path: canary_dir.join(sub),
                source,
            })?;
        }
        let tag_path = canary_dir.join(SESSION_TAG);
        if !tag_path.is_file() {
            std::fs::write(&tag_path, b"").map_err(|source| SessionError::Write {
                path: tag_path.clone(),
                source,
            })?;
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn canary_dir(&self) -> Utf8PathBuf {
        self.root.join(CANARY_DIR)
    }

    pub fn config_path(&self) -> Utf8PathBuf {
        self.canary_dir().join("config")
    }

    pub fn cases_dir(&self) -> Utf8PathBuf {
        self.canary_dir().join("cases")
    }

    pub fn index_path(&self) -> Utf8PathBuf {
        self.cases_dir().join("index.jsons")
    }

    pub fn case_record_path(&self, id: &crate::case::CaseId) -> Utf8PathBuf {
        let (prefix, rest) = id.shard();
        self.cases_dir().join(prefix).join(rest).join("testcase.lock")
    }

    pub fn sessions_dir(&self) -> Utf8PathBuf {
        self.canary_dir().join("sessions")
    }

    /// Directory for one invocation, named by its ISO-8601 start timestamp.
    pub fn session_dir(&self, iso_timestamp: &str) -> Utf8PathBuf {
        self.sessions_dir().join(iso_timestamp)
    }

    /// The `work/` subdirectory of one invocation: where cases actually execute, per §6.
    pub fn work_dir(&self, iso_timestamp: &str) -> Utf8PathBuf {
        self.session_dir(iso_timestamp).join("work")
    }

    /// One case's working directory within an invocation's `work/` tree, sharded the same way
    /// as [`Self::case_record_path`] so a large session doesn't put tens of thousands of
    /// directories side by side.
    pub fn case_working_dir(&self, iso_timestamp: &str, id: &crate::case::CaseId) -> Utf8PathBuf {
        let (prefix, rest) = id.shard();
        self.work_dir(iso_timestamp).join(prefix).join(rest)
    }

    pub fn session_json_path(&self, iso_timestamp: &str) -> Utf8PathBuf {
        self.session_dir(iso_timestamp).join("session.json")
    }

    pub fn results_json_path(&self, iso_timestamp: &str) -> Utf8PathBuf {
        self.session_dir(iso_timestamp).join("results.json")
    }

    pub fn cache_dir(&self) -> Utf8PathBuf {
        self.canary_dir().join("cache")
    }

    pub fn cache_entry_path(&self, content_hash: &str) -> Utf8PathBuf {
        let (prefix, rest) = content_hash.split_at(2.min(content_hash.len()));
        self.cache_dir().join(prefix).join(rest)
    }

    pub fn tags_dir(&self) -> Utf8PathBuf {
        self.canary_dir().join("tags")
    }

    pub fn tag_path(&self, tag: &str) -> Utf8PathBuf {
        self.tags_dir().join(tag)
    }

    pub fn refs_latest_path(&self) -> Utf8PathBuf {
        self.canary_dir().join("refs").join("latest")
    }

    pub fn head_path(&self) -> Utf8PathBuf {
        self.canary_dir().join("HEAD")
    }
}
