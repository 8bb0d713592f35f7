// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Stable, content-hashed test case identifiers.

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// A stable identifier derived from `file_path + name + sorted parameter bindings`.
///
/// Hashing a `BTreeMap` of parameters (rather than, say, a `Vec` of pairs in discovery order)
/// is what makes the id independent of parameter declaration order: the same case discovered
/// twice, possibly by different front ends, always yields the same id.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CaseId(String);

impl CaseId {
    /// Computes the id for a case from its identity-defining fields.
    pub fn compute(
        file_path: &Utf8Path,
        name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(file_path.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(name.as_bytes());
        for (key, value) in parameters {
            hasher.update(b"\0");
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        let digest = hasher.finalize();
        Self(hex_encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The session store shards case directories by the first two hex characters of the id
    /// (`cases/<id[0:2]>/<id[2:]>/testcase.lock`) to avoid a single directory with tens of
    /// thousands of entries.
    pub fn shard(&self) -> (&str, &str) {
        self.0.split_at(2)
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CaseId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(out, "{byte:02x}").expect("writing to a String never fails");
    }
    out
}
