// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Errors produced by the canary execution engine.

use crate::status::Status;
use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while building or mutating a [`crate::resource::ResourcePool`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// A node defined a duplicate local id for some resource type.
    #[error("node `{node_id}` defines duplicate local id `{local_id}` for resource `{kind}`")]
    DuplicateLocalId {
        node_id: String,
        kind: String,
        local_id: String,
    },

    /// A node did not define the mandatory `cpus` resource.
    #[error("node `{node_id}` does not define the required `cpus` resource")]
    MissingCpus { node_id: String },

    /// A request named a resource type the pool has no knowledge of.
    #[error("unknown resource type `{kind}`")]
    UnknownResourceType { kind: String },
}

/// Returned by [`crate::resource::ResourcePool::satisfiable`] when a request can never be
/// granted by the pool as configured, regardless of current load.
#[derive(Debug, Error)]
#[error("request unsatisfiable: {reason}")]
pub struct Unsatisfiable {
    pub reason: String,
}

/// Returned by [`crate::resource::ResourcePool::acquire`] when a request is satisfiable in
/// principle but cannot be granted right now because other cases hold the slots.
#[derive(Debug, Error)]
#[error("resources currently unavailable: {reason}")]
pub struct Unavailable {
    pub reason: String,
}

/// Errors surfaced while staging or executing a single test case.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// An asset the case declared could not be found.
    #[error("resource file `{src}` not found")]
    MissingAsset { src: Utf8PathBuf },

    /// Staging (copy/link) of an asset failed for a reason other than a missing source.
    #[error("failed to stage asset `{src}` to `{dst}`")]
    StageAsset {
        src: Utf8PathBuf,
        dst: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Creating or cleaning the case's working directory failed.
    #[error("failed to prepare working directory `{dir}`")]
    WorkingDir {
        dir: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The child process could not be spawned at all.
    #[error("failed to spawn case command `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error occurred while a case's logs were being written.
    #[error("I/O error while running case")]
    Io(#[source] std::io::Error),
}

/// Errors surfaced while composing or submitting a batch job.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The external scheduler rejected or failed to accept the job.
    #[error("batch submission failed: {reason}")]
    SubmissionFailed { reason: String },

    /// Polling the scheduler for job status failed.
    #[error("failed to query scheduler for job `{job_id}`")]
    PollFailed {
        job_id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Dispatcher-level errors that terminate a session.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The first-observed terminal failure(s) when fail-fast is enabled.
    #[error("fail-fast triggered by: {}", .failing.join(", "))]
    FailFast { failing: Vec<String> },

    /// The session-wide wall clock budget was exceeded.
    #[error("session timed out after {elapsed:?}")]
    SessionTimeout { elapsed: std::time::Duration },

    /// The worker pool itself was lost (e.g. a worker task panicked).
    #[error("worker pool broken: {reason}")]
    BrokenWorkerPool { reason: String },
}

/// An orderly, pre-classified process exit, as opposed to an unexpected panic.
///
/// This is the Rust analogue of canary's `StopExecution` exception: a single typed value
/// carrying both a human message and the process exit code it should map to, constructed at
/// one place (the executor) and propagated with `?` rather than a global exception hook.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct StopExecution {
    pub message: String,
    pub exit_code: u8,
}

impl StopExecution {
    pub fn new(message: impl Into<String>, exit_code: u8) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }
}

/// Errors raised while persisting or reading back session state.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to read session file `{path}`")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write session file `{path}`")]
    Write {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse record at `{path}`")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no canary session found in or above `{searched_from}`")]
    NoSessionRoot { searched_from: Utf8PathBuf },

    #[error("case `{id}` not found in session")]
    CaseNotFound { id: String },
}

/// Errors raised while parsing or applying configuration overrides.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file `{path}`")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unknown config key `{section}:{key}`")]
    UnknownKey { section: String, key: String },

    #[error("invalid value for `{section}:{key}`: `{value}`")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },

    #[error("malformed -c override `{spec}`, expected `section:key:value`")]
    MalformedOverride { spec: String },
}

/// A terminal status that does not satisfy the dependency edge expectation it was checked
/// against, along with a human-readable detail describing why.
#[derive(Debug, Error)]
#[error("dependency `{dep_id}` did not satisfy the expected condition ({status})")]
pub struct DependencyUnsatisfied {
    pub dep_id: String,
    pub status: Status,
}
