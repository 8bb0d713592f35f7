// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! The CLI's top-level error type: aggregates the core crate's errors and maps each to a
//! process exit code, the way `cargo-nextest::errors::ExpectedError` does for `nextest-runner`'s
//! error enums.

use canary_runner::errors::{ConfigError, SessionError};
use thiserror::Error;

/// Exit codes for failures that never reach the executor's own bitmask (§6): these are
/// infrastructure problems (bad config, a missing session, a malformed CLI argument), not a
/// verdict about any test case.
const EXIT_USAGE: i32 = 2;
const EXIT_SESSION: i32 = 3;
const EXIT_IO: i32 = 4;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("malformed -c override `{spec}`, expected `section:key:value`")]
    MalformedConfigOverride { spec: String },

    #[error("malformed -e override `{spec}`, expected `VAR=VAL`")]
    MalformedEnvOverride { spec: String },

    #[error("malformed -b override `{spec}`, expected `key=value`")]
    MalformedBatchOverride { spec: String },

    #[error("case `{case_id}` not found in the discovered source")]
    CaseNotFound { case_id: String },

    #[error("invalid duration `{text}`")]
    InvalidDuration { text: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// The process exit code this error maps to. A successful run instead exits with the
    /// executor's own bitmask (§6), computed over the cases that ran; these codes only cover
    /// failures that happened before (or entirely outside) case execution.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::MalformedConfigOverride { .. }
            | Self::MalformedEnvOverride { .. }
            | Self::MalformedBatchOverride { .. }
            | Self::CaseNotFound { .. }
            | Self::InvalidDuration { .. }
            | Self::Config(_) => EXIT_USAGE,
            Self::Session(_) => EXIT_SESSION,
            Self::Io(_) | Self::Json(_) => EXIT_IO,
        }
    }
}
