// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Typed session configuration, read from a `.canary/config`-style TOML document.
//!
//! Each concern gets its own small struct under [`elements`], the way
//! `nextest-runner::config::elements` separates `slow-timeout`, `retries`,
//! `threads-required`, and so on, rather than one flat bag of fields.

pub mod elements;

use elements::{BatchConfig, TimeoutMultiplier};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level session configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session-wide wall-clock budget; `None` means unbounded.
    #[serde(with = "humantime_serde::option")]
    pub session_timeout: Option<Duration>,
    pub timeout_multiplier: TimeoutMultiplier,
    pub fail_fast: bool,
    pub batch: BatchConfig,
    /// Path to the resource pool file (see [`crate::session::layout`]); relative to the
    /// session root.
    pub resource_pool_file: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout: None,
            timeout_multiplier: TimeoutMultiplier::default(),
            fail_fast: false,
            batch: BatchConfig::default(),
            resource_pool_file: None,
        }
    }
}

impl SessionConfig {
    /// Parses a config document from TOML text, as persisted at `.canary/config`.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Applies a single `-c section:key:value` override, the way the CLI's global options
    /// accept them (§6). Only the small set of scalar keys named here is supported; anything
    /// else is a `ConfigError::UnknownKey`.
    pub fn apply_override(&mut self, section: &str, key: &str, value: &str) -> Result<(), crate::errors::ConfigError> {
        match (section, key) {
            ("", "fail_fast") | ("session", "fail_fast") => {
                self.fail_fast = parse_bool(value)?;
            }
            ("", "timeout_multiplier") | ("session", "timeout_multiplier") => {
                self.timeout_multiplier = TimeoutMultiplier(parse_f64(value)?);
            }
            ("batch", "workers") => {
                self.batch.workers = parse_usize(value)?;
            }
            ("batch", "scheduler") => {
                self.batch.scheduler = match value {
                    "none" => elements::SchedulerKind::None,
                    "shell" => elements::SchedulerKind::Shell,
                    "slurm" => elements::SchedulerKind::Slurm,
                    "pbs" => elements::SchedulerKind::Pbs,
                    other => {
                        return Err(crate::errors::ConfigError::InvalidValue {
                            section: section.to_string(),
                            key: key.to_string(),
                            value: other.to_string(),
                        })
                    }
                };
            }
            ("batch", "retry_ceiling") => {
                self.batch.retry_ceiling = elements::RetryCeiling(parse_u32(value)?);
            }
            ("batch", "scheme") => {
                self.batch.scheme = match value {
                    "sequential" => elements::BatchScheme::Sequential,
                    "isolate" => elements::BatchScheme::Isolate,
                    other => {
                        return Err(crate::errors::ConfigError::InvalidValue {
                            section: section.to_string(),
                            key: key.to_string(),
                            value: other.to_string(),
                        })
                    }
                };
            }
            _ => {
                return Err(crate::errors::ConfigError::UnknownKey {
                    section: section.to_string(),
                    key: key.to_string(),
                })
            }
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool, crate::errors::ConfigError> {
    value
        .parse()
        .map_err(|_| crate::errors::ConfigError::InvalidValue {
            section: String::new(),
            key: "bool".to_string(),
            value: value.to_string(),
        })
}

fn parse_f64(value: &str) -> Result<f64, crate::errors::ConfigError> {
    value
        .parse()
        .map_err(|_| crate::errors::ConfigError::InvalidValue {
            section: String::new(),
            key: "f64".to_string(),
            value: value.to_string(),
        })
}

fn parse_usize(value: &str) -> Result<usize, crate::errors::ConfigError> {
    value
        .parse()
        .map_err(|_| crate::errors::ConfigError::InvalidValue {
            section: String::new(),
            key: "usize".to_string(),
            value: value.to_string(),
        })
}

fn parse_u32(value: &str) -> Result<u32, crate::errors::ConfigError> {
    value
        .parse()
        .map_err(|_| crate::errors::ConfigError::InvalidValue {
            section: String::new(),
            key: "u32".to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = SessionConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = SessionConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.batch.retry_ceiling, elements::RetryCeiling(3));
        assert_eq!(parsed.timeout_multiplier.0, 1.0);
    }

    #[test]
    fn partial_overrides_keep_other_defaults() {
        let text = indoc::indoc! {r#"
            fail_fast = true

            [batch]
            workers = 10
        "#};
        let config = SessionConfig::from_toml(text).unwrap();
        assert!(config.fail_fast);
        assert_eq!(config.batch.workers, 10);
        assert_eq!(config.batch.retry_ceiling, elements::RetryCeiling(3));
    }

    #[test]
    fn cli_override_sets_nested_batch_key() {
        let mut config = SessionConfig::default();
        config.apply_override("batch", "workers", "7").unwrap();
        config.apply_override("", "fail_fast", "true").unwrap();
        assert_eq!(config.batch.workers, 7);
        assert!(config.fail_fast);
    }

    #[test]
    fn cli_override_rejects_unknown_key() {
        let mut config = SessionConfig::default();
        let err = config.apply_override("nope", "nope", "1").unwrap_err();
        assert!(matches!(err, crate::errors::ConfigError::UnknownKey { .. }));
    }
}
