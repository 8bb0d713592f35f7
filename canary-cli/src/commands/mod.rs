// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! One module per subcommand. Shared session/config plumbing lives here so `run`/`find` don't
//! duplicate it.

mod describe;
mod find;
mod run;
mod status;

pub use describe::describe;
pub use find::find;
pub use run::run;
pub use status::status;

use crate::errors::CliError;
use camino::Utf8Path;
use canary_runner::config::SessionConfig;
use canary_runner::resource::{NodeSpec, ResourcePool, SlotSpec};
use canary_runner::session::SessionLayout;
use indexmap::IndexMap;
use std::time::Duration;

/// Opens (initializing if necessary) the `.canary/` session layout rooted at `cwd`, and loads
/// its persisted config (or the default, if none has been written yet).
pub(crate) fn open_session(cwd: &Utf8Path) -> Result<(SessionLayout, SessionConfig), CliError> {
    let layout = match SessionLayout::discover(cwd) {
        Ok(layout) => layout,
        Err(_) => SessionLayout::init(cwd)?,
    };
    let config = match std::fs::read_to_string(layout.config_path()) {
        Ok(text) => SessionConfig::from_toml(&text).map_err(|source| {
            canary_runner::errors::ConfigError::Parse {
                path: layout.config_path(),
                source,
            }
        })?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => SessionConfig::default(),
        Err(source) => {
            return Err(canary_runner::errors::SessionError::Read {
                path: layout.config_path(),
                source,
            }
            .into())
        }
    };
    Ok((layout, config))
}

/// Applies a batch of `section:key:value` overrides (the `-c` global option) in order, so later
/// overrides win over earlier ones.
pub(crate) fn apply_config_overrides(config: &mut SessionConfig, overrides: &[String]) -> Result<(), CliError> {
    for spec in overrides {
        let mut parts = spec.splitn(3, ':');
        let (Some(section), Some(key), Some(value)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(CliError::MalformedConfigOverride { spec: spec.clone() });
        };
        config.apply_override(section, key, value)?;
    }
    Ok(())
}

/// Applies `-b key=value` batch overrides, equivalent to `-c batch:key:value` but spelled the
/// way §6 describes for batch-specific controls.
pub(crate) fn apply_batch_overrides(config: &mut SessionConfig, overrides: &[String]) -> Result<(), CliError> {
    for spec in overrides {
        let Some((key, value)) = spec.split_once('=') else {
            return Err(CliError::MalformedBatchOverride { spec: spec.clone() });
        };
        config.apply_override("batch", key, value)?;
    }
    Ok(())
}

/// Parses `VAR=VAL` environment injections (the `-e` global option).
pub(crate) fn parse_env_overrides(overrides: &[String]) -> Result<Vec<(String, String)>, CliError> {
    overrides
        .iter()
        .map(|spec| {
            spec.split_once('=')
                .map(|(var, val)| (var.to_string(), val.to_string()))
                .ok_or_else(|| CliError::MalformedEnvOverride { spec: spec.clone() })
        })
        .collect()
}

/// Loads the resource pool named by `path`, or falls back to a single synthetic node sized by
/// the host's available parallelism, for ad hoc runs with no resource pool file configured.
pub(crate) fn load_or_default_pool(path: Option<&Utf8Path>) -> Result<ResourcePool, CliError> {
    let mut pool = ResourcePool::new();
    let nodes = match path {
        Some(path) => canary_runner::session::load_resource_pool_file(path)?,
        None => vec![default_node_spec()],
    };
    pool.fill(nodes).map_err(|err| {
        canary_runner::errors::SessionError::Read {
            path: path.map(|p| p.to_path_buf()).unwrap_or_default(),
            source: std::io::Error::other(err),
        }
    })?;
    Ok(pool)
}

fn default_node_spec() -> NodeSpec {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1);
    let slots = (0..cpus)
        .map(|i| SlotSpec {
            id: i.to_string(),
            slots: 1,
        })
        .collect();
    let mut resources = IndexMap::new();
    resources.insert("cpus".to_string(), slots);
    NodeSpec {
        id: "local".to_string(),
        resources,
    }
}

/// Parses a humantime-style duration string (`30m`, `2h`), as accepted by `--session-timeout`.
pub(crate) fn parse_duration(text: &str) -> Result<Duration, CliError> {
    humantime::parse_duration(text).map_err(|_| CliError::InvalidDuration { text: text.to_string() })
}

/// An ISO-8601-ish, filesystem-safe timestamp, used to name one invocation's directory under
/// `.canary/sessions/`.
pub(crate) fn invocation_timestamp() -> String {
    chrono::Local::now().format("%Y%m%dT%H%M%S%.3f").to_string()
}
