// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Launches a single [`TestCase`] as a child process, applies timeout and cancellation
//! control, and classifies its exit into a terminal [`Status`].
//!
//! Grounded in `_canary/runners.py::TestCaseRunner.run`: stage the working directory, assemble
//! the environment, spawn with `start_new_session=true`, poll at a short interval sampling
//! process metrics, and convert a SIGINT-on-timeout into a classified `timeout` status rather
//! than propagating a generic error.

use super::classify::classify_normal_exit;
use super::environment::build_environment;
use crate::case::{Asset, AssetAction, TestCase};
use crate::errors::RunnerError;
use crate::resource::{Acquisition, ResourcePool};
use crate::status::{Status, StatusValue};
use crate::time::stopwatch;
use camino::{Utf8Path, Utf8PathBuf};
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

/// How often the poll loop checks on the child and samples its metrics.
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long a case is given to exit cleanly after SIGINT before SIGKILL is sent.
const SIGINT_GRACE: Duration = Duration::from_secs(2);

const SIGINT: i32 = 2;
const SIGKILL: i32 = 9;

/// Best-effort resource usage sampled from `/proc` over the life of the child. Every field is
/// `None` on platforms or under sandboxes where the corresponding `/proc` entry isn't
/// available; a missing sample is not an error, mirroring the source's `psutil`-based sampler
/// swallowing `NoSuchProcess`/`AccessDenied`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    pub max_rss_kb: Option<u64>,
    pub max_open_fds: Option<u64>,
}

impl Measurements {
    /// Merges in another sample, keeping the maximum of each field seen so far.
    pub fn merge_max(&mut self, other: Measurements) {
        self.max_rss_kb = max_option(self.max_rss_kb, other.max_rss_kb);
        self.max_open_fds = max_option(self.max_open_fds, other.max_open_fds);
    }
}

fn max_option(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// The result of running one case to completion: its terminal status, the raw returncode (wait
/// status convention: non-negative is the process's own exit code, `-n` means killed by signal
/// `n`), and whatever metrics were sampled.
pub struct CaseOutcome {
    pub status: Status,
    pub returncode: i32,
    pub measurements: Measurements,
}

/// Runs `case` to completion in `working_dir`, using `acquisition`/`pool` to resolve resource
/// environment variables.
///
/// `cancel` is watched alongside the per-case timeout: the executor flips it to `true` to tear
/// a case down early (fail-fast, session timeout, or a keyboard-driven quit) without the case
/// needing to know which of those triggered it. A case that is still running when `cancel`
/// flips lands on `cancelled`, not `timeout`.
///
/// Staging a missing asset is classified as `skipped` here rather than propagated as a
/// `RunnerError`: per §4.4 step 1, a missing resource file is a per-case outcome, not a runner
/// failure. Failures preparing the working directory itself, or spawning the child at all, are
/// infrastructure failures and are propagated.
#[instrument(skip(case, acquisition, pool, cancel), fields(case = %case.id))]
pub async fn run_case(
    case: &TestCase,
    working_dir: &Utf8Path,
    acquisition: &Acquisition,
    pool: &ResourcePool,
    timeout_multiplier: f64,
    cancel: &mut watch::Receiver<bool>,
) -> Result<CaseOutcome, RunnerError> {
    prepare_working_dir(working_dir).await?;

    if let Err(err) = stage_assets(&case.assets, working_dir).await {
        if let RunnerError::MissingAsset { src } = &err {
            return Ok(CaseOutcome {
                status: Status::terminal(
                    StatusValue::Skipped,
                    Some(format!("resource file {src} not found")),
                ),
                returncode: 0,
                measurements: Measurements::default(),
            });
        }
        return Err(err);
    }

    let env = build_environment(case, acquisition, pool, working_dir);

    let stdout_path = working_dir.join("canary.log.out");
    let stderr_path = working_dir.join("canary.log.err");
    let stdout_file = std::fs::File::create(&stdout_path)
        .map_err(|source| RunnerError::WorkingDir { dir: working_dir.to_path_buf(), source })?;
    let stderr_file = std::fs::File::create(&stderr_path)
        .map_err(|source| RunnerError::WorkingDir { dir: working_dir.to_path_buf(), source })?;

    let mut command = Command::new(&case.command[0]);
    command
        .args(&case.command[1..])
        .current_dir(working_dir)
        .env_clear()
        .envs(&env)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_file))
        .stderr(Stdio::from(stderr_file));
    // `start_new_session=true` in the source: put the child in its own process group so a
    // timeout can signal the whole subtree rather than just the immediate child.
    command.process_group(0);

    let command_line = case.command.join(" ");
    let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
        command: command_line,
        source,
    })?;

    let outcome = poll_until_exit(&mut child, case, timeout_multiplier, cancel).await?;
    Ok(outcome)
}

async fn prepare_working_dir(working_dir: &Utf8Path) -> Result<(), RunnerError> {
    if tokio::fs::metadata(working_dir).await.is_ok() {
        tokio::fs::remove_dir_all(working_dir)
            .await
            .map_err(|source| RunnerError::WorkingDir { dir: working_dir.to_path_buf(), source })?;
    }
    tokio::fs::create_dir_all(working_dir)
        .await
        .map_err(|source| RunnerError::WorkingDir { dir: working_dir.to_path_buf(), source })
}

async fn stage_assets(assets: &[Asset], working_dir: &camino::Utf8Path) -> Result<(), RunnerError> {
    for asset in assets {
        if tokio::fs::metadata(&asset.src).await.is_err() {
            return Err(RunnerError::MissingAsset { src: asset.src.clone() });
        }
        let dst = working_dir.join(&asset.dst);
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| RunnerError::StageAsset { src: asset.src.clone(), dst: dst.clone(), source })?;
        }
        match asset.action {
            AssetAction::Copy => {
                tokio::fs::copy(&asset.src, &dst).await.map_err(|source| {
                    RunnerError::StageAsset { src: asset.src.clone(), dst: dst.clone(), source }
                })?;
            }
            AssetAction::Link => {
                let src = asset.src.clone();
                let dst_for_blocking = dst.clone();
                tokio::task::spawn_blocking(move || std::os::unix::fs::symlink(&src, &dst_for_blocking))
                    .await
                    .expect("symlink blocking task panicked")
                    .map_err(|source| RunnerError::StageAsset { src: asset.src.clone(), dst, source })?;
            }
        }
    }
    Ok(())
}

async fn poll_until_exit(
    child: &mut Child,
    case: &TestCase,
    timeout_multiplier: f64,
    cancel: &mut watch::Receiver<bool>,
) -> Result<CaseOutcome, RunnerError> {
    let timeout_budget = Duration::from_secs_f64((case.timeout_sec * timeout_multiplier).max(0.0));
    let start = stopwatch();
    let mut measurements = Measurements::default();

    loop {
        if let Some(status) = child.try_wait().map_err(RunnerError::Io)? {
            return Ok(finish(status, &measurements, case));
        }

        if *cancel.borrow() {
            debug!(case = %case.id, "case cancelled before completion, sending SIGINT");
            if let Some(pid) = child.id() {
                send_signal_to_group(pid, SIGINT);
            }
            let status = wait_with_grace(child).await?;
            return Ok(finish_cancelled(status, &measurements));
        }

        if let Some(pid) = child.id() {
            measurements.merge_max(sample_metrics(pid));
        }

        let elapsed = start.snapshot().elapsed;
        if timeout_budget > Duration::ZERO && elapsed > timeout_budget {
            debug!(case = %case.id, timeout_sec = case.timeout_sec, "case exceeded timeout, sending SIGINT");
            if let Some(pid) = child.id() {
                send_signal_to_group(pid, SIGINT);
            }
            let status = wait_with_grace(child).await?;
            return Ok(finish_timeout(status, &measurements, case));
        }

        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = cancel.changed() => {}
        }
    }
}

async fn wait_with_grace(child: &mut Child) -> Result<Option<std::process::ExitStatus>, RunnerError> {
    let deadline = tokio::time::Instant::now() + SIGINT_GRACE;
    loop {
        if let Some(status) = child.try_wait().map_err(RunnerError::Io)? {
            return Ok(Some(status));
        }
        if tokio::time::Instant::now() >= deadline {
            if let Some(pid) = child.id() {
                warn!(pid, "case did not exit after SIGINT grace period, sending SIGKILL");
                send_signal_to_group(pid, SIGKILL);
            }
            let status = child.wait().await.map_err(RunnerError::Io)?;
            return Ok(Some(status));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn finish_timeout(status: Option<std::process::ExitStatus>, measurements: &Measurements, case: &TestCase) -> CaseOutcome {
    let returncode = status.map(returncode_of).unwrap_or(-SIGKILL);
    CaseOutcome {
        status: Status::terminal(
            StatusValue::Timeout,
            Some(format!("{} failed to finish in {:.2}s.", case.display_name, case.timeout_sec)),
        ),
        returncode,
        measurements: *measurements,
    }
}

fn finish_cancelled(status: Option<std::process::ExitStatus>, measurements: &Measurements) -> CaseOutcome {
    let returncode = status.map(returncode_of).unwrap_or(-SIGKILL);
    CaseOutcome {
        status: Status::terminal(
            StatusValue::Cancelled,
            Some("session closed while case was running".to_string()),
        ),
        returncode,
        measurements: *measurements,
    }
}

fn finish(status: std::process::ExitStatus, measurements: &Measurements, case: &TestCase) -> CaseOutcome {
    let returncode = returncode_of(status);
    CaseOutcome {
        status: classify_normal_exit(&case.expected_exit, returncode),
        returncode,
        measurements: *measurements,
    }
}

/// Converts a [`std::process::ExitStatus`] into the wait-status convention used throughout
/// this crate: non-negative is the process's own exit code, `-n` means killed by signal `n`.
fn returncode_of(status: std::process::ExitStatus) -> i32 {
    if let Some(signal) = status.signal() {
        -signal
    } else {
        status.code().unwrap_or(-1)
    }
}

fn send_signal_to_group(pid: u32, signal: i32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    let Ok(signal) = Signal::try_from(signal) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(pid as i32), signal) {
        debug!(pid, %err, "failed to signal case process group (it may have already exited)");
    }
}

#[cfg(target_os = "linux")]
fn sample_metrics(pid: u32) -> Measurements {
    let mut measurements = Measurements::default();
    if let Ok(status) = std::fs::read_to_string(format!("/proc/{pid}/status")) {
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                measurements.max_rss_kb = rest.trim().split_whitespace().next().and_then(|v| v.parse().ok());
            }
        }
    }
    if let Ok(entries) = std::fs::read_dir(format!("/proc/{pid}/fd")) {
        measurements.max_open_fds = Some(entries.count() as u64);
    }
    measurements
}

#[cfg(not(target_os = "linux"))]
fn sample_metrics(_pid: u32) -> Measurements {
    Measurements::default()
}
