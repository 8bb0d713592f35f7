// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! `canary run`: discover (or reuse a cached selection), filter, and execute.

use super::{
    apply_batch_overrides, apply_config_overrides, invocation_timestamp, load_or_default_pool,
    open_session, parse_duration, parse_env_overrides,
};
use crate::cli::{GlobalOpts, RunArgs};
use crate::errors::CliError;
use canary_runner::case::{CaseId, EnvironmentMod, TestCase};
use canary_runner::config::elements::SchedulerKind;
use canary_runner::config::SessionConfig;
use canary_runner::executor::{BatchExecutor, BatchExecutorConfig, Executor, ExecutorConfig};
use canary_runner::queue::{BatchQueue, DirectQueue};
use canary_runner::scheduler::{partition_batches, PbsBackend, SchedulerBackend, ShellBackend, SlurmBackend};
use canary_runner::session::{
    CaseStore, Discoverer, JsonDiscoverer, JsonlReporter, PlainReporter, Reporter, Selection,
    SelectionCache, SessionLayout,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

pub fn run(global: &GlobalOpts, args: &RunArgs) -> Result<i32, CliError> {
    let cwd = std::env::current_dir()?;
    let cwd = camino::Utf8PathBuf::from_path_buf(cwd).expect("current directory is valid UTF-8");

    let (layout, mut config) = open_session(&cwd)?;
    apply_config_overrides(&mut config, &global.config_overrides)?;
    apply_batch_overrides(&mut config, &args.batch)?;

    if let Some(factor) = args.timeout_multiplier {
        config.timeout_multiplier = canary_runner::config::elements::TimeoutMultiplier(factor);
    }
    if let Some(text) = &args.session_timeout {
        config.session_timeout = Some(parse_duration(text)?);
    }
    if args.fail_fast {
        config.fail_fast = true;
    }

    let filter_description = describe_filters(args);

    let cache = SelectionCache::new(&layout);
    let mut cases: Vec<TestCase> = if let Some(tag) = &args.selection.reuse_selection {
        let selection = cache
            .resolve_tag(tag)?
            .ok_or_else(|| CliError::CaseNotFound { case_id: tag.clone() })?;
        let store = CaseStore::new(&layout);
        selection
            .case_ids
            .iter()
            .map(|id| store.read(id))
            .collect::<Result<_, _>>()?
    } else {
        JsonDiscoverer.discover(&args.source, Some(&filter_description))?
    };

    let env_overrides = parse_env_overrides(&global.env)?;
    if !env_overrides.is_empty() {
        for case in &mut cases {
            case.environment_mods.extend(
                env_overrides
                    .iter()
                    .map(|(var, value)| EnvironmentMod::Set { var: var.clone(), value: value.clone() }),
            );
        }
    }

    if let Some(tag) = &args.selection.tag_selection {
        let selection = Selection {
            case_ids: cases.iter().map(|c| c.id.clone()).collect(),
            filter_description: filter_description.clone(),
        };
        let hash = cache.store(&selection)?;
        cache.tag(tag, &hash)?;
    }

    let pool_path = args
        .resource_pool
        .clone()
        .or_else(|| config.resource_pool_file.clone().map(camino::Utf8PathBuf::from));
    let pool = load_or_default_pool(pool_path.as_deref())?;

    let case_count = cases.len();

    let timestamp = invocation_timestamp();
    let work_root = layout.work_dir(&timestamp);
    std::fs::create_dir_all(&work_root).map_err(|source| canary_runner::errors::SessionError::Write {
        path: work_root.clone(),
        source,
    })?;

    if global.echo {
        eprintln!("{}", config.to_toml().unwrap_or_default());
        eprintln!("# selected {case_count} case(s): {filter_description}");
    }

    let reporter: Box<dyn Reporter + Send> = if args.json {
        Box::new(JsonlReporter::new())
    } else {
        Box::new(PlainReporter::new())
    };

    info!(case_count, "starting session");

    let (exit_code, elapsed, stopped_early) = if config.batch.scheduler == SchedulerKind::None {
        // Direct queue: workers default to the resource pool's total cpu slot count unless
        // overridden (§4.3); the batch queue's `workers` default (5) governs concurrent
        // scheduler jobs instead, which is a different knob entirely.
        let workers = args.workers.unwrap_or_else(|| pool.total_slots("cpus").max(1) as usize);
        let queue = DirectQueue::new(cases, pool, workers.max(1), config.fail_fast);
        let store = CaseStore::new(&layout);
        let executor_config = ExecutorConfig {
            session_timeout: config.session_timeout,
            timeout_multiplier: config.timeout_multiplier.0,
        };
        let executor = Executor::new(queue, store, work_root.clone(), executor_config).with_reporter(reporter);
        let report = futures_run(executor);
        if let Some(reason) = &report.stop_reason {
            info!(?reason, "session stopped early");
        }
        (report.exit_code, report.elapsed, report.stop_reason.is_some())
    } else {
        if let Some(workers) = args.workers {
            config.batch.workers = workers;
        }
        let report = run_batch_queue(&layout, &work_root, cases, &config, reporter)?;
        (report.exit_code, report.elapsed, false)
    };

    write_results(&layout, &timestamp, exit_code, elapsed, stopped_early)?;
    point_refs_at(&layout, &timestamp)?;

    Ok(exit_code as i32)
}

/// Partitions `cases` into dependency-closed batches and drives them through the scheduler
/// backend named by `config.batch.scheduler` (§4.5). Submission scripts and stdout are staged
/// under `work_root`, the same per-invocation directory the direct queue uses for case working
/// directories.
fn run_batch_queue(
    layout: &SessionLayout,
    work_root: &camino::Utf8PathBuf,
    cases: Vec<TestCase>,
    config: &SessionConfig,
    reporter: Box<dyn Reporter + Send>,
) -> Result<canary_runner::executor::BatchExecutorReport, CliError> {
    let batches = partition_batches(&cases, &config.batch);
    let case_table: HashMap<CaseId, TestCase> = cases.into_iter().map(|c| (c.id.clone(), c)).collect();
    let queue = BatchQueue::new(batches, config.batch.workers.max(1), config.fail_fast, config.batch.retry_ceiling.0);
    let store = CaseStore::new(layout);

    let shell = ShellBackend::new();
    let slurm = SlurmBackend::new(Vec::new());
    let pbs = PbsBackend::new(Vec::new());
    let backend: &dyn SchedulerBackend = match config.batch.scheduler {
        SchedulerKind::Shell => &shell,
        SchedulerKind::Slurm => &slurm,
        SchedulerKind::Pbs => &pbs,
        SchedulerKind::None => unreachable!("caller only takes the batch path for an external scheduler"),
    };

    let executor_config = BatchExecutorConfig {
        session_timeout: config.session_timeout,
    };
    let executor = BatchExecutor::new(queue, case_table, store, backend, work_root, config.batch.clone(), executor_config)
        .with_reporter(reporter);

    Ok(executor.run())
}

/// Blocks the calling (synchronous) CLI entry point on the executor's async run loop.
///
/// `Executor::run` is `tokio`-async because the dispatcher needs `tokio::select!` over worker
/// completions and the session clock (§4.6); the rest of the CLI shell stays ordinary
/// synchronous code, the way a thin front end over an async core usually does.
fn futures_run(executor: Executor<'_>) -> canary_runner::executor::ExecutorReport {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to start the tokio runtime")
        .block_on(executor.run())
}

fn describe_filters(args: &RunArgs) -> String {
    let mut parts = Vec::new();
    if !args.selection.pathspec.is_empty() {
        parts.push(args.selection.pathspec.join(" "));
    }
    if let Some(k) = &args.selection.keyword {
        parts.push(format!("-k {k}"));
    }
    if let Some(p) = &args.selection.parameter {
        parts.push(format!("-p {p}"));
    }
    if let Some(owner) = &args.selection.owner {
        parts.push(format!("--owner {owner}"));
    }
    if let Some(grep) = &args.selection.grep {
        parts.push(format!("--grep {grep}"));
    }
    parts.join(" ")
}

fn write_results(
    layout: &SessionLayout,
    timestamp: &str,
    exit_code: u8,
    elapsed: Duration,
    stopped_early: bool,
) -> Result<(), CliError> {
    let payload = serde_json::json!({
        "exit_code": exit_code,
        "elapsed_secs": elapsed.as_secs_f64(),
        "stopped_early": stopped_early,
    });
    let bytes = serde_json::to_vec_pretty(&payload)?;
    let path = layout.results_json_path(timestamp);
    std::fs::write(&path, bytes).map_err(|source| canary_runner::errors::SessionError::Write { path, source })?;
    Ok(())
}

/// Points `refs/latest` and `HEAD` at the invocation that just finished, the way a real VCS
/// points a branch ref at the commit it just made; these are plain text pointer files rather
/// than symlinks so the layout stays portable across platforms that don't support them.
fn point_refs_at(layout: &SessionLayout, timestamp: &str) -> Result<(), CliError> {
    let work_dir = layout.work_dir(timestamp);
    for path in [layout.refs_latest_path(), layout.head_path()] {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| canary_runner::errors::SessionError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&path, work_dir.as_str())
            .map_err(|source| canary_runner::errors::SessionError::Write { path, source })?;
    }
    Ok(())
}
