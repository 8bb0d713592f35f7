// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! CLI argument parsing structures (§6): the subcommand and global-option *shape* the core
//! crate's SPEC describes. Filter expressions (`-k`, `-p`, `--grep`) are accepted as opaque
//! strings here and forwarded to the configured [`canary_runner::session::Discoverer`] rather
//! than parsed in-process.

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// A next-generation parallel test orchestrator.
#[derive(Debug, Parser)]
#[command(name = "canary", version, about)]
pub struct CanaryCli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every subcommand.
#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Change to this directory before doing anything else.
    #[arg(short = 'C', long, global = true, value_name = "DIR")]
    pub chdir: Option<Utf8PathBuf>,

    /// A `section:key:value` configuration override; may be repeated.
    #[arg(short = 'c', long = "config", global = true, value_name = "SECTION:KEY:VALUE")]
    pub config_overrides: Vec<String>,

    /// An environment variable injected into every case's environment (`VAR=VAL`); may be
    /// repeated.
    #[arg(short = 'e', long = "env", global = true, value_name = "VAR=VAL")]
    pub env: Vec<String>,

    /// A directory searched for plugin collaborators; may be repeated.
    ///
    /// Named `--plugin-dir` rather than `-p` (unlike the source's global `-p`) because `-p` is
    /// already spoken for by `run`'s parameter-expression filter; see DESIGN.md.
    #[arg(long = "plugin-dir", global = true, value_name = "DIR")]
    pub plugin_dirs: Vec<Utf8PathBuf>,

    /// Increase log verbosity; may be repeated (`-v`, `-vv`, `-vvv`).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print the fully-resolved configuration and invocation before running, for
    /// reproducibility.
    #[arg(long, global = true)]
    pub echo: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Discover (or reuse a cached selection), filter, and execute cases.
    Run(RunArgs),
    /// Discovery-only listing: print the cases a selection would run, without running them.
    Find(FindArgs),
    /// Dump one case's resolved metadata as JSON.
    Describe(DescribeArgs),
    /// Report on a completed (or in-flight) session.
    Status(StatusArgs),
}

/// Filters shared between `run` and `find`: both resolve a selection the same way, one runs it
/// and the other just prints it.
#[derive(Debug, Args, Default)]
pub struct SelectionArgs {
    /// Path(s) to search, and/or `+option` tokens forwarded opaquely to the discoverer.
    pub pathspec: Vec<String>,

    /// Keyword expression forwarded to the discoverer.
    #[arg(short = 'k', long = "keyword")]
    pub keyword: Option<String>,

    /// Parameter expression forwarded to the discoverer.
    #[arg(short = 'p', long = "parameter")]
    pub parameter: Option<String>,

    /// Owner filter forwarded to the discoverer.
    #[arg(long)]
    pub owner: Option<String>,

    /// Regex content-grep filter forwarded to the discoverer.
    #[arg(long = "grep")]
    pub grep: Option<String>,

    /// Reuse a previously tagged selection instead of re-discovering.
    #[arg(long = "reuse-selection", value_name = "TAG")]
    pub reuse_selection: Option<String>,

    /// Tag this selection under `NAME` so a later invocation can reuse it.
    #[arg(long = "tag-selection", value_name = "NAME")]
    pub tag_selection: Option<String>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Path to a `JsonDiscoverer`-compatible file listing cases.
    #[arg(long, value_name = "PATH")]
    pub source: Utf8PathBuf,

    /// Path to the resource pool file (YAML or JSON); defaults to the session config's
    /// `resource_pool_file`.
    #[arg(long, value_name = "PATH")]
    pub resource_pool: Option<Utf8PathBuf>,

    /// Stop admitting new cases as soon as a terminal failure is observed.
    #[arg(long)]
    pub fail_fast: bool,

    /// Print the N slowest cases at the end of the run.
    #[arg(long, value_name = "N")]
    pub durations: Option<usize>,

    /// Multiplies every case's declared timeout before the runner acts on it.
    #[arg(long, value_name = "FACTOR")]
    pub timeout_multiplier: Option<f64>,

    /// Session-wide wall-clock budget, e.g. `30m`, `2h`.
    #[arg(long, value_name = "DURATION")]
    pub session_timeout: Option<String>,

    /// Number of cases the direct queue may run concurrently.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Batch controls: `-b scheduler=slurm|pbs|shell`, `-b workers=N`,
    /// `-b scheme=isolate|sequential`; may be repeated.
    #[arg(short = 'b', long = "batch", value_name = "KEY=VALUE")]
    pub batch: Vec<String>,

    /// Emit one JSON object per line instead of the plain-text reporter.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct FindArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Path to a `JsonDiscoverer`-compatible file listing cases.
    #[arg(long, value_name = "PATH")]
    pub source: Utf8PathBuf,
}

#[derive(Debug, Args)]
pub struct DescribeArgs {
    /// Path to a `JsonDiscoverer`-compatible file listing cases.
    #[arg(long, value_name = "PATH")]
    pub source: Utf8PathBuf,

    /// The case id to describe.
    pub case_id: String,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Which invocation under `.canary/sessions/` to report on; defaults to the most recent
    /// (`refs/latest`).
    #[arg(long)]
    pub session: Option<String>,
}
