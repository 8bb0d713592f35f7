// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Initializes the process-wide `tracing` subscriber from the CLI's verbosity flags, the way
//! `cargo-nextest`'s `output.rs`/`dispatch.rs` build a fmt layer from `-v`. Library crates never
//! install a subscriber themselves, so this is the one place in the workspace that does.

use tracing::Level;

/// `-v` levels map to `warn` (default) through `trace` (`-vvv` and beyond).
pub fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .init();
}
