// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Entry point for the `canary` binary: parses arguments, wires up logging, dispatches to a
//! subcommand, and maps the result to a process exit code.

mod cli;
mod commands;
mod errors;
mod output;

use clap::Parser;
use cli::{CanaryCli, Command};

fn main() {
    color_eyre::install().ok();
    let cli = CanaryCli::parse();
    output::init_tracing(cli.global.verbose);

    let result = match &cli.command {
        Command::Run(args) => commands::run(&cli.global, args),
        Command::Find(args) => commands::find(&cli.global, args),
        Command::Describe(args) => commands::describe(args),
        Command::Status(args) => commands::status(args),
    };

    match result {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.process_exit_code());
        }
    }
}
