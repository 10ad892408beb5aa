// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Parser;

use dsware_lib::{
    self,
    commands::{self, Cli},
};

/// The dsware binary attaches and detaches volumes and manages their QoS from the command line.
fn main() {
    let args = Cli::parse();

    let default_level = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(dsware_lib::LOG_ENV, default_level),
    )
    .init();

    if commands::main(&args).is_err() {
        std::process::exit(1);
    }
}
