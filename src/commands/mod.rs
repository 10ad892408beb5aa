// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

pub mod connect;
pub mod qos;
pub mod validate;

use std::sync::Arc;

use {
    connect::{ConnectArgs, DisconnectArgs},
    qos::{QosArgs, UnsetQosArgs},
};

use clap::{Parser, Subcommand};

use crate::{client::RestClient, config::Config};

/// An error that was already reported to the user. Commands report failures where they happen
/// (usually to stderr) and pass a `HandledError` up, so that the binary only has to turn it into
/// a nonzero exit status.
#[derive(Debug, PartialEq)]
pub struct HandledError {}

pub type HandledResult<T> = std::result::Result<T, HandledError>;

pub trait Handle<T, F> {
    fn handle_err(self, handler: F) -> HandledResult<T>;
}

impl<T, E, F: FnOnce(E)> Handle<T, F> for std::result::Result<T, E> {
    /// Report the error with `handler` and mark it as handled.
    fn handle_err(self, handler: F) -> HandledResult<T> {
        self.map_err(|e| {
            handler(e);
            HandledError {}
        })
    }
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check the configuration file and print a summary of it
    Validate,
    /// Attach a volume to a host and print its iSCSI connection properties
    Connect(ConnectArgs),
    /// Detach a volume from a host
    Disconnect(DisconnectArgs),
    /// Normalize QoS settings, optionally applying them to a volume
    Qos(QosArgs),
    /// Remove a volume's QoS policy
    UnsetQos(UnsetQosArgs),
}

pub fn main(cli: &Cli) -> HandledResult<()> {
    match &cli.command {
        Commands::Validate => validate::validate(cli),
        Commands::Connect(args) => connect::connect(cli, args),
        Commands::Disconnect(args) => connect::disconnect(cli, args),
        Commands::Qos(args) => qos::qos(cli, args),
        Commands::UnsetQos(args) => qos::unset_qos(cli, args),
    }
}

/// Load the configuration named on the command line, or the default one.
fn load_config(cli: &Cli) -> HandledResult<Arc<Config>> {
    let config = Config::load(cli.config.as_deref()).handle_err(|e| eprintln!("{e}"))?;
    Ok(Arc::new(config))
}

fn array_client(config: &Config) -> HandledResult<Arc<RestClient>> {
    let client = RestClient::new(&config.array)
        .handle_err(|e| eprintln!("Could not set up the array client: {e}"))?;
    Ok(Arc::new(client))
}
