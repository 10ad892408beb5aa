// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Args;

use crate::{
    commands::{array_client, load_config, Cli, Handle, HandledResult},
    connect::{Connector, Orchestrator},
    qos::parse_pairs,
};

#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Volume to attach
    #[arg()]
    volume: String,

    /// Compute host the volume is attached to
    #[arg(long)]
    host: String,

    /// iSCSI initiator name (IQN) of the host
    #[arg(long)]
    initiator: Option<String>,

    /// Report every target portal instead of only the first
    #[arg(long)]
    multipath: bool,

    /// QoS settings for the volume, as key=value
    #[arg(long, num_args = 1..)]
    qos: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DisconnectArgs {
    /// Volume to detach
    #[arg()]
    volume: String,

    /// Compute host to detach from; defaults to the only host the volume is mapped to
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    initiator: Option<String>,
}

fn orchestrator(cli: &Cli) -> HandledResult<Orchestrator> {
    let config = load_config(cli)?;
    let client = array_client(&config)?;
    Orchestrator::new(client, config).handle_err(|e| eprintln!("{e}"))
}

pub fn connect(cli: &Cli, args: &ConnectArgs) -> HandledResult<()> {
    let qos = parse_pairs(&args.qos).handle_err(|e| eprintln!("{e}"))?;
    let orchestrator = orchestrator(cli)?;

    let connector = Connector {
        host: Some(args.host.clone()),
        initiator: args.initiator.clone(),
        multipath: args.multipath,
    };
    let properties = orchestrator
        .establish(&args.volume, &connector, Some(&qos))
        .handle_err(|e| eprintln!("Could not attach '{}': {e}", args.volume))?;

    let json = serde_json::to_string_pretty(&properties)
        .handle_err(|e| eprintln!("Could not encode connection properties: {e}"))?;
    println!("{json}");
    Ok(())
}

pub fn disconnect(cli: &Cli, args: &DisconnectArgs) -> HandledResult<()> {
    let orchestrator = orchestrator(cli)?;

    let connector = Connector {
        host: args.host.clone(),
        initiator: args.initiator.clone(),
        multipath: false,
    };
    orchestrator
        .teardown(&args.volume, &connector)
        .handle_err(|e| eprintln!("Could not detach '{}': {e}", args.volume))
}
