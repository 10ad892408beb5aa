// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Args;

use crate::{
    commands::{array_client, load_config, Cli, Handle, HandledResult},
    qos::{get_qos_param, parse_pairs, QosManager},
};

#[derive(Args, Debug, Clone)]
pub struct QosArgs {
    /// QoS settings as key=value, e.g. maxIOPS=1000 scheduleType=2 startTime=08:00
    #[arg(required = true)]
    settings: Vec<String>,

    /// Apply the settings to this volume's policy instead of only printing them
    #[arg(long)]
    volume: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct UnsetQosArgs {
    /// Volume whose policy is removed
    #[arg()]
    volume: String,
}

pub fn qos(cli: &Cli, args: &QosArgs) -> HandledResult<()> {
    let raw = parse_pairs(&args.settings).handle_err(|e| eprintln!("{e}"))?;
    let config = load_config(cli)?;
    let client = array_client(&config)?;

    let params =
        get_qos_param(&raw, client.as_ref()).handle_err(|e| eprintln!("Invalid QoS: {e}"))?;
    let json = serde_json::to_string_pretty(&params)
        .handle_err(|e| eprintln!("Could not encode QoS parameters: {e}"))?;
    println!("{json}");

    if let Some(volume) = &args.volume {
        let attachment = QosManager::new(client.as_ref())
            .update(volume, &raw)
            .handle_err(|e| eprintln!("Could not apply QoS to '{volume}': {e}"))?;
        println!("policy {} applied to {volume}", attachment.name);
    }
    Ok(())
}

pub fn unset_qos(cli: &Cli, args: &UnsetQosArgs) -> HandledResult<()> {
    let config = load_config(cli)?;
    let client = array_client(&config)?;

    QosManager::new(client.as_ref())
        .remove(&args.volume)
        .handle_err(|e| eprintln!("Could not remove QoS of '{}': {e}", args.volume))
}
