// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

pub mod client;
pub mod commands;
pub mod config;
pub mod connect;
pub mod constants;
pub mod error;
pub mod qos;
pub mod test_env;
pub mod tls;

pub use error::{ArrayError, Error, Result};

/// Gets the path of the configuration file, unless one was given on the command line.
pub fn default_config_path() -> String {
    match std::env::var("DSWARE_CONFIG") {
        Ok(conf) => conf,
        Err(_) => "/etc/dsware/dsware.conf".to_string(),
    }
}

/// Name of the environment variable holding the `env_logger` filter for the binaries.
pub const LOG_ENV: &str = "DSWARE_LOG";
