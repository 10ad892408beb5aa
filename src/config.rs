// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Config is the model of the configuration file. It is deserialized once at startup and is
/// read-only afterwards; workflows receive it by reference (usually behind an `Arc`).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub array: ArrayConfig,
    #[serde(default)]
    pub iscsi: IscsiConfig,
    /// Storage pool ids on the array. Used by iSCSI link balancing when it names no pools itself.
    #[serde(default)]
    pub storage_pools: Vec<u32>,
}

/// How to reach and authenticate against the array's management REST API.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ArrayConfig {
    pub rest_url: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_true")]
    pub ssl_verify: bool,
    pub ca_cert: Option<String>,
    /// When both `client_cert` and `client_key` are set, the client authenticates itself with
    /// them (two-way TLS).
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    Ipv4,
    Ipv6,
    #[default]
    Dual,
}

impl IpFamily {
    /// Whether a portal at `ip` may be handed to the initiator.
    pub fn accepts(&self, ip: &IpAddr) -> bool {
        match self {
            IpFamily::Ipv4 => ip.is_ipv4(),
            IpFamily::Ipv6 => ip.is_ipv6(),
            IpFamily::Dual => true,
        }
    }
}

/// Where iSCSI target portals come from. See `connect::portal` for the order in which these are
/// consulted.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct IscsiConfig {
    #[serde(default)]
    pub ip_family: IpFamily,
    #[serde(default)]
    pub target_ips: Vec<String>,
    /// Groups of node-manager IPs; the portals of one group serve one host.
    #[serde(default)]
    pub manager_groups: Vec<Vec<String>>,
    /// Keep each host on the same manager group across calls.
    #[serde(default)]
    pub group_affinity: bool,
    pub affinity_file: Option<String>,
    pub link_balance: Option<LinkBalance>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LinkBalance {
    #[serde(default)]
    pub pools: Vec<u32>,
    #[serde(default = "default_link_count")]
    pub link_count: u32,
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    32
}

fn default_timeout() -> u64 {
    50
}

fn default_link_count() -> u32 {
    1
}

impl Config {
    /// Read and validate the configuration file at `path`, or at the default location.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_string(),
            None => crate::default_config_path(),
        };
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("could not open config file \"{path}\": {e}")))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let array = &self.array;
        if !(array.rest_url.starts_with("https://") || array.rest_url.starts_with("http://")) {
            return Err(Error::Config(format!(
                "rest_url \"{}\" must start with https:// or http://",
                array.rest_url
            )));
        }
        if array.username.is_empty() {
            return Err(Error::Config("username must be set".to_string()));
        }
        if array.connect_timeout_secs == 0 || array.connect_timeout_secs >= array.timeout_secs {
            return Err(Error::Config(format!(
                "connect_timeout_secs ({}) must be non-zero and shorter than timeout_secs ({})",
                array.connect_timeout_secs, array.timeout_secs
            )));
        }
        if array.client_cert.is_some() != array.client_key.is_some() {
            return Err(Error::Config(
                "client_cert and client_key must be given together".to_string(),
            ));
        }

        let iscsi = &self.iscsi;
        if let Some(balance) = &iscsi.link_balance {
            if balance.link_count == 0 {
                return Err(Error::Config("link_balance.link_count must be at least 1".to_string()));
            }
        }
        for (i, group) in iscsi.manager_groups.iter().enumerate() {
            if group.is_empty() {
                return Err(Error::Config(format!("manager group {i} is empty")));
            }
        }
        for ip in iscsi
            .target_ips
            .iter()
            .chain(iscsi.manager_groups.iter().flatten())
        {
            ip.parse::<IpAddr>()
                .map_err(|e| Error::Config(format!("\"{ip}\" is not an IP address: {e}")))?;
        }

        Ok(())
    }

    /// Pools used for link balancing: its own list, or every configured storage pool.
    pub fn link_balance_pools(&self) -> Vec<u32> {
        match &self.iscsi.link_balance {
            Some(balance) if !balance.pools.is_empty() => balance.pools.clone(),
            _ => self.storage_pools.clone(),
        }
    }

    /// One line per setting, for the `validate` command.
    pub fn print_summary(&self) {
        println!("array: {} (user {})", self.array.rest_url, self.array.username);
        println!(
            "tls: verify={} ca={} two-way={}",
            self.array.ssl_verify,
            self.array.ca_cert.as_deref().unwrap_or("<system>"),
            self.array.client_cert.is_some()
        );
        println!(
            "timeouts: connect {}s, request {}s",
            self.array.connect_timeout_secs, self.array.timeout_secs
        );
        println!("ip family: {:?}", self.iscsi.ip_family);
        if let Some(balance) = &self.iscsi.link_balance {
            println!(
                "link balancing: {} links over pools {:?}",
                balance.link_count,
                self.link_balance_pools()
            );
        }
        if !self.iscsi.manager_groups.is_empty() {
            println!(
                "manager groups: {} (affinity {})",
                self.iscsi.manager_groups.len(),
                if self.iscsi.group_affinity { "on" } else { "off" }
            );
        }
        if !self.iscsi.target_ips.is_empty() {
            println!("target ips: {}", self.iscsi.target_ips.join(", "));
        }
    }
}
