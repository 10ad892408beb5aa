// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! The storage array management API, as seen by the workflows.
//!
//! [`ArrayClient`] is the seam between the connection / QoS workflows and the array. The
//! production implementation is [`rest::RestClient`]; tests use `test_env::FakeArray`.

use std::{
    fmt,
    net::{IpAddr, SocketAddr},
};

use serde::{Deserialize, Serialize};

use crate::{error::ArrayError, qos::QosParams};

pub mod rest;

pub use rest::RestClient;

pub type ArrayResult<T> = std::result::Result<T, ArrayError>;

/// Default iSCSI port, used when the array reports a portal without one.
pub const ISCSI_PORT: u16 = 3260;

/// A host object as listed by the array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    pub name: String,
    /// The host group the host belongs to, if any.
    pub host_group: Option<String>,
}

/// A volume mapped to a host, with the LUN number the host sees it under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostLun {
    pub volume: String,
    pub lun_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Portal {
    pub ip: IpAddr,
    pub port: u16,
    pub iqn: String,
    pub active: bool,
}

impl Portal {
    /// Build a portal from the array's "address" field, which may be a bare IP, `ip:port` or
    /// `[ipv6]:port`.
    pub fn parse(address: &str, iqn: &str, active: bool) -> Option<Self> {
        let (ip, port) = match address.parse::<SocketAddr>() {
            Ok(addr) => (addr.ip(), addr.port()),
            Err(_) => (
                address.trim_matches(|c| c == '[' || c == ']').parse().ok()?,
                ISCSI_PORT,
            ),
        };
        Some(Self {
            ip,
            port,
            iqn: iqn.to_string(),
            active,
        })
    }
}

impl fmt::Display for Portal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", SocketAddr::new(self.ip, self.port))
    }
}

/// The array's local time zone.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeZoneInfo {
    /// Zone name as reported by the array, e.g. "Asia/Shanghai".
    pub name: String,
    /// Declared standard offset from UTC, in seconds east of UTC.
    pub utc_offset: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeConfig {
    /// Whether the array follows daylight saving time for its zone.
    pub dst_enabled: bool,
}

/// Every management call the workflows make. All calls are blocking and bounded by the client's
/// timeouts.
pub trait ArrayClient: Send + Sync {
    fn create_host(&self, host: &str) -> ArrayResult<()>;
    fn delete_host(&self, host: &str) -> ArrayResult<()>;
    fn get_all_host(&self) -> ArrayResult<Vec<HostInfo>>;
    /// LUNs mapped to `host`. Fails with `HOST_NOT_EXIST` for an unknown host.
    fn get_host_lun(&self, host: &str) -> ArrayResult<Vec<HostLun>>;
    /// Names of the hosts `volume` is mapped to.
    fn get_hosts_by_volume(&self, volume: &str) -> ArrayResult<Vec<String>>;
    fn map_volume_to_host(&self, host: &str, volume: &str) -> ArrayResult<()>;
    fn unmap_volume_from_host(&self, host: &str, volume: &str) -> ArrayResult<()>;

    fn create_hostgroup(&self, group: &str) -> ArrayResult<()>;
    fn delete_hostgroup(&self, group: &str) -> ArrayResult<()>;
    fn add_host_to_hostgroup(&self, host: &str, group: &str) -> ArrayResult<()>;
    fn remove_host_from_hostgroup(&self, host: &str, group: &str) -> ArrayResult<()>;
    /// Members of `group`. Fails with `HOSTGROUP_NOT_EXIST` for an unknown group.
    fn get_host_in_hostgroup(&self, group: &str) -> ArrayResult<Vec<String>>;

    /// Whether the initiator is registered on the array.
    fn get_initiator(&self, iqn: &str) -> ArrayResult<bool>;
    fn add_initiator_to_array(&self, iqn: &str) -> ArrayResult<()>;
    fn remove_initiator_from_array(&self, iqn: &str) -> ArrayResult<()>;
    fn add_initiator_to_host(&self, host: &str, iqn: &str) -> ArrayResult<()>;
    fn delete_initiator_from_host(&self, host: &str, iqn: &str) -> ArrayResult<()>;
    /// Initiators associated with `host`.
    fn get_associate_initiator_by_host_name(&self, host: &str) -> ArrayResult<Vec<String>>;
    /// Hosts the initiator is associated with.
    fn get_host_associate_initiator(&self, iqn: &str) -> ArrayResult<Vec<String>>;

    /// iSCSI portals served by the node whose manager address is `manager_ip`.
    fn get_target_port(&self, manager_ip: &str) -> ArrayResult<Vec<Portal>>;
    /// Ask the array to pick `link_count` balanced portals across `pools`.
    fn get_iscsi_links(&self, pools: &[u32], link_count: u32) -> ArrayResult<Vec<Portal>>;

    fn get_system_time_zone(&self) -> ArrayResult<TimeZoneInfo>;
    fn get_time_config(&self) -> ArrayResult<TimeConfig>;
    fn get_fsm_version(&self) -> ArrayResult<String>;

    fn create_qos(&self, name: &str, params: &QosParams) -> ArrayResult<()>;
    fn modify_qos(&self, name: &str, params: &QosParams) -> ArrayResult<()>;
    fn delete_qos(&self, name: &str) -> ArrayResult<()>;
    fn associate_qos_with_volume(&self, volume: &str, name: &str) -> ArrayResult<()>;
    fn disassociate_qos_with_volume(&self, volume: &str, name: &str) -> ArrayResult<()>;
    fn get_qos_by_volume(&self, volume: &str) -> ArrayResult<Option<String>>;
    fn get_volumes_by_qos(&self, name: &str) -> ArrayResult<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portal_addresses() {
        let p = Portal::parse("192.168.1.10:3261", "iqn.a", true).unwrap();
        assert_eq!(p.port, 3261);
        assert_eq!(p.to_string(), "192.168.1.10:3261");

        let p = Portal::parse("192.168.1.10", "iqn.a", true).unwrap();
        assert_eq!(p.port, ISCSI_PORT);

        let p = Portal::parse("[fd00::5]:3260", "iqn.a", true).unwrap();
        assert!(p.ip.is_ipv6());
        assert_eq!(p.to_string(), "[fd00::5]:3260");

        let p = Portal::parse("fd00::5", "iqn.a", false).unwrap();
        assert!(p.ip.is_ipv6());
        assert!(!p.active);

        assert!(Portal::parse("not-an-ip", "iqn.a", true).is_none());
    }
}
