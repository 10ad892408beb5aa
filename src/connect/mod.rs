// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Attaching volumes to compute hosts over iSCSI, and detaching them again.
//!
//! An attach makes sure the array knows the host, its host group and its initiator, maps the
//! volume to the host and works out which target portals the host should log into. A detach
//! removes the mapping and, once the host serves no other volume, everything the attach set up.

pub mod affinity;
pub mod attach;
pub mod detach;
pub mod pipeline;
pub mod portal;

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, PoisonError},
};

use {
    log::{debug, info},
    serde::Serialize,
    sha2::{Digest, Sha256},
};

use crate::{
    client::ArrayClient,
    config::Config,
    constants::{HOST_GROUP_PREFIX, MAX_NAME_LENGTH},
    error::{Error, Result},
    qos::QosSpecBuilder,
};

use {affinity::AffinityStore, attach::ConnectContext, detach::DetachContext};

/// What the caller knows about the compute host a volume is attached to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Connector {
    pub host: Option<String>,
    /// iSCSI initiator name (IQN) of the host.
    pub initiator: Option<String>,
    pub multipath: bool,
}

/// Connection properties handed to the initiator side.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IscsiProperties {
    Multipath {
        target_luns: Vec<u32>,
        target_iqns: Vec<String>,
        target_portals: Vec<String>,
    },
    Single {
        target_lun: u32,
        target_iqn: String,
        target_portal: String,
    },
}

/// Array object names are limited in length; longer names are replaced by a digest.
pub fn encode_name(name: &str) -> String {
    if name.len() <= MAX_NAME_LENGTH {
        return name.to_string();
    }
    let digest = Sha256::digest(name.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..MAX_NAME_LENGTH].to_string()
}

pub fn encode_host_name(host: &str) -> String {
    encode_name(host)
}

/// Name of the host group created for `host` (an already encoded host name).
pub fn host_group_name(host: &str) -> String {
    encode_name(&format!("{HOST_GROUP_PREFIX}{host}"))
}

/// One lock per host name. Holding a host's lock serializes every attach and detach touching
/// that host; different hosts do not contend.
#[derive(Debug, Default)]
pub struct HostLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl HostLocks {
    pub fn lock_for(&self, host: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(host.to_string()).or_default().clone()
    }

    /// Drop the lock of a host that no longer exists, unless someone still holds or waits on it.
    pub fn release(&self, host: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(host)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(host);
        }
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct Orchestrator {
    client: Arc<dyn ArrayClient>,
    config: Arc<Config>,
    locks: HostLocks,
    affinity: AffinityStore,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn ArrayClient>, config: Arc<Config>) -> Result<Self> {
        let affinity = match &config.iscsi.affinity_file {
            Some(path) => AffinityStore::open(path)?,
            None => AffinityStore::in_memory(),
        };
        Ok(Self {
            client,
            config,
            locks: HostLocks::default(),
            affinity,
        })
    }

    pub fn affinity(&self) -> &AffinityStore {
        &self.affinity
    }

    pub fn host_locks(&self) -> &HostLocks {
        &self.locks
    }

    /// The array host name for `connector`. Without a connector host, the host the volume is
    /// currently mapped to is used, if there is exactly one.
    fn resolve_host(&self, volume: &str, connector: &Connector) -> Result<Option<String>> {
        if let Some(host) = &connector.host {
            if host.is_empty() {
                return Err(Error::validation("connector host name is empty"));
            }
            return Ok(Some(encode_host_name(host)));
        }

        let mut hosts = self.client.get_hosts_by_volume(volume)?;
        match hosts.len() {
            0 => Ok(None),
            1 => Ok(hosts.pop()),
            _ => Err(Error::AmbiguousHost {
                volume: volume.to_string(),
                hosts,
            }),
        }
    }

    /// Attach `volume` to the connector's host and return the connection properties. When
    /// `qos` is given, the volume's QoS policy is created or updated from it first.
    pub fn establish(
        &self,
        volume: &str,
        connector: &Connector,
        qos: Option<&BTreeMap<String, String>>,
    ) -> Result<IscsiProperties> {
        let qos = qos.filter(|raw| !raw.is_empty());
        if let Some(raw) = qos {
            QosSpecBuilder::from_raw(raw)?;
        }
        let Some(host) = self.resolve_host(volume, connector)? else {
            return Err(Error::validation(format!(
                "connector has no host and volume {volume} is not mapped to any host"
            )));
        };

        let lock = self.locks.lock_for(&host);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut ctx = ConnectContext::new(
            self.client.as_ref(),
            &self.config,
            &self.affinity,
            volume,
            host,
            connector,
            qos,
        );
        attach::pipeline().run(&mut ctx)?;
        let properties = ctx.properties(connector.multipath)?;
        info!("volume {volume} attached to host {}", ctx.host);
        Ok(properties)
    }

    /// Detach `volume` from the connector's host, tearing down the host's array objects once it
    /// serves no other volume. Nothing happens when the host is unknown to the array.
    pub fn teardown(&self, volume: &str, connector: &Connector) -> Result<()> {
        let Some(host) = self.resolve_host(volume, connector)? else {
            debug!("volume {volume} is not mapped to any host, nothing to detach");
            return Ok(());
        };

        let lock = self.locks.lock_for(&host);
        let host_gone = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            let mut ctx =
                DetachContext::new(self.client.as_ref(), &self.affinity, volume, host.clone());
            detach::pipeline().run(&mut ctx)?;
            info!("volume {volume} detached from host {host}");
            ctx.host_deleted || ctx.host_info.is_none()
        };
        drop(lock);
        if host_gone {
            self.locks.release(&host);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_are_kept() {
        assert_eq!(encode_host_name("compute-01"), "compute-01");
        assert_eq!(host_group_name("compute-01"), "OpenStack_compute-01");
    }

    #[test]
    fn long_names_are_hashed() {
        let host = "compute-node-with-a-rather-long-fqdn.example.org";
        let encoded = encode_host_name(host);
        assert_eq!(encoded.len(), MAX_NAME_LENGTH);
        assert!(encoded.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(encoded, encode_host_name(host));
        assert_ne!(encoded, encode_host_name("compute-node-with-a-rather-long-fqdn.example.net"));

        // 31 characters of host name leave no room for the group prefix.
        let group = host_group_name(&"a".repeat(MAX_NAME_LENGTH));
        assert_eq!(group.len(), MAX_NAME_LENGTH);
        assert!(!group.starts_with(HOST_GROUP_PREFIX));
    }

    #[test]
    fn same_host_same_lock() {
        let locks = HostLocks::default();
        assert!(Arc::ptr_eq(&locks.lock_for("a"), &locks.lock_for("a")));
        assert!(!Arc::ptr_eq(&locks.lock_for("a"), &locks.lock_for("b")));
    }

    #[test]
    fn held_lock_is_not_released() {
        let locks = HostLocks::default();
        let held = locks.lock_for("a");
        locks.lock_for("b");

        locks.release("a");
        locks.release("b");
        assert_eq!(locks.len(), 1);

        drop(held);
        locks.release("a");
        assert!(locks.is_empty());
    }

    #[test]
    fn property_shapes() {
        let single = IscsiProperties::Single {
            target_lun: 3,
            target_iqn: "iqn.t".into(),
            target_portal: "10.0.0.1:3260".into(),
        };
        assert_eq!(
            serde_json::to_value(&single).unwrap(),
            serde_json::json!({
                "target_lun": 3,
                "target_iqn": "iqn.t",
                "target_portal": "10.0.0.1:3260",
            })
        );
    }
}
