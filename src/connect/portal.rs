// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Choosing the iSCSI target portals a host should log into.
//!
//! Sources are consulted in a fixed order and the first configured one decides:
//! 1. the array's own link balancing across storage pools,
//! 2. manager groups, keeping each host on the group it was first assigned to,
//! 3. a fixed list of target IPs,
//! 4. manager groups picked at random, moving on to another group when one has no usable portal.

use std::net::IpAddr;

use {
    log::{debug, info, warn},
    rand::Rng,
};

use super::affinity::AffinityStore;
use crate::{
    client::{ArrayClient, Portal},
    config::{Config, IpFamily},
    error::{Error, Result},
};

pub struct PortalDiscovery<'a> {
    client: &'a dyn ArrayClient,
    config: &'a Config,
    affinity: &'a AffinityStore,
}

impl<'a> PortalDiscovery<'a> {
    pub fn new(
        client: &'a dyn ArrayClient,
        config: &'a Config,
        affinity: &'a AffinityStore,
    ) -> Self {
        Self {
            client,
            config,
            affinity,
        }
    }

    /// Portals for `host`, never empty on success.
    pub fn discover(&self, host: &str) -> Result<Vec<Portal>> {
        let iscsi = &self.config.iscsi;

        if let Some(balance) = &iscsi.link_balance {
            let pools = self.config.link_balance_pools();
            let links = self.client.get_iscsi_links(&pools, balance.link_count)?;
            let portals = usable(links, iscsi.ip_family);
            if portals.is_empty() {
                return Err(Error::NoTargetPortal(format!(
                    "link balancing over pools {pools:?} returned no usable link"
                )));
            }
            return Ok(portals);
        }

        if !iscsi.manager_groups.is_empty() && iscsi.group_affinity {
            return self.affine_group(host);
        }

        if !iscsi.target_ips.is_empty() {
            let portals = self.fixed_targets()?;
            if portals.is_empty() {
                return Err(Error::NoTargetPortal(format!(
                    "none of the target IPs {:?} is a usable portal",
                    iscsi.target_ips
                )));
            }
            return Ok(portals);
        }

        if !iscsi.manager_groups.is_empty() {
            return self.random_group();
        }

        Err(Error::Config(
            "no iSCSI target source configured: set link_balance, manager_groups or target_ips"
                .to_string(),
        ))
    }

    /// Usable portals of the nodes managed from the IPs in group `index`. A manager that cannot be
    /// queried is skipped so that the rest of the group can still serve.
    fn group_portals(&self, index: usize) -> Vec<Portal> {
        let mut portals = Vec::new();
        for manager in &self.config.iscsi.manager_groups[index] {
            match self.client.get_target_port(manager) {
                Ok(found) => portals.extend(found),
                Err(e) => warn!("could not query target ports of manager {manager}: {e}"),
            }
        }
        usable(portals, self.config.iscsi.ip_family)
    }

    fn affine_group(&self, host: &str) -> Result<Vec<Portal>> {
        let count = self.config.iscsi.manager_groups.len();
        let mut tried = vec![false; count];

        if let Some(index) = self.affinity.get(host).filter(|index| *index < count) {
            let portals = self.group_portals(index);
            if !portals.is_empty() {
                debug!("host {host} stays on manager group {index}");
                return Ok(portals);
            }
            info!("manager group {index} of host {host} has no usable portal, reassigning");
            tried[index] = true;
        }

        let loads = self.affinity.group_loads(count);
        while let Some(index) = least_loaded(&loads, &tried) {
            tried[index] = true;
            let portals = self.group_portals(index);
            if !portals.is_empty() {
                info!("host {host} assigned to manager group {index}");
                self.affinity.assign(host, index);
                return Ok(portals);
            }
        }

        Err(Error::NoTargetPortal(format!(
            "none of the {count} manager groups has a usable portal"
        )))
    }

    fn fixed_targets(&self) -> Result<Vec<Portal>> {
        let mut portals = Vec::new();
        for target in &self.config.iscsi.target_ips {
            let ip: IpAddr = target
                .parse()
                .map_err(|e| Error::Config(format!("target IP \"{target}\" is invalid: {e}")))?;
            let found = self.client.get_target_port(target)?;
            // A node serves several portals; only the configured address is wanted.
            portals.extend(found.into_iter().filter(|p| p.ip == ip));
        }
        Ok(usable(portals, self.config.iscsi.ip_family))
    }

    fn random_group(&self) -> Result<Vec<Portal>> {
        let count = self.config.iscsi.manager_groups.len();
        let mut untried: Vec<usize> = (0..count).collect();
        let mut rng = rand::rng();

        while !untried.is_empty() {
            let pick = rng.random_range(0..untried.len());
            let index = untried.swap_remove(pick);
            let portals = self.group_portals(index);
            if !portals.is_empty() {
                debug!("using manager group {index}");
                return Ok(portals);
            }
            info!("manager group {index} has no usable portal, trying another group");
        }

        Err(Error::NoTargetPortal(format!(
            "none of the {count} manager groups has a usable portal"
        )))
    }
}

/// Active portals of the wanted address family, without duplicates, in the order given.
pub fn usable(portals: Vec<Portal>, family: IpFamily) -> Vec<Portal> {
    let mut kept: Vec<Portal> = Vec::with_capacity(portals.len());
    for portal in portals {
        if portal.active && family.accepts(&portal.ip) && !kept.contains(&portal) {
            kept.push(portal);
        }
    }
    kept
}

/// The untried group with the fewest hosts, lowest index first on ties.
fn least_loaded(loads: &[usize], tried: &[bool]) -> Option<usize> {
    (0..loads.len())
        .filter(|i| !tried[*i])
        .min_by_key(|i| (loads[*i], *i))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portal(address: &str, active: bool) -> Portal {
        Portal::parse(address, "iqn.2025-01.com.example:target", active).unwrap()
    }

    #[test]
    fn filtering() {
        let portals = vec![
            portal("10.0.0.1", true),
            portal("10.0.0.2", false),
            portal("fd00::1", true),
            portal("10.0.0.1", true),
        ];
        assert_eq!(
            usable(portals.clone(), IpFamily::Ipv4),
            vec![portal("10.0.0.1", true)]
        );
        assert_eq!(
            usable(portals.clone(), IpFamily::Ipv6),
            vec![portal("fd00::1", true)]
        );
        assert_eq!(usable(portals, IpFamily::Dual).len(), 2);
    }

    #[test]
    fn least_loaded_group() {
        assert_eq!(least_loaded(&[2, 1, 1], &[false; 3]), Some(1));
        assert_eq!(least_loaded(&[2, 1, 1], &[false, true, false]), Some(2));
        assert_eq!(least_loaded(&[0, 0], &[true, true]), None);
    }
}
