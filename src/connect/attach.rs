// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! The steps of attaching a volume to a host.

use std::collections::BTreeMap;

use log::{debug, info, warn};

use super::{
    affinity::AffinityStore,
    host_group_name,
    pipeline::{Pipeline, Step},
    portal::PortalDiscovery,
    Connector, IscsiProperties,
};
use crate::{
    client::{ArrayClient, Portal},
    config::Config,
    constants::{
        HOSTGROUP_ALREADY_EXIST, HOSTGROUP_NOT_EXIST, HOST_ALREADY_EXIST,
        HOST_ALREADY_IN_HOSTGROUP, HOST_NOT_EXIST, INITIATOR_ALREADY_EXIST,
        INITIATOR_ALREADY_IN_HOST, LUN_ALREADY_IN_HOST,
    },
    error::{Error, Result},
    qos::{QosAttachment, QosManager},
};

pub struct ConnectContext<'a> {
    client: &'a dyn ArrayClient,
    discovery: PortalDiscovery<'a>,
    pub volume: &'a str,
    pub host: String,
    pub group: String,
    pub initiator: Option<String>,
    pub qos: Option<&'a BTreeMap<String, String>>,

    /// The volume was already mapped to the host when the attach started, so the host and its
    /// initiator are known to be set up.
    pub already_mapped: bool,
    pub group_members: Vec<String>,
    /// The mapping was made by this attach, and is undone if a later step fails.
    pub created_mapping: bool,
    pub lun_id: Option<u32>,
    pub portals: Vec<Portal>,
    pub qos_attachment: Option<QosAttachment>,
}

impl<'a> ConnectContext<'a> {
    pub fn new(
        client: &'a dyn ArrayClient,
        config: &'a Config,
        affinity: &'a AffinityStore,
        volume: &'a str,
        host: String,
        connector: &Connector,
        qos: Option<&'a BTreeMap<String, String>>,
    ) -> Self {
        Self {
            client,
            discovery: PortalDiscovery::new(client, config, affinity),
            volume,
            group: host_group_name(&host),
            host,
            initiator: connector.initiator.clone().filter(|iqn| !iqn.is_empty()),
            qos,
            already_mapped: false,
            group_members: Vec::new(),
            created_mapping: false,
            lun_id: None,
            portals: Vec::new(),
            qos_attachment: None,
        }
    }

    /// Connection properties from the LUN and portals found by the pipeline.
    pub fn properties(&self, multipath: bool) -> Result<IscsiProperties> {
        let Some(lun_id) = self.lun_id else {
            return Err(Error::validation(format!(
                "no LUN recorded for {} on {}",
                self.volume, self.host
            )));
        };
        let Some(first) = self.portals.first() else {
            return Err(Error::NoTargetPortal(format!("no portal for host {}", self.host)));
        };

        if multipath {
            Ok(IscsiProperties::Multipath {
                target_luns: vec![lun_id; self.portals.len()],
                target_iqns: self.portals.iter().map(|p| p.iqn.clone()).collect(),
                target_portals: self.portals.iter().map(|p| p.to_string()).collect(),
            })
        } else {
            Ok(IscsiProperties::Single {
                target_lun: lun_id,
                target_iqn: first.iqn.clone(),
                target_portal: first.to_string(),
            })
        }
    }

    fn lun_of_volume(&self) -> Result<Option<u32>> {
        let luns = self.client.get_host_lun(&self.host)?;
        Ok(luns
            .into_iter()
            .find(|lun| lun.volume == self.volume)
            .map(|lun| lun.lun_id))
    }
}

pub fn pipeline<'a>() -> Pipeline<ConnectContext<'a>> {
    Pipeline::new("attach")
        .step(CheckMapped)
        .step(EnsureHost)
        .step(EnsureHostGroup)
        .step(JoinHostGroup)
        .step(EnsureInitiator)
        .step(AssociateInitiator)
        .step(AttachQos)
        .step(MapVolume)
        .step(DiscoverPortals)
}

struct CheckMapped;

impl<'a> Step<ConnectContext<'a>> for CheckMapped {
    fn name(&self) -> &'static str {
        "check-mapped"
    }

    fn execute(&self, ctx: &mut ConnectContext<'a>) -> Result<()> {
        ctx.already_mapped = match ctx.lun_of_volume() {
            Ok(lun) => lun.is_some(),
            Err(Error::Array(e)) if e.is_idempotent_conflict(&[HOST_NOT_EXIST]) => false,
            Err(e) => return Err(e),
        };
        if ctx.already_mapped {
            debug!("{} is already mapped to {}", ctx.volume, ctx.host);
        }
        Ok(())
    }
}

struct EnsureHost;

impl<'a> Step<ConnectContext<'a>> for EnsureHost {
    fn name(&self) -> &'static str {
        "ensure-host"
    }

    fn execute(&self, ctx: &mut ConnectContext<'a>) -> Result<()> {
        if ctx.already_mapped {
            return Ok(());
        }
        let hosts = ctx.client.get_all_host()?;
        if hosts.iter().any(|h| h.name == ctx.host) {
            return Ok(());
        }
        match ctx.client.create_host(&ctx.host) {
            Ok(()) => info!("created host {}", ctx.host),
            Err(e) if e.is_idempotent_conflict(&[HOST_ALREADY_EXIST]) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

struct EnsureHostGroup;

impl<'a> Step<ConnectContext<'a>> for EnsureHostGroup {
    fn name(&self) -> &'static str {
        "ensure-host-group"
    }

    fn execute(&self, ctx: &mut ConnectContext<'a>) -> Result<()> {
        if ctx.already_mapped {
            return Ok(());
        }
        ctx.group_members = match ctx.client.get_host_in_hostgroup(&ctx.group) {
            Ok(members) => members,
            Err(e) if e.is_idempotent_conflict(&[HOSTGROUP_NOT_EXIST]) => {
                match ctx.client.create_hostgroup(&ctx.group) {
                    Ok(()) => info!("created host group {}", ctx.group),
                    Err(e) if e.is_idempotent_conflict(&[HOSTGROUP_ALREADY_EXIST]) => {}
                    Err(e) => return Err(e.into()),
                }
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(())
    }
}

struct JoinHostGroup;

impl<'a> Step<ConnectContext<'a>> for JoinHostGroup {
    fn name(&self) -> &'static str {
        "join-host-group"
    }

    fn execute(&self, ctx: &mut ConnectContext<'a>) -> Result<()> {
        if ctx.already_mapped || ctx.group_members.contains(&ctx.host) {
            return Ok(());
        }
        match ctx.client.add_host_to_hostgroup(&ctx.host, &ctx.group) {
            Ok(()) => info!("added host {} to host group {}", ctx.host, ctx.group),
            Err(e) if e.is_idempotent_conflict(&[HOST_ALREADY_IN_HOSTGROUP]) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

struct EnsureInitiator;

impl<'a> Step<ConnectContext<'a>> for EnsureInitiator {
    fn name(&self) -> &'static str {
        "ensure-initiator"
    }

    fn execute(&self, ctx: &mut ConnectContext<'a>) -> Result<()> {
        if ctx.already_mapped {
            return Ok(());
        }
        let Some(iqn) = &ctx.initiator else {
            warn!("connector for host {} has no initiator name", ctx.host);
            return Ok(());
        };
        if ctx.client.get_initiator(iqn)? {
            return Ok(());
        }
        match ctx.client.add_initiator_to_array(iqn) {
            Ok(()) => info!("registered initiator {iqn}"),
            Err(e) if e.is_idempotent_conflict(&[INITIATOR_ALREADY_EXIST]) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

struct AssociateInitiator;

impl<'a> Step<ConnectContext<'a>> for AssociateInitiator {
    fn name(&self) -> &'static str {
        "associate-initiator"
    }

    fn execute(&self, ctx: &mut ConnectContext<'a>) -> Result<()> {
        if ctx.already_mapped {
            return Ok(());
        }
        let Some(iqn) = &ctx.initiator else {
            return Ok(());
        };
        let associated = ctx.client.get_associate_initiator_by_host_name(&ctx.host)?;
        if associated.contains(iqn) {
            return Ok(());
        }
        match ctx.client.add_initiator_to_host(&ctx.host, iqn) {
            Ok(()) => info!("associated initiator {iqn} with host {}", ctx.host),
            Err(e) if e.is_idempotent_conflict(&[INITIATOR_ALREADY_IN_HOST]) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

struct AttachQos;

impl<'a> Step<ConnectContext<'a>> for AttachQos {
    fn name(&self) -> &'static str {
        "attach-qos"
    }

    fn execute(&self, ctx: &mut ConnectContext<'a>) -> Result<()> {
        let Some(raw) = ctx.qos else {
            return Ok(());
        };
        let attachment = QosManager::new(ctx.client).update(ctx.volume, raw)?;
        ctx.qos_attachment = Some(attachment);
        Ok(())
    }

    /// Only a policy made by this attach is removed; a pre-existing one keeps its new limits.
    fn rollback(&self, ctx: &mut ConnectContext<'a>) -> Result<()> {
        let Some(attachment) = ctx.qos_attachment.take() else {
            return Ok(());
        };
        if attachment.created {
            ctx.client.disassociate_qos_with_volume(ctx.volume, &attachment.name)?;
            ctx.client.delete_qos(&attachment.name)?;
            info!("removed QoS policy {} after failed attach", attachment.name);
        }
        Ok(())
    }
}

struct MapVolume;

impl MapVolume {
    fn unmap(ctx: &mut ConnectContext<'_>) -> Result<()> {
        ctx.client.unmap_volume_from_host(&ctx.host, ctx.volume)?;
        ctx.created_mapping = false;
        ctx.lun_id = None;
        info!("unmapped {} from {}", ctx.volume, ctx.host);
        Ok(())
    }
}

impl<'a> Step<ConnectContext<'a>> for MapVolume {
    fn name(&self) -> &'static str {
        "map-volume"
    }

    fn execute(&self, ctx: &mut ConnectContext<'a>) -> Result<()> {
        if let Some(lun_id) = ctx.lun_of_volume()? {
            ctx.lun_id = Some(lun_id);
            return Ok(());
        }

        match ctx.client.map_volume_to_host(&ctx.host, ctx.volume) {
            Ok(()) => {
                ctx.created_mapping = true;
                info!("mapped {} to {}", ctx.volume, ctx.host);
            }
            Err(e) if e.is_idempotent_conflict(&[LUN_ALREADY_IN_HOST]) => {}
            Err(e) => return Err(e.into()),
        }

        // The pipeline only rolls back completed steps, so a failure after mapping is undone here.
        let lun_id = match ctx.lun_of_volume() {
            Ok(Some(lun_id)) => lun_id,
            found => {
                let err = found.err().unwrap_or_else(|| {
                    Error::validation(format!(
                        "array reports no LUN for {} on {} after mapping",
                        ctx.volume, ctx.host
                    ))
                });
                if ctx.created_mapping {
                    if let Err(undo) = Self::unmap(ctx) {
                        warn!("could not unmap {} from {}: {undo}", ctx.volume, ctx.host);
                    }
                }
                return Err(err);
            }
        };
        ctx.lun_id = Some(lun_id);
        Ok(())
    }

    fn rollback(&self, ctx: &mut ConnectContext<'a>) -> Result<()> {
        if ctx.created_mapping {
            Self::unmap(ctx)?;
        }
        Ok(())
    }
}

struct DiscoverPortals;

impl<'a> Step<ConnectContext<'a>> for DiscoverPortals {
    fn name(&self) -> &'static str {
        "discover-portals"
    }

    fn execute(&self, ctx: &mut ConnectContext<'a>) -> Result<()> {
        ctx.portals = ctx.discovery.discover(&ctx.host)?;
        debug!(
            "portals for {}: {}",
            ctx.host,
            ctx.portals
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }
}
