// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! The steps of detaching a volume from a host. They have no rollback; a retried detach picks up
//! where a failed one stopped.

use log::{debug, info};

use super::{
    affinity::AffinityStore,
    pipeline::{Pipeline, Step},
};
use crate::{
    client::{ArrayClient, HostInfo},
    constants::{
        HOSTGROUP_NOT_EXIST, HOST_NOT_EXIST, HOST_NOT_IN_HOSTGROUP, INITIATOR_NOT_EXIST,
        INITIATOR_NOT_IN_HOST, LUN_NOT_IN_HOST,
    },
    error::Result,
};

pub struct DetachContext<'a> {
    client: &'a dyn ArrayClient,
    affinity: &'a AffinityStore,
    pub volume: &'a str,
    pub host: String,

    /// The host as the array listed it; `None` once it turned out not to exist.
    pub host_info: Option<HostInfo>,
    /// The host still serves other volumes, so its objects stay.
    pub keep_host: bool,
    pub host_deleted: bool,
}

impl<'a> DetachContext<'a> {
    pub fn new(
        client: &'a dyn ArrayClient,
        affinity: &'a AffinityStore,
        volume: &'a str,
        host: String,
    ) -> Self {
        Self {
            client,
            affinity,
            volume,
            host,
            host_info: None,
            keep_host: false,
            host_deleted: false,
        }
    }

    /// Whether the host's own objects are still to be torn down.
    fn tearing_down_host(&self) -> bool {
        self.host_info.is_some() && !self.keep_host
    }

    fn group(&self) -> Option<&str> {
        self.host_info.as_ref()?.host_group.as_deref()
    }

    fn find_host(&self) -> Result<Option<HostInfo>> {
        let hosts = self.client.get_all_host()?;
        Ok(hosts.into_iter().find(|h| h.name == self.host))
    }
}

pub fn pipeline<'a>() -> Pipeline<DetachContext<'a>> {
    Pipeline::new("detach")
        .step(LocateHost)
        .step(UnmapVolume)
        .step(CheckOtherLuns)
        .step(DetachInitiators)
        .step(LeaveHostGroup)
        .step(DeleteHostGroup)
        .step(DeleteHost)
}

struct LocateHost;

impl<'a> Step<DetachContext<'a>> for LocateHost {
    fn name(&self) -> &'static str {
        "locate-host"
    }

    fn execute(&self, ctx: &mut DetachContext<'a>) -> Result<()> {
        ctx.host_info = ctx.find_host()?;
        if ctx.host_info.is_none() {
            debug!("host {} does not exist, nothing to detach", ctx.host);
        }
        Ok(())
    }
}

struct UnmapVolume;

impl<'a> Step<DetachContext<'a>> for UnmapVolume {
    fn name(&self) -> &'static str {
        "unmap-volume"
    }

    fn execute(&self, ctx: &mut DetachContext<'a>) -> Result<()> {
        if ctx.host_info.is_none() {
            return Ok(());
        }
        let luns = ctx.client.get_host_lun(&ctx.host)?;
        if !luns.iter().any(|lun| lun.volume == ctx.volume) {
            debug!("{} is not mapped to {}", ctx.volume, ctx.host);
            return Ok(());
        }
        match ctx.client.unmap_volume_from_host(&ctx.host, ctx.volume) {
            Ok(()) => info!("unmapped {} from {}", ctx.volume, ctx.host),
            Err(e) if e.is_idempotent_conflict(&[LUN_NOT_IN_HOST]) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

struct CheckOtherLuns;

impl<'a> Step<DetachContext<'a>> for CheckOtherLuns {
    fn name(&self) -> &'static str {
        "check-other-luns"
    }

    fn execute(&self, ctx: &mut DetachContext<'a>) -> Result<()> {
        if ctx.host_info.is_none() {
            return Ok(());
        }
        let remaining = ctx.client.get_host_lun(&ctx.host)?;
        ctx.keep_host = !remaining.is_empty();
        if ctx.keep_host {
            debug!(
                "host {} still serves {} volume(s), keeping it",
                ctx.host,
                remaining.len()
            );
        }
        Ok(())
    }
}

struct DetachInitiators;

impl<'a> Step<DetachContext<'a>> for DetachInitiators {
    fn name(&self) -> &'static str {
        "detach-initiators"
    }

    fn execute(&self, ctx: &mut DetachContext<'a>) -> Result<()> {
        if !ctx.tearing_down_host() {
            return Ok(());
        }
        for iqn in ctx.client.get_associate_initiator_by_host_name(&ctx.host)? {
            match ctx.client.delete_initiator_from_host(&ctx.host, &iqn) {
                Ok(()) => info!("removed initiator {iqn} from host {}", ctx.host),
                Err(e) if e.is_idempotent_conflict(&[INITIATOR_NOT_IN_HOST]) => {}
                Err(e) => return Err(e.into()),
            }

            if !ctx.client.get_host_associate_initiator(&iqn)?.is_empty() {
                continue;
            }
            match ctx.client.remove_initiator_from_array(&iqn) {
                Ok(()) => info!("deregistered initiator {iqn}"),
                Err(e) if e.is_idempotent_conflict(&[INITIATOR_NOT_EXIST]) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

struct LeaveHostGroup;

impl<'a> Step<DetachContext<'a>> for LeaveHostGroup {
    fn name(&self) -> &'static str {
        "leave-host-group"
    }

    fn execute(&self, ctx: &mut DetachContext<'a>) -> Result<()> {
        if !ctx.tearing_down_host() {
            return Ok(());
        }
        let Some(group) = ctx.group() else {
            return Ok(());
        };
        match ctx.client.remove_host_from_hostgroup(&ctx.host, group) {
            Ok(()) => info!("removed host {} from host group {group}", ctx.host),
            Err(e) if e.is_idempotent_conflict(&[HOST_NOT_IN_HOSTGROUP, HOSTGROUP_NOT_EXIST]) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

struct DeleteHostGroup;

impl<'a> Step<DetachContext<'a>> for DeleteHostGroup {
    fn name(&self) -> &'static str {
        "delete-host-group"
    }

    fn execute(&self, ctx: &mut DetachContext<'a>) -> Result<()> {
        if !ctx.tearing_down_host() {
            return Ok(());
        }
        let Some(group) = ctx.group() else {
            return Ok(());
        };
        let members = match ctx.client.get_host_in_hostgroup(group) {
            Ok(members) => members,
            Err(e) if e.is_idempotent_conflict(&[HOSTGROUP_NOT_EXIST]) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if !members.is_empty() {
            debug!("host group {group} still has {} member(s)", members.len());
            return Ok(());
        }
        match ctx.client.delete_hostgroup(group) {
            Ok(()) => info!("deleted host group {group}"),
            Err(e) if e.is_idempotent_conflict(&[HOSTGROUP_NOT_EXIST]) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

struct DeleteHost;

impl<'a> Step<DetachContext<'a>> for DeleteHost {
    fn name(&self) -> &'static str {
        "delete-host"
    }

    fn execute(&self, ctx: &mut DetachContext<'a>) -> Result<()> {
        if !ctx.tearing_down_host() {
            return Ok(());
        }
        let Some(current) = ctx.find_host()? else {
            return Ok(());
        };
        if let Some(group) = &current.host_group {
            debug!("host {} is still in host group {group}, keeping it", ctx.host);
            return Ok(());
        }
        match ctx.client.delete_host(&ctx.host) {
            Ok(()) => info!("deleted host {}", ctx.host),
            Err(e) if e.is_idempotent_conflict(&[HOST_NOT_EXIST]) => {}
            Err(e) => return Err(e.into()),
        }
        ctx.host_deleted = true;
        ctx.affinity.forget(&ctx.host);
        Ok(())
    }
}
