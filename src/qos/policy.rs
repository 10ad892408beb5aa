// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! QoS policy lifecycle on the array: one policy per volume, named after the volume.

use std::collections::BTreeMap;

use log::{info, warn};

use super::{get_qos_param, QosParams};
use crate::{
    client::ArrayClient,
    constants::{
        QOS_ALREADY_EXIST, QOS_MAX_INTERCEPT_LENGTH, QOS_NOT_EXIST, QOS_PREFIX,
        QOS_STILL_ASSOCIATED,
    },
    error::Result,
};

/// Name of the policy created for `volume`.
pub fn policy_name(volume: &str) -> String {
    let intercept: String = volume.chars().take(QOS_MAX_INTERCEPT_LENGTH).collect();
    format!("{QOS_PREFIX}{intercept}")
}

/// What [`QosManager::add`] did, so that a caller can undo exactly that.
#[derive(Debug, Clone, PartialEq)]
pub struct QosAttachment {
    pub name: String,
    /// False when a policy of that name already existed and was modified instead.
    pub created: bool,
}

pub struct QosManager<'a> {
    client: &'a dyn ArrayClient,
}

impl<'a> QosManager<'a> {
    pub fn new(client: &'a dyn ArrayClient) -> Self {
        Self { client }
    }

    /// Create (or take over) the volume's policy with `raw` limits and associate it.
    pub fn add(&self, volume: &str, raw: &BTreeMap<String, String>) -> Result<QosAttachment> {
        let params = get_qos_param(raw, self.client)?;
        self.add_params(volume, &params)
    }

    pub fn add_params(&self, volume: &str, params: &QosParams) -> Result<QosAttachment> {
        let name = policy_name(volume);

        let created = match self.client.create_qos(&name, params) {
            Ok(()) => true,
            Err(e) if e.is_idempotent_conflict(&[QOS_ALREADY_EXIST]) => {
                info!("QoS policy {name} already exists, updating it");
                self.client.modify_qos(&name, params)?;
                false
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self.client.associate_qos_with_volume(volume, &name) {
            if created {
                warn!("associating QoS policy {name} with {volume} failed, deleting the policy");
                if let Err(cleanup) = self.client.delete_qos(&name) {
                    warn!("could not delete QoS policy {name}: {cleanup}");
                }
            }
            return Err(e.into());
        }

        info!("QoS policy {name} attached to {volume}");
        Ok(QosAttachment { name, created })
    }

    /// Apply `raw` limits to the volume's policy, creating and attaching one if the volume has
    /// none.
    pub fn update(&self, volume: &str, raw: &BTreeMap<String, String>) -> Result<QosAttachment> {
        let params = get_qos_param(raw, self.client)?;
        match self.client.get_qos_by_volume(volume)? {
            Some(name) => {
                self.client.modify_qos(&name, &params)?;
                info!("QoS policy {name} of {volume} updated");
                Ok(QosAttachment {
                    name,
                    created: false,
                })
            }
            None => self.add_params(volume, &params),
        }
    }

    /// Detach the volume's policy, deleting the policy once no volume references it.
    pub fn remove(&self, volume: &str) -> Result<()> {
        let Some(name) = self.client.get_qos_by_volume(volume)? else {
            return Ok(());
        };

        self.client.disassociate_qos_with_volume(volume, &name)?;

        let still_used = self.client.get_volumes_by_qos(&name)?;
        if !still_used.is_empty() {
            info!(
                "QoS policy {name} detached from {volume}, still used by {} volume(s)",
                still_used.len()
            );
            return Ok(());
        }

        match self.client.delete_qos(&name) {
            Ok(()) => info!("QoS policy {name} deleted"),
            Err(e) if e.is_idempotent_conflict(&[QOS_NOT_EXIST]) => {}
            // Another volume was associated in the meantime; the policy stays.
            Err(e) if e.is_idempotent_conflict(&[QOS_STILL_ASSOCIATED]) => {
                info!("QoS policy {name} is referenced again, keeping it")
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(policy_name("volume-1"), "OpenStack_volume-1");
        let long = "volume-0123456789abcdef0123456789abcdef0123";
        let name = policy_name(long);
        assert_eq!(name.len(), QOS_PREFIX.len() + QOS_MAX_INTERCEPT_LENGTH);
        assert!(long.starts_with(&name[QOS_PREFIX.len()..]));
    }
}
