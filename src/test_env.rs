// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Test support: an in-memory array and per-test working directories.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    io,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{
    client::{ArrayClient, ArrayResult, HostInfo, HostLun, Portal, TimeConfig, TimeZoneInfo},
    config::Config,
    constants::*,
    error::ArrayError,
    qos::QosParams,
};

/// Given a relative `path` in the test directory, prepend the full path to the test directory.
pub fn test_path(path: &str) -> String {
    std::env::var("CARGO_MANIFEST_DIR").unwrap() + "/tests/" + path
}

/// Create (emptying it first, if it exists) the private directory of the test named `test_id`
/// and return its path.
pub fn private_dir(test_id: &str) -> String {
    let path = test_path(&format!("test_output/{test_id}"));
    // Files from a previous run must not affect this one.
    match std::fs::remove_dir_all(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => panic!("Could not clean up test directory: {e}"),
    };
    std::fs::create_dir_all(&path).unwrap();
    path
}

/// Load the config fixture `tests/{name}.toml`.
pub fn fixture_config(name: &str) -> Config {
    Config::load(Some(&test_path(&format!("{name}.toml")))).unwrap()
}

/// An error to return from a [`FakeArray`] method instead of running it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Injected {
    Transport,
    Business(i64),
}

#[derive(Debug, Default)]
struct ArrayState {
    /// Host name to the group it is in.
    hosts: BTreeMap<String, Option<String>>,
    groups: BTreeMap<String, BTreeSet<String>>,
    /// Registered initiators and the hosts each is associated with.
    initiators: BTreeMap<String, BTreeSet<String>>,
    /// Host to volume to LUN id.
    mappings: BTreeMap<String, BTreeMap<String, u32>>,
    qos: BTreeMap<String, QosParams>,
    /// Volume to the QoS policy associated with it.
    qos_volumes: BTreeMap<String, String>,
    target_ports: HashMap<String, Vec<Portal>>,
    links: Vec<Portal>,
}

/// An in-memory [`ArrayClient`] that keeps the array's object graph and answers with the
/// business codes the real array uses. Every call is recorded as `"method arg..."`, and calls
/// to a method can be made to fail.
pub struct FakeArray {
    state: Mutex<ArrayState>,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, Injected>>,
    zone: TimeZoneInfo,
    time_config: TimeConfig,
    version: String,
}

impl Default for FakeArray {
    fn default() -> Self {
        Self::new()
    }
}

fn business(operation: &'static str, code: i64) -> ArrayError {
    ArrayError::business(operation, code, format!("fake array refused {operation}"))
}

impl FakeArray {
    /// An empty array in Asia/Shanghai without DST, running a firmware with QoS schedules.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ArrayState::default()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            zone: TimeZoneInfo {
                name: "Asia/Shanghai".to_string(),
                utc_offset: 8 * 3600,
            },
            time_config: TimeConfig { dst_enabled: false },
            version: "8.1.0".to_string(),
        }
    }

    pub fn with_time_zone(mut self, name: &str, utc_offset: i32) -> Self {
        self.zone = TimeZoneInfo {
            name: name.to_string(),
            utc_offset,
        };
        self
    }

    pub fn with_dst(mut self, dst_enabled: bool) -> Self {
        self.time_config = TimeConfig { dst_enabled };
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    /// Make the node managed from `manager_ip` serve portals at `addresses` under `iqn`.
    pub fn add_target_ports(&self, manager_ip: &str, iqn: &str, addresses: &[&str]) {
        let portals = addresses
            .iter()
            .map(|address| Portal::parse(address, iqn, true).unwrap());
        self.state()
            .target_ports
            .entry(manager_ip.to_string())
            .or_default()
            .extend(portals);
    }

    pub fn add_inactive_target_port(&self, manager_ip: &str, iqn: &str, address: &str) {
        let portal = Portal::parse(address, iqn, false).unwrap();
        self.state()
            .target_ports
            .entry(manager_ip.to_string())
            .or_default()
            .push(portal);
    }

    pub fn set_iscsi_links(&self, iqn: &str, addresses: &[&str]) {
        self.state().links = addresses
            .iter()
            .map(|address| Portal::parse(address, iqn, true).unwrap())
            .collect();
    }

    pub fn fail(&self, method: &str, error: Injected) {
        self.failures
            .lock()
            .unwrap()
            .insert(method.to_string(), error);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls to `method`.
    pub fn calls_to(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.split(' ').next() == Some(method))
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn host_names(&self) -> Vec<String> {
        self.state().hosts.keys().cloned().collect()
    }

    pub fn group_of(&self, host: &str) -> Option<String> {
        self.state().hosts.get(host).cloned().flatten()
    }

    pub fn group_names(&self) -> Vec<String> {
        self.state().groups.keys().cloned().collect()
    }

    pub fn initiator_names(&self) -> Vec<String> {
        self.state().initiators.keys().cloned().collect()
    }

    /// Every mapping on the array as `(host, volume)`.
    pub fn mappings(&self) -> Vec<(String, String)> {
        self.state()
            .mappings
            .iter()
            .flat_map(|(host, volumes)| volumes.keys().map(move |v| (host.clone(), v.clone())))
            .collect()
    }

    pub fn qos_policy(&self, name: &str) -> Option<QosParams> {
        self.state().qos.get(name).cloned()
    }

    pub fn qos_names(&self) -> Vec<String> {
        self.state().qos.keys().cloned().collect()
    }

    fn state(&self) -> MutexGuard<'_, ArrayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call and return the injected failure for `method`, if any.
    fn enter(&self, method: &'static str, args: &[&str]) -> ArrayResult<()> {
        let mut call = method.to_string();
        for arg in args {
            call.push(' ');
            call.push_str(arg);
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);

        let failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        match failures.get(method) {
            None => Ok(()),
            Some(Injected::Transport) => Err(ArrayError::transport(format!(
                "injected transport failure in {method}"
            ))),
            Some(Injected::Business(code)) => Err(business(method, *code)),
        }
    }
}

impl ArrayClient for FakeArray {
    fn create_host(&self, host: &str) -> ArrayResult<()> {
        self.enter("create_host", &[host])?;
        let mut state = self.state();
        if state.hosts.contains_key(host) {
            return Err(business("create_host", HOST_ALREADY_EXIST));
        }
        state.hosts.insert(host.to_string(), None);
        Ok(())
    }

    fn delete_host(&self, host: &str) -> ArrayResult<()> {
        self.enter("delete_host", &[host])?;
        let mut state = self.state();
        if state.hosts.remove(host).is_none() {
            return Err(business("delete_host", HOST_NOT_EXIST));
        }
        state.mappings.remove(host);
        for hosts in state.initiators.values_mut() {
            hosts.remove(host);
        }
        Ok(())
    }

    fn get_all_host(&self) -> ArrayResult<Vec<HostInfo>> {
        self.enter("get_all_host", &[])?;
        Ok(self
            .state()
            .hosts
            .iter()
            .map(|(name, group)| HostInfo {
                name: name.clone(),
                host_group: group.clone(),
            })
            .collect())
    }

    fn get_host_lun(&self, host: &str) -> ArrayResult<Vec<HostLun>> {
        self.enter("get_host_lun", &[host])?;
        let state = self.state();
        if !state.hosts.contains_key(host) {
            return Err(business("get_host_lun", HOST_NOT_EXIST));
        }
        Ok(state
            .mappings
            .get(host)
            .map(|volumes| {
                volumes
                    .iter()
                    .map(|(volume, lun_id)| HostLun {
                        volume: volume.clone(),
                        lun_id: *lun_id,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get_hosts_by_volume(&self, volume: &str) -> ArrayResult<Vec<String>> {
        self.enter("get_hosts_by_volume", &[volume])?;
        Ok(self
            .state()
            .mappings
            .iter()
            .filter(|(_, volumes)| volumes.contains_key(volume))
            .map(|(host, _)| host.clone())
            .collect())
    }

    fn map_volume_to_host(&self, host: &str, volume: &str) -> ArrayResult<()> {
        self.enter("map_volume_to_host", &[host, volume])?;
        let mut state = self.state();
        if !state.hosts.contains_key(host) {
            return Err(business("map_volume_to_host", HOST_NOT_EXIST));
        }
        let volumes = state.mappings.entry(host.to_string()).or_default();
        if volumes.contains_key(volume) {
            return Err(business("map_volume_to_host", LUN_ALREADY_IN_HOST));
        }
        let lun_id = (1..)
            .find(|id| !volumes.values().any(|used| used == id))
            .unwrap_or_default();
        volumes.insert(volume.to_string(), lun_id);
        Ok(())
    }

    fn unmap_volume_from_host(&self, host: &str, volume: &str) -> ArrayResult<()> {
        self.enter("unmap_volume_from_host", &[host, volume])?;
        let mut state = self.state();
        let removed = state
            .mappings
            .get_mut(host)
            .and_then(|volumes| volumes.remove(volume));
        if removed.is_none() {
            return Err(business("unmap_volume_from_host", LUN_NOT_IN_HOST));
        }
        if state.mappings.get(host).is_some_and(|v| v.is_empty()) {
            state.mappings.remove(host);
        }
        Ok(())
    }

    fn create_hostgroup(&self, group: &str) -> ArrayResult<()> {
        self.enter("create_hostgroup", &[group])?;
        let mut state = self.state();
        if state.groups.contains_key(group) {
            return Err(business("create_hostgroup", HOSTGROUP_ALREADY_EXIST));
        }
        state.groups.insert(group.to_string(), BTreeSet::new());
        Ok(())
    }

    fn delete_hostgroup(&self, group: &str) -> ArrayResult<()> {
        self.enter("delete_hostgroup", &[group])?;
        let mut state = self.state();
        let Some(members) = state.groups.remove(group) else {
            return Err(business("delete_hostgroup", HOSTGROUP_NOT_EXIST));
        };
        for member in members {
            state.hosts.insert(member, None);
        }
        Ok(())
    }

    fn add_host_to_hostgroup(&self, host: &str, group: &str) -> ArrayResult<()> {
        self.enter("add_host_to_hostgroup", &[host, group])?;
        let mut state = self.state();
        if !state.groups.contains_key(group) {
            return Err(business("add_host_to_hostgroup", HOSTGROUP_NOT_EXIST));
        }
        match state.hosts.get(host) {
            None => return Err(business("add_host_to_hostgroup", HOST_NOT_EXIST)),
            Some(Some(_)) => {
                return Err(business("add_host_to_hostgroup", HOST_ALREADY_IN_HOSTGROUP))
            }
            Some(None) => {}
        }
        state.hosts.insert(host.to_string(), Some(group.to_string()));
        if let Some(members) = state.groups.get_mut(group) {
            members.insert(host.to_string());
        }
        Ok(())
    }

    fn remove_host_from_hostgroup(&self, host: &str, group: &str) -> ArrayResult<()> {
        self.enter("remove_host_from_hostgroup", &[host, group])?;
        let mut state = self.state();
        let Some(members) = state.groups.get_mut(group) else {
            return Err(business("remove_host_from_hostgroup", HOSTGROUP_NOT_EXIST));
        };
        if !members.remove(host) {
            return Err(business("remove_host_from_hostgroup", HOST_NOT_IN_HOSTGROUP));
        }
        state.hosts.insert(host.to_string(), None);
        Ok(())
    }

    fn get_host_in_hostgroup(&self, group: &str) -> ArrayResult<Vec<String>> {
        self.enter("get_host_in_hostgroup", &[group])?;
        match self.state().groups.get(group) {
            Some(members) => Ok(members.iter().cloned().collect()),
            None => Err(business("get_host_in_hostgroup", HOSTGROUP_NOT_EXIST)),
        }
    }

    fn get_initiator(&self, iqn: &str) -> ArrayResult<bool> {
        self.enter("get_initiator", &[iqn])?;
        Ok(self.state().initiators.contains_key(iqn))
    }

    fn add_initiator_to_array(&self, iqn: &str) -> ArrayResult<()> {
        self.enter("add_initiator_to_array", &[iqn])?;
        let mut state = self.state();
        if state.initiators.contains_key(iqn) {
            return Err(business("add_initiator_to_array", INITIATOR_ALREADY_EXIST));
        }
        state.initiators.insert(iqn.to_string(), BTreeSet::new());
        Ok(())
    }

    fn remove_initiator_from_array(&self, iqn: &str) -> ArrayResult<()> {
        self.enter("remove_initiator_from_array", &[iqn])?;
        if self.state().initiators.remove(iqn).is_none() {
            return Err(business("remove_initiator_from_array", INITIATOR_NOT_EXIST));
        }
        Ok(())
    }

    fn add_initiator_to_host(&self, host: &str, iqn: &str) -> ArrayResult<()> {
        self.enter("add_initiator_to_host", &[host, iqn])?;
        let mut state = self.state();
        if !state.hosts.contains_key(host) {
            return Err(business("add_initiator_to_host", HOST_NOT_EXIST));
        }
        let Some(hosts) = state.initiators.get_mut(iqn) else {
            return Err(business("add_initiator_to_host", INITIATOR_NOT_EXIST));
        };
        if !hosts.insert(host.to_string()) {
            return Err(business("add_initiator_to_host", INITIATOR_ALREADY_IN_HOST));
        }
        Ok(())
    }

    fn delete_initiator_from_host(&self, host: &str, iqn: &str) -> ArrayResult<()> {
        self.enter("delete_initiator_from_host", &[host, iqn])?;
        let removed = self
            .state()
            .initiators
            .get_mut(iqn)
            .is_some_and(|hosts| hosts.remove(host));
        if !removed {
            return Err(business("delete_initiator_from_host", INITIATOR_NOT_IN_HOST));
        }
        Ok(())
    }

    fn get_associate_initiator_by_host_name(&self, host: &str) -> ArrayResult<Vec<String>> {
        self.enter("get_associate_initiator_by_host_name", &[host])?;
        Ok(self
            .state()
            .initiators
            .iter()
            .filter(|(_, hosts)| hosts.contains(host))
            .map(|(iqn, _)| iqn.clone())
            .collect())
    }

    fn get_host_associate_initiator(&self, iqn: &str) -> ArrayResult<Vec<String>> {
        self.enter("get_host_associate_initiator", &[iqn])?;
        Ok(self
            .state()
            .initiators
            .get(iqn)
            .map(|hosts| hosts.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn get_target_port(&self, manager_ip: &str) -> ArrayResult<Vec<Portal>> {
        self.enter("get_target_port", &[manager_ip])?;
        Ok(self
            .state()
            .target_ports
            .get(manager_ip)
            .cloned()
            .unwrap_or_default())
    }

    fn get_iscsi_links(&self, pools: &[u32], link_count: u32) -> ArrayResult<Vec<Portal>> {
        let pools: Vec<String> = pools.iter().map(|p| p.to_string()).collect();
        self.enter("get_iscsi_links", &[&pools.join(","), &link_count.to_string()])?;
        Ok(self
            .state()
            .links
            .iter()
            .take(link_count as usize)
            .cloned()
            .collect())
    }

    fn get_system_time_zone(&self) -> ArrayResult<TimeZoneInfo> {
        self.enter("get_system_time_zone", &[])?;
        Ok(self.zone.clone())
    }

    fn get_time_config(&self) -> ArrayResult<TimeConfig> {
        self.enter("get_time_config", &[])?;
        Ok(self.time_config)
    }

    fn get_fsm_version(&self) -> ArrayResult<String> {
        self.enter("get_fsm_version", &[])?;
        Ok(self.version.clone())
    }

    fn create_qos(&self, name: &str, params: &QosParams) -> ArrayResult<()> {
        self.enter("create_qos", &[name])?;
        let mut state = self.state();
        if state.qos.contains_key(name) {
            return Err(business("create_qos", QOS_ALREADY_EXIST));
        }
        state.qos.insert(name.to_string(), params.clone());
        Ok(())
    }

    fn modify_qos(&self, name: &str, params: &QosParams) -> ArrayResult<()> {
        self.enter("modify_qos", &[name])?;
        match self.state().qos.get_mut(name) {
            Some(existing) => {
                *existing = params.clone();
                Ok(())
            }
            None => Err(business("modify_qos", QOS_NOT_EXIST)),
        }
    }

    fn delete_qos(&self, name: &str) -> ArrayResult<()> {
        self.enter("delete_qos", &[name])?;
        let mut state = self.state();
        if !state.qos.contains_key(name) {
            return Err(business("delete_qos", QOS_NOT_EXIST));
        }
        if state.qos_volumes.values().any(|policy| policy == name) {
            return Err(business("delete_qos", QOS_STILL_ASSOCIATED));
        }
        state.qos.remove(name);
        Ok(())
    }

    fn associate_qos_with_volume(&self, volume: &str, name: &str) -> ArrayResult<()> {
        self.enter("associate_qos_with_volume", &[volume, name])?;
        let mut state = self.state();
        if !state.qos.contains_key(name) {
            return Err(business("associate_qos_with_volume", QOS_NOT_EXIST));
        }
        state.qos_volumes.insert(volume.to_string(), name.to_string());
        Ok(())
    }

    fn disassociate_qos_with_volume(&self, volume: &str, name: &str) -> ArrayResult<()> {
        self.enter("disassociate_qos_with_volume", &[volume, name])?;
        let mut state = self.state();
        if state.qos_volumes.get(volume).map(String::as_str) != Some(name) {
            return Err(business("disassociate_qos_with_volume", QOS_NOT_EXIST));
        }
        state.qos_volumes.remove(volume);
        Ok(())
    }

    fn get_qos_by_volume(&self, volume: &str) -> ArrayResult<Option<String>> {
        self.enter("get_qos_by_volume", &[volume])?;
        Ok(self.state().qos_volumes.get(volume).cloned())
    }

    fn get_volumes_by_qos(&self, name: &str) -> ArrayResult<Vec<String>> {
        self.enter("get_volumes_by_qos", &[name])?;
        Ok(self
            .state()
            .qos_volumes
            .iter()
            .filter(|(_, policy)| policy.as_str() == name)
            .map(|(volume, _)| volume.clone())
            .collect())
    }
}
