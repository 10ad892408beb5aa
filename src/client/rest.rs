// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! [`ArrayClient`] over the array's JSON/HTTPS management API.

use std::{sync::Mutex, time::Duration};

use {
    log::{debug, info, warn},
    reqwest::{blocking, Method, StatusCode},
    serde::{de::DeserializeOwned, Deserialize},
    serde_json::{json, Value},
};

use super::*;
use crate::{
    config::ArrayConfig,
    constants::{self, BASIC_URI, ERROR_UNAUTHORIZED},
    error::Error,
};

const AUTH_HEADER: &str = "X-Auth-Token";

/// The outcome of a single HTTP exchange, before any re-login.
enum Reply {
    Data(Value),
    /// The session token was missing or has expired.
    Unauthorized,
}

#[derive(Deserialize)]
struct Envelope {
    result: ResultCode,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct ResultCode {
    code: i64,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostRecord {
    host_name: String,
    #[serde(default)]
    host_group_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LunRecord {
    lun_name: String,
    host_lun_id: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortalRecord {
    iscsi_portal: String,
    target_name: String,
    #[serde(default)]
    iscsi_status: Option<String>,
}

impl PortalRecord {
    fn into_portal(self) -> Option<Portal> {
        // The link balancing API only returns usable links and omits the status.
        let active = self
            .iscsi_status
            .as_deref()
            .map_or(true, |status| status == "active");
        let portal = Portal::parse(&self.iscsi_portal, &self.target_name, active);
        if portal.is_none() {
            warn!("ignoring unparsable iSCSI portal \"{}\"", self.iscsi_portal);
        }
        portal
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodePortals {
    #[serde(default)]
    iscsi_portal_list: Vec<PortalRecord>,
}

/// Blocking REST client for one array. Cheap to share behind an `Arc`; the session token is
/// guarded internally.
pub struct RestClient {
    base_url: String,
    username: String,
    password: String,
    http: blocking::Client,
    token: Mutex<Option<String>>,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl RestClient {
    pub fn new(config: &ArrayConfig) -> Result<Self, Error> {
        let mut builder = blocking::ClientBuilder::new()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs));

        if !config.ssl_verify {
            warn!("certificate verification for {} is disabled", config.rest_url);
            builder = builder.danger_accept_invalid_certs(true);
        } else if let Some(tls) = crate::tls::client_config(config)? {
            builder = builder.use_preconfigured_tls(tls);
        }

        let http = builder
            .build()
            .map_err(|e| Error::Config(format!("could not build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            http,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{BASIC_URI}{path}", self.base_url)
    }

    fn current_token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Open a new session and remember its token.
    pub fn login(&self) -> ArrayResult<()> {
        let body = json!({ "userName": self.username, "password": self.password });
        let response = self
            .http
            .post(self.url("/v1.3/sec/login"))
            .json(&body)
            .send()
            .map_err(ArrayError::transport)?;

        let token = response
            .headers()
            .get(AUTH_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let payload: Value = response.json().map_err(|e| ArrayError::Decode {
            operation: "login",
            reason: e.to_string(),
        })?;
        check_result("login", &payload)?;

        let Some(token) = token else {
            return Err(ArrayError::Decode {
                operation: "login",
                reason: format!("response has no {AUTH_HEADER} header"),
            });
        };
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = Some(token);
        info!("logged in to {} as {}", self.base_url, self.username);
        Ok(())
    }

    fn send_once(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        operation: &'static str,
    ) -> ArrayResult<Reply> {
        let mut request = self.http.request(method.clone(), self.url(path));
        if let Some(token) = self.current_token() {
            request = request.header(AUTH_HEADER, token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().map_err(ArrayError::transport)?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Ok(Reply::Unauthorized);
        }

        let payload: Value = response.json().map_err(|e| ArrayError::Decode {
            operation,
            reason: e.to_string(),
        })?;
        match check_result(operation, &payload) {
            Ok(data) => Ok(Reply::Data(data)),
            Err(e) if e.code() == Some(ERROR_UNAUTHORIZED) => Ok(Reply::Unauthorized),
            Err(e) => Err(e),
        }
    }

    /// Issue one API call. An expired session triggers exactly one re-login and retry; nothing
    /// else is retried.
    fn call(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> ArrayResult<Value> {
        if self.current_token().is_none() {
            self.login()?;
        }
        debug!("{operation}: {method} {path}");

        match self.send_once(&method, path, body.as_ref(), operation)? {
            Reply::Data(data) => Ok(data),
            Reply::Unauthorized => {
                info!("session expired during {operation}, logging in again");
                self.login()?;
                match self.send_once(&method, path, body.as_ref(), operation)? {
                    Reply::Data(data) => Ok(data),
                    Reply::Unauthorized => Err(ArrayError::Unauthorized(operation)),
                }
            }
        }
    }

    fn post(&self, operation: &'static str, path: &str, body: Value) -> ArrayResult<Value> {
        self.call(operation, Method::POST, path, Some(body))
    }

    fn get(&self, operation: &'static str, path: &str) -> ArrayResult<Value> {
        self.call(operation, Method::GET, path, None)
    }
}

/// Split the response envelope: a non-zero result code is a business error carrying the raw
/// payload, otherwise the `data` member is returned.
fn check_result(operation: &'static str, payload: &Value) -> ArrayResult<Value> {
    let envelope: Envelope =
        serde_json::from_value(payload.clone()).map_err(|e| ArrayError::Decode {
            operation,
            reason: e.to_string(),
        })?;
    if envelope.result.code != 0 {
        return Err(ArrayError::Business {
            operation,
            code: envelope.result.code,
            description: envelope.result.description,
            payload: payload.clone(),
        });
    }
    Ok(envelope.data)
}

/// Deserialize member `key` of a response's data; a missing member decodes as `T::default()`.
fn field<T: DeserializeOwned + Default>(
    operation: &'static str,
    data: &Value,
    key: &str,
) -> ArrayResult<T> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| ArrayError::Decode {
            operation,
            reason: format!("{key}: {e}"),
        }),
    }
}

fn host_names(operation: &'static str, data: &Value) -> ArrayResult<Vec<String>> {
    let hosts: Vec<HostRecord> = field(operation, data, "hostList")?;
    Ok(hosts.into_iter().map(|h| h.host_name).collect())
}

/// Parse the array's "UTC+08:00" style offsets into seconds east of UTC.
pub fn parse_utc_offset(offset: &str) -> Option<i32> {
    let rest = offset
        .trim()
        .strip_prefix("UTC")
        .or_else(|| offset.trim().strip_prefix("GMT"))?;
    if rest.is_empty() {
        return Some(0);
    }
    let (sign, rest) = if let Some(rest) = rest.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = rest.strip_prefix('-') {
        (-1, rest)
    } else {
        return None;
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?),
        None => (rest.parse::<i32>().ok()?, 0),
    };
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    Some(sign * (hours * 3600 + minutes * 60))
}

impl ArrayClient for RestClient {
    fn create_host(&self, host: &str) -> ArrayResult<()> {
        self.post("create_host", "/iscsi/createHost", json!({ "hostName": host }))
            .map(drop)
    }

    fn delete_host(&self, host: &str) -> ArrayResult<()> {
        self.post("delete_host", "/iscsi/deleteHost", json!({ "hostName": host }))
            .map(drop)
    }

    fn get_all_host(&self) -> ArrayResult<Vec<HostInfo>> {
        let data = self.get("get_all_host", "/iscsi/queryAllHost")?;
        let hosts: Vec<HostRecord> = field("get_all_host", &data, "hostList")?;
        Ok(hosts
            .into_iter()
            .map(|h| HostInfo {
                name: h.host_name,
                host_group: h.host_group_name.filter(|g| !g.is_empty()),
            })
            .collect())
    }

    fn get_host_lun(&self, host: &str) -> ArrayResult<Vec<HostLun>> {
        let data = self.post(
            "get_host_lun",
            "/iscsi/queryHostLunInfo",
            json!({ "hostName": host }),
        )?;
        let luns: Vec<LunRecord> = field("get_host_lun", &data, "hostLunList")?;
        Ok(luns
            .into_iter()
            .map(|l| HostLun {
                volume: l.lun_name,
                lun_id: l.host_lun_id,
            })
            .collect())
    }

    fn get_hosts_by_volume(&self, volume: &str) -> ArrayResult<Vec<String>> {
        let data = self.post(
            "get_hosts_by_volume",
            "/iscsi/queryHostByLun",
            json!({ "lunName": volume }),
        )?;
        host_names("get_hosts_by_volume", &data)
    }

    fn map_volume_to_host(&self, host: &str, volume: &str) -> ArrayResult<()> {
        self.post(
            "map_volume_to_host",
            "/iscsi/addLunsToHost",
            json!({ "hostName": host, "lunNames": [volume] }),
        )
        .map(drop)
    }

    fn unmap_volume_from_host(&self, host: &str, volume: &str) -> ArrayResult<()> {
        self.post(
            "unmap_volume_from_host",
            "/iscsi/deleteLunFromHost",
            json!({ "hostName": host, "lunNames": [volume] }),
        )
        .map(drop)
    }

    fn create_hostgroup(&self, group: &str) -> ArrayResult<()> {
        self.post(
            "create_hostgroup",
            "/iscsi/createHostGroup",
            json!({ "hostGroupName": group }),
        )
        .map(drop)
    }

    fn delete_hostgroup(&self, group: &str) -> ArrayResult<()> {
        self.post(
            "delete_hostgroup",
            "/iscsi/deleteHostGroup",
            json!({ "hostGroupName": group }),
        )
        .map(drop)
    }

    fn add_host_to_hostgroup(&self, host: &str, group: &str) -> ArrayResult<()> {
        self.post(
            "add_host_to_hostgroup",
            "/iscsi/addHostToHostGroup",
            json!({ "hostGroupName": group, "hostList": [host] }),
        )
        .map(drop)
    }

    fn remove_host_from_hostgroup(&self, host: &str, group: &str) -> ArrayResult<()> {
        self.post(
            "remove_host_from_hostgroup",
            "/iscsi/deleteHostFromHostGroup",
            json!({ "hostGroupName": group, "hostList": [host] }),
        )
        .map(drop)
    }

    fn get_host_in_hostgroup(&self, group: &str) -> ArrayResult<Vec<String>> {
        let data = self.post(
            "get_host_in_hostgroup",
            "/iscsi/queryHostFromHostGroup",
            json!({ "hostGroupName": group }),
        )?;
        host_names("get_host_in_hostgroup", &data)
    }

    fn get_initiator(&self, iqn: &str) -> ArrayResult<bool> {
        match self.post(
            "get_initiator",
            "/iscsi/queryPortInfo",
            json!({ "portName": iqn }),
        ) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == Some(constants::INITIATOR_NOT_EXIST) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn add_initiator_to_array(&self, iqn: &str) -> ArrayResult<()> {
        self.post(
            "add_initiator_to_array",
            "/iscsi/createPort",
            json!({ "portName": iqn }),
        )
        .map(drop)
    }

    fn remove_initiator_from_array(&self, iqn: &str) -> ArrayResult<()> {
        self.post(
            "remove_initiator_from_array",
            "/iscsi/deletePort",
            json!({ "portName": iqn }),
        )
        .map(drop)
    }

    fn add_initiator_to_host(&self, host: &str, iqn: &str) -> ArrayResult<()> {
        self.post(
            "add_initiator_to_host",
            "/iscsi/addPortToHost",
            json!({ "hostName": host, "portNames": [iqn] }),
        )
        .map(drop)
    }

    fn delete_initiator_from_host(&self, host: &str, iqn: &str) -> ArrayResult<()> {
        self.post(
            "delete_initiator_from_host",
            "/iscsi/deletePortFromHost",
            json!({ "hostName": host, "portNames": [iqn] }),
        )
        .map(drop)
    }

    fn get_associate_initiator_by_host_name(&self, host: &str) -> ArrayResult<Vec<String>> {
        let data = self.post(
            "get_associate_initiator_by_host_name",
            "/iscsi/queryPortFromHost",
            json!({ "hostName": host }),
        )?;
        field("get_associate_initiator_by_host_name", &data, "portNameList")
    }

    fn get_host_associate_initiator(&self, iqn: &str) -> ArrayResult<Vec<String>> {
        let data = self.post(
            "get_host_associate_initiator",
            "/iscsi/queryHostFromPort",
            json!({ "portName": iqn }),
        )?;
        host_names("get_host_associate_initiator", &data)
    }

    fn get_target_port(&self, manager_ip: &str) -> ArrayResult<Vec<Portal>> {
        let data = self.post(
            "get_target_port",
            "/iscsi/queryIscsiPortal",
            json!({ "nodeMgrIps": [manager_ip] }),
        )?;
        let nodes: Vec<NodePortals> = field("get_target_port", &data, "nodeResultList")?;
        Ok(nodes
            .into_iter()
            .flat_map(|node| node.iscsi_portal_list)
            .filter_map(PortalRecord::into_portal)
            .collect())
    }

    fn get_iscsi_links(&self, pools: &[u32], link_count: u32) -> ArrayResult<Vec<Portal>> {
        let data = self.post(
            "get_iscsi_links",
            "/iscsi/queryIscsiLinks",
            json!({ "amount": link_count, "poolList": pools }),
        )?;
        let links: Vec<PortalRecord> = field("get_iscsi_links", &data, "iscsiLinkList")?;
        Ok(links
            .into_iter()
            .filter_map(PortalRecord::into_portal)
            .collect())
    }

    fn get_system_time_zone(&self) -> ArrayResult<TimeZoneInfo> {
        let data = self.get("get_system_time_zone", "/common/time/zone")?;
        let name: String = field("get_system_time_zone", &data, "timeZoneName")?;
        let offset: String = field("get_system_time_zone", &data, "timeZoneOffset")?;
        let utc_offset = parse_utc_offset(&offset).ok_or_else(|| ArrayError::Decode {
            operation: "get_system_time_zone",
            reason: format!("unrecognized offset \"{offset}\""),
        })?;
        Ok(TimeZoneInfo { name, utc_offset })
    }

    fn get_time_config(&self) -> ArrayResult<TimeConfig> {
        let data = self.get("get_time_config", "/common/time/config")?;
        let dst_enabled: bool = field("get_time_config", &data, "useDst")?;
        Ok(TimeConfig { dst_enabled })
    }

    fn get_fsm_version(&self) -> ArrayResult<String> {
        let data = self.get("get_fsm_version", "/cluster/version")?;
        field("get_fsm_version", &data, "version")
    }

    fn create_qos(&self, name: &str, params: &QosParams) -> ArrayResult<()> {
        self.post(
            "create_qos",
            "/v1.3/qos/create",
            json!({ "qosName": name, "qosSpecInfo": params }),
        )
        .map(drop)
    }

    fn modify_qos(&self, name: &str, params: &QosParams) -> ArrayResult<()> {
        self.post(
            "modify_qos",
            "/v1.3/qos/modify",
            json!({ "qosName": name, "qosSpecInfo": params }),
        )
        .map(drop)
    }

    fn delete_qos(&self, name: &str) -> ArrayResult<()> {
        self.post(
            "delete_qos",
            "/v1.3/qos/delete",
            json!({ "qosNames": [name] }),
        )
        .map(drop)
    }

    fn associate_qos_with_volume(&self, volume: &str, name: &str) -> ArrayResult<()> {
        self.post(
            "associate_qos_with_volume",
            "/v1.3/qos/volume/associate",
            json!({ "keyNames": [volume], "qosName": name }),
        )
        .map(drop)
    }

    fn disassociate_qos_with_volume(&self, volume: &str, name: &str) -> ArrayResult<()> {
        self.post(
            "disassociate_qos_with_volume",
            "/v1.3/qos/volume/disassociate",
            json!({ "keyNames": [volume], "qosName": name }),
        )
        .map(drop)
    }

    fn get_qos_by_volume(&self, volume: &str) -> ArrayResult<Option<String>> {
        let data = self.post(
            "get_qos_by_volume",
            "/v1.3/qos/volume/query",
            json!({ "keyName": volume }),
        )?;
        let name: Option<String> = field("get_qos_by_volume", &data, "qosName")?;
        Ok(name.filter(|n| !n.is_empty()))
    }

    fn get_volumes_by_qos(&self, name: &str) -> ArrayResult<Vec<String>> {
        let data = self.post(
            "get_volumes_by_qos",
            "/v1.3/qos/volume/list",
            json!({ "qosName": name }),
        )?;
        field("get_volumes_by_qos", &data, "volumeList")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utc_offsets() {
        assert_eq!(parse_utc_offset("UTC+08:00"), Some(8 * 3600));
        assert_eq!(parse_utc_offset("UTC-05:30"), Some(-(5 * 3600 + 1800)));
        assert_eq!(parse_utc_offset("GMT+9"), Some(9 * 3600));
        assert_eq!(parse_utc_offset("UTC"), Some(0));
        assert_eq!(parse_utc_offset("UTC*08:00"), None);
        assert_eq!(parse_utc_offset("UTC\u{2212}05:00"), None);
        assert_eq!(parse_utc_offset("GMT\u{00b1}00"), None);
        assert_eq!(parse_utc_offset("UTC+25:00"), None);
        assert_eq!(parse_utc_offset("CST"), None);
    }

    #[test]
    fn business_errors_keep_payload() {
        let payload = json!({
            "result": { "code": 50157019, "description": "host already exists" },
            "data": {}
        });
        let err = check_result("create_host", &payload).unwrap_err();
        match err {
            ArrayError::Business {
                code,
                payload: raw,
                ..
            } => {
                assert_eq!(code, 50157019);
                assert_eq!(raw, payload);
            }
            other => panic!("unexpected error {other:?}"),
        }

        let ok = json!({ "result": { "code": 0 }, "data": { "version": "8.1.0" } });
        let data = check_result("get_fsm_version", &ok).unwrap();
        let version: String = field("get_fsm_version", &data, "version").unwrap();
        assert_eq!(version, "8.1.0");
    }

    #[test]
    fn portal_records() {
        let data = json!({
            "nodeResultList": [{
                "iscsiPortalList": [
                    { "iscsiPortal": "10.0.0.1:3260", "targetName": "iqn.t1", "iscsiStatus": "active" },
                    { "iscsiPortal": "10.0.0.2:3260", "targetName": "iqn.t2", "iscsiStatus": "inactive" }
                ]
            }]
        });
        let nodes: Vec<NodePortals> = field("get_target_port", &data, "nodeResultList").unwrap();
        let portals: Vec<Portal> = nodes
            .into_iter()
            .flat_map(|n| n.iscsi_portal_list)
            .filter_map(PortalRecord::into_portal)
            .collect();
        assert_eq!(portals.len(), 2);
        assert!(portals[0].active);
        assert!(!portals[1].active);
    }
}
