// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Limits, name prefixes and array result codes shared by the client and the workflows.

/// Root of every management API path.
pub const BASIC_URI: &str = "/dsware/service";

/// Result code the array uses for an expired or missing session token.
pub const ERROR_UNAUTHORIZED: i64 = 10000003;

/// Array object names (hosts, host groups) may not be longer than this.
pub const MAX_NAME_LENGTH: usize = 31;

pub const HOST_GROUP_PREFIX: &str = "OpenStack_";

pub const QOS_PREFIX: &str = "OpenStack_";
/// Number of characters of the volume name kept in a QoS policy name.
pub const QOS_MAX_INTERCEPT_LENGTH: usize = 36;

/// "Unlimited" ceilings submitted when the caller leaves a QoS value unset.
pub const MAX_IOPS_VALUE: u64 = 999_999_999;
pub const MAX_MBPS_VALUE: u64 = 999_999;

pub const BYTES_PER_MIB: u64 = 1024 * 1024;

/// The first firmware release able to store QoS schedules.
pub const QOS_SUPPORT_SCHEDULE_VERSION: &str = "8.0";

pub const SECONDS_OF_DAY: i64 = 24 * 60 * 60;
pub const SECONDS_OF_HOUR: i64 = 60 * 60;

/// Weekday abbreviations in bit order, Sunday is bit 0.
pub const WEEK_DAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thur", "Fri", "Sat"];

/// The array reports this zone name, which is not part of the IANA database.
pub const LEGACY_ZONE_ALIAS: (&str, &str) = ("Asia/Beijing", "Asia/Shanghai");

pub const DATE_FORMAT: &str = "%Y-%m-%d";

// Business result codes the workflows treat as "already in the desired state".
pub const HOST_ALREADY_EXIST: i64 = 50157019;
pub const HOST_NOT_EXIST: i64 = 50157018;
pub const HOSTGROUP_ALREADY_EXIST: i64 = 50157044;
pub const HOSTGROUP_NOT_EXIST: i64 = 50157043;
pub const HOST_ALREADY_IN_HOSTGROUP: i64 = 50157046;
pub const HOST_NOT_IN_HOSTGROUP: i64 = 50157047;
pub const INITIATOR_ALREADY_EXIST: i64 = 50155102;
pub const INITIATOR_NOT_EXIST: i64 = 50155103;
pub const INITIATOR_ALREADY_IN_HOST: i64 = 50157021;
pub const INITIATOR_NOT_IN_HOST: i64 = 50157022;
pub const LUN_ALREADY_IN_HOST: i64 = 50157045;
pub const LUN_NOT_IN_HOST: i64 = 50157027;
pub const QOS_ALREADY_EXIST: i64 = 50158004;
pub const QOS_NOT_EXIST: i64 = 50158001;
pub const QOS_STILL_ASSOCIATED: i64 = 50158012;
