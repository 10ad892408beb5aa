// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Normalization of user-supplied QoS specifications into the array's policy parameters.
//!
//! Input is a flat string mapping such as `{"maxIOPS": "1000", "scheduleType": "3", ...}`.
//! Every recognized key is a [`QosKey`]; each key parses its own value into a typed field of a
//! [`QosSpecBuilder`], which is then checked as a whole and turned into [`QosParams`].

use std::{collections::BTreeMap, fmt, str::FromStr};

use {
    chrono::{DateTime, FixedOffset, Local, NaiveDate, Utc},
    log::debug,
    serde::{Serialize, Serializer},
};

use crate::{
    client::ArrayClient,
    constants::{
        BYTES_PER_MIB, DATE_FORMAT, MAX_IOPS_VALUE, MAX_MBPS_VALUE, QOS_SUPPORT_SCHEDULE_VERSION,
        SECONDS_OF_DAY, SECONDS_OF_HOUR, WEEK_DAYS,
    },
    error::{Error, Result},
};

pub mod policy;
pub mod schedule;

pub use policy::{QosAttachment, QosManager};
pub use schedule::{RawSchedule, ScheduleConverter, ScheduleType};

/// Every key accepted in a QoS specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosKey {
    MaxIops,
    MaxMbps,
    /// Legacy alias of `maxIOPS`.
    TotalIopsSec,
    /// Legacy throughput limit in bytes per second, stored in MiB per second.
    TotalBytesSec,
    ScheduleType,
    StartDate,
    StartTime,
    DurationTime,
    DayOfWeek,
}

impl QosKey {
    pub const ALL: [QosKey; 9] = [
        QosKey::MaxIops,
        QosKey::MaxMbps,
        QosKey::TotalIopsSec,
        QosKey::TotalBytesSec,
        QosKey::ScheduleType,
        QosKey::StartDate,
        QosKey::StartTime,
        QosKey::DurationTime,
        QosKey::DayOfWeek,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QosKey::MaxIops => "maxIOPS",
            QosKey::MaxMbps => "maxMBPS",
            QosKey::TotalIopsSec => "total_iops_sec",
            QosKey::TotalBytesSec => "total_bytes_sec",
            QosKey::ScheduleType => "scheduleType",
            QosKey::StartDate => "startDate",
            QosKey::StartTime => "startTime",
            QosKey::DurationTime => "durationTime",
            QosKey::DayOfWeek => "dayOfWeek",
        }
    }

    /// Parse `value` and store it in the matching field of `spec`.
    pub fn apply(&self, value: &str, spec: &mut QosSpecBuilder) -> Result<()> {
        let value = value.trim();
        match self {
            QosKey::MaxIops => spec.max_iops = Some(positive(*self, value)?),
            QosKey::MaxMbps => spec.max_mbps = Some(positive(*self, value)?),
            QosKey::TotalIopsSec => spec.total_iops_sec = Some(positive(*self, value)?),
            QosKey::TotalBytesSec => {
                let mib = positive(*self, value)? / BYTES_PER_MIB;
                if mib == 0 {
                    return Err(Error::validation(format!(
                        "total_bytes_sec {value} is below the 1 MiB/s granularity"
                    )));
                }
                spec.total_mbps = Some(mib);
            }
            QosKey::ScheduleType => spec.schedule.schedule_type = Some(value.parse()?),
            QosKey::StartDate => {
                let date = NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| {
                    Error::validation(format!("startDate \"{value}\" is not {DATE_FORMAT}: {e}"))
                })?;
                spec.schedule.start_date = Some(date);
            }
            QosKey::StartTime => {
                spec.schedule.start_time = Some(clock_seconds(*self, value, false)?)
            }
            QosKey::DurationTime => {
                spec.schedule.duration_time = Some(clock_seconds(*self, value, true)?)
            }
            QosKey::DayOfWeek => spec.schedule.day_of_week = Some(weekday_mask(value)?),
        }
        Ok(())
    }
}

impl FromStr for QosKey {
    type Err = Error;

    fn from_str(key: &str) -> Result<Self> {
        QosKey::ALL
            .into_iter()
            .find(|k| k.as_str() == key)
            .ok_or_else(|| Error::validation(format!("unrecognized QoS key \"{key}\"")))
    }
}

impl fmt::Display for QosKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn positive(key: QosKey, value: &str) -> Result<u64> {
    let digits = !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit());
    match value.parse::<u64>() {
        Ok(n) if digits && n > 0 => Ok(n),
        _ => Err(Error::validation(format!(
            "{key} must be a positive integer, got \"{value}\""
        ))),
    }
}

/// "HH:MM" to seconds since midnight. Only a duration may be "24:00".
fn clock_seconds(key: QosKey, value: &str, allow_full_day: bool) -> Result<i64> {
    if allow_full_day && value == "24:00" {
        return Ok(SECONDS_OF_DAY);
    }
    let invalid = || Error::validation(format!("{key} \"{value}\" is not a HH:MM time"));
    let (hours, minutes) = value.split_once(':').ok_or_else(invalid)?;
    let hours: i64 = hours.parse().map_err(|_| invalid())?;
    let minutes: i64 = minutes.parse().map_err(|_| invalid())?;
    if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
        return Err(invalid());
    }
    Ok(hours * SECONDS_OF_HOUR + minutes * 60)
}

/// Space-separated weekday abbreviations to a 7-bit mask, bit i for `WEEK_DAYS[i]`.
pub fn weekday_mask(value: &str) -> Result<u8> {
    let mut mask = 0u8;
    for token in value.split_whitespace() {
        let day = WEEK_DAYS.iter().position(|d| *d == token).ok_or_else(|| {
            Error::validation(format!(
                "dayOfWeek token \"{token}\" is not one of {}",
                WEEK_DAYS.join(" ")
            ))
        })?;
        mask |= 1 << day;
    }
    if mask == 0 {
        return Err(Error::validation("dayOfWeek names no weekday"));
    }
    Ok(mask)
}

/// Typed QoS values gathered from the raw mapping, before defaults and schedule conversion.
#[derive(Debug, Default, Clone)]
pub struct QosSpecBuilder {
    pub max_iops: Option<u64>,
    pub max_mbps: Option<u64>,
    pub total_iops_sec: Option<u64>,
    /// `total_bytes_sec`, already converted to MiB.
    pub total_mbps: Option<u64>,
    pub schedule: RawSchedule,
}

impl QosSpecBuilder {
    pub fn from_raw(raw: &BTreeMap<String, String>) -> Result<Self> {
        let mut spec = Self::default();
        for (key, value) in raw {
            key.parse::<QosKey>()?.apply(value, &mut spec)?;
        }

        if spec.max_iops.is_none()
            && spec.max_mbps.is_none()
            && spec.total_iops_sec.is_none()
            && spec.total_mbps.is_none()
        {
            return Err(Error::validation(
                "at least one of maxIOPS, maxMBPS, total_iops_sec, total_bytes_sec is required",
            ));
        }
        Ok(spec)
    }

    pub fn max_iops(&self) -> u64 {
        self.max_iops
            .or(self.total_iops_sec)
            .unwrap_or(MAX_IOPS_VALUE)
    }

    pub fn max_mbps(&self) -> u64 {
        self.max_mbps.or(self.total_mbps).unwrap_or(MAX_MBPS_VALUE)
    }
}

/// The policy body submitted to the array.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QosParams {
    #[serde(rename = "maxIOPS")]
    pub max_iops: u64,
    #[serde(rename = "maxMBPS")]
    pub max_mbps: u64,
    #[serde(flatten)]
    pub schedule: Option<Schedule>,
}

/// A schedule in the array's representation: UTC epoch start date, UTC second-of-day start
/// time, duration in seconds and a weekday bitmask.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub schedule_type: ScheduleType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u8>,
}

impl Serialize for ScheduleType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// Compare dotted firmware versions on their leading numeric components; "8.1.RC2" is 8.1.
pub fn version_at_least(version: &str, minimum: &str) -> bool {
    fn components(v: &str) -> Vec<u64> {
        v.trim()
            .trim_start_matches(['V', 'v'])
            .split('.')
            .map_while(|c| c.parse::<u64>().ok())
            .collect()
    }

    let mut have = components(version);
    let mut want = components(minimum);
    let len = have.len().max(want.len());
    have.resize(len, 0);
    want.resize(len, 0);
    have >= want
}

/// Split `key=value` arguments into a raw QoS mapping.
pub fn parse_pairs(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.to_string()))
                .ok_or_else(|| Error::validation(format!("\"{pair}\" is not key=value")))
        })
        .collect()
}

/// Validate `raw` and convert it into policy parameters, querying the array for its firmware
/// version and time zone when a schedule is requested.
pub fn get_qos_param(raw: &BTreeMap<String, String>, client: &dyn ArrayClient) -> Result<QosParams> {
    get_qos_param_at(raw, client, Utc::now(), *Local::now().offset())
}

/// [`get_qos_param`] at a given instant, with the client's UTC offset given explicitly.
pub fn get_qos_param_at(
    raw: &BTreeMap<String, String>,
    client: &dyn ArrayClient,
    now: DateTime<Utc>,
    client_offset: FixedOffset,
) -> Result<QosParams> {
    let spec = QosSpecBuilder::from_raw(raw)?;

    let schedule = match spec.schedule.schedule_type {
        Some(kind) if kind != ScheduleType::Default => {
            let version = client.get_fsm_version()?;
            if !version_at_least(&version, QOS_SUPPORT_SCHEDULE_VERSION) {
                return Err(Error::validation(format!(
                    "array version {version} does not support QoS schedules (requires {QOS_SUPPORT_SCHEDULE_VERSION})"
                )));
            }
            let zone = client.get_system_time_zone()?;
            let time_config = client.get_time_config()?;
            let converter = ScheduleConverter::new(&zone, time_config);
            Some(converter.convert(&spec.schedule, now, client_offset)?)
        }
        kind => {
            spec.schedule.check_count(ScheduleType::Default)?;
            kind.map(|schedule_type| Schedule {
                schedule_type,
                start_date: None,
                start_time: None,
                duration_time: None,
                day_of_week: None,
            })
        }
    };

    let params = QosParams {
        max_iops: spec.max_iops(),
        max_mbps: spec.max_mbps(),
        schedule,
    };
    debug!("normalized QoS parameters: {params:?}");
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions() {
        assert!(version_at_least("8.0", "8.0"));
        assert!(version_at_least("8.1.RC1", "8.0"));
        assert!(version_at_least("V8.0.1", "8.0"));
        assert!(version_at_least("10.0", "8.0"));
        assert!(!version_at_least("6.3.2", "8.0"));
        assert!(!version_at_least("7", "8.0"));
        assert!(!version_at_least("", "8.0"));
    }

    #[test]
    fn clock_values() {
        assert_eq!(clock_seconds(QosKey::StartTime, "23:30", false).unwrap(), 84600);
        assert_eq!(clock_seconds(QosKey::StartTime, "00:30", false).unwrap(), 1800);
        assert_eq!(clock_seconds(QosKey::DurationTime, "24:00", true).unwrap(), SECONDS_OF_DAY);
        assert!(clock_seconds(QosKey::StartTime, "24:00", false).is_err());
        assert!(clock_seconds(QosKey::StartTime, "12:60", false).is_err());
        assert!(clock_seconds(QosKey::StartTime, "noon", false).is_err());
    }

    #[test]
    fn weekdays() {
        assert_eq!(weekday_mask("Sun Wed Sat").unwrap(), 1 + 8 + 64);
        assert_eq!(weekday_mask("Mon").unwrap(), 2);
        assert_eq!(weekday_mask("Thur Thur").unwrap(), 16);
        assert!(weekday_mask("Sun Thu").is_err());
        assert!(weekday_mask("  ").is_err());
    }

    #[test]
    fn limits_are_plain_digits() {
        assert_eq!(positive(QosKey::MaxIops, "1000").unwrap(), 1000);
        assert!(positive(QosKey::MaxIops, "+5").is_err());
        assert!(positive(QosKey::MaxIops, "0").is_err());
        assert!(positive(QosKey::MaxIops, "").is_err());
        assert!(positive(QosKey::MaxMbps, "1e3").is_err());
    }

    #[test]
    fn unknown_key() {
        let raw = BTreeMap::from([
            ("maxIOPS".to_string(), "10".to_string()),
            ("iops".to_string(), "1".to_string()),
        ]);
        assert!(matches!(QosSpecBuilder::from_raw(&raw), Err(Error::Validation(_))));
    }
}
