// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Conversion of a QoS activation schedule from the user's wall-clock terms into the array's
//! representation.
//!
//! The array stores the start time as a UTC second-of-day and the start date as a UTC epoch
//! timestamp. Users give both in the array's local time, so the start time is shifted by the
//! array's UTC offset (one hour more while daylight saving time is in effect). When that shift
//! crosses midnight the start date moves by one day as well.

use std::str::FromStr;

use {
    chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc},
    chrono_tz::{OffsetComponents, Tz},
    log::debug,
};

use super::Schedule;
use crate::{
    client::{TimeConfig, TimeZoneInfo},
    constants::{LEGACY_ZONE_ALIAS, SECONDS_OF_DAY, SECONDS_OF_HOUR},
    error::{Error, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScheduleType {
    /// No schedule: the policy is always in effect.
    Default = 0,
    Once = 1,
    Daily = 2,
    Weekly = 3,
}

impl ScheduleType {
    /// How many of startDate, startTime, durationTime and dayOfWeek this scheduler needs.
    fn required_fields(&self) -> usize {
        match self {
            ScheduleType::Default => 0,
            ScheduleType::Once | ScheduleType::Daily => 3,
            ScheduleType::Weekly => 4,
        }
    }
}

impl FromStr for ScheduleType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "0" => Ok(ScheduleType::Default),
            "1" => Ok(ScheduleType::Once),
            "2" => Ok(ScheduleType::Daily),
            "3" => Ok(ScheduleType::Weekly),
            other => Err(Error::validation(format!(
                "scheduleType \"{other}\" is not one of 0, 1, 2, 3"
            ))),
        }
    }
}

/// Schedule fields as the user gave them, parsed but not yet converted.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RawSchedule {
    pub schedule_type: Option<ScheduleType>,
    pub start_date: Option<NaiveDate>,
    /// Seconds since local midnight.
    pub start_time: Option<i64>,
    pub duration_time: Option<i64>,
    pub day_of_week: Option<u8>,
}

impl RawSchedule {
    pub fn configured_count(&self) -> usize {
        [
            self.start_date.is_some(),
            self.start_time.is_some(),
            self.duration_time.is_some(),
            self.day_of_week.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    /// Each scheduler takes an exact set of fields; any other combination is rejected.
    pub fn check_count(&self, kind: ScheduleType) -> Result<()> {
        let configured = self.configured_count();
        let required = kind.required_fields();
        if configured == required {
            return Ok(());
        }
        Err(Error::validation(match kind {
            ScheduleType::Default => format!(
                "scheduleType 0 takes no schedule fields, but {configured} were given"
            ),
            ScheduleType::Weekly => format!(
                "weekly scheduleType needs startDate, startTime, durationTime and dayOfWeek, but {configured} of them were given"
            ),
            _ => format!(
                "scheduleType {} needs exactly startDate, startTime and durationTime, but {configured} schedule fields were given",
                kind as u8
            ),
        }))
    }
}

/// Which way the start date has to move after the start time crossed midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateShift {
    None,
    Decrease,
    Increase,
}

impl DateShift {
    fn seconds(&self) -> i64 {
        match self {
            DateShift::None => 0,
            DateShift::Decrease => -SECONDS_OF_DAY,
            DateShift::Increase => SECONDS_OF_DAY,
        }
    }
}

/// Shift a local second-of-day by `time_zone` (seconds east of UTC, DST included) into the
/// array's UTC second-of-day, wrapping into [0, one day).
pub fn to_array_seconds(config_sec: i64, time_zone: i64) -> (i64, DateShift) {
    let shifted = config_sec - time_zone;
    if shifted < 0 {
        (shifted + SECONDS_OF_DAY, DateShift::Decrease)
    } else if shifted >= SECONDS_OF_DAY {
        (shifted - SECONDS_OF_DAY, DateShift::Increase)
    } else {
        (shifted, DateShift::None)
    }
}

/// Find the IANA zone for the name the array reports.
pub fn resolve_zone(name: &str) -> Result<Tz> {
    if let Ok(tz) = name.parse::<Tz>() {
        return Ok(tz);
    }
    let (alias, canonical) = LEGACY_ZONE_ALIAS;
    if name == alias {
        if let Ok(tz) = canonical.parse::<Tz>() {
            return Ok(tz);
        }
    }
    Err(Error::validation(format!(
        "array time zone \"{name}\" is not a known zone"
    )))
}

/// Converts schedules for one array, given its reported zone and time configuration.
#[derive(Debug)]
pub struct ScheduleConverter<'a> {
    zone: &'a TimeZoneInfo,
    time_config: TimeConfig,
}

impl<'a> ScheduleConverter<'a> {
    pub fn new(zone: &'a TimeZoneInfo, time_config: TimeConfig) -> Self {
        Self { zone, time_config }
    }

    /// The array's offset from UTC at `now`, including the DST hour when it applies.
    pub fn effective_offset(&self, tz: &Tz, now: DateTime<Utc>) -> i64 {
        let in_dst = tz.offset_from_utc_datetime(&now.naive_utc()).dst_offset()
            != chrono::TimeDelta::zero();
        let dst_active = self.time_config.dst_enabled && in_dst;
        i64::from(self.zone.utc_offset) + if dst_active { SECONDS_OF_HOUR } else { 0 }
    }

    /// Convert `raw` (whose type must be set and not `Default`) as of `now`. `client_offset` is
    /// the local UTC offset used to turn the start date into a timestamp.
    pub fn convert(
        &self,
        raw: &RawSchedule,
        now: DateTime<Utc>,
        client_offset: FixedOffset,
    ) -> Result<Schedule> {
        let Some(kind) = raw.schedule_type else {
            return Err(Error::validation("scheduleType is required for a schedule"));
        };

        let tz = resolve_zone(&self.zone.name)?;
        let today = now.with_timezone(&tz).date_naive();
        let time_zone = self.effective_offset(&tz, now);
        debug!(
            "array zone {} ({}), today {today}, effective offset {time_zone}s",
            self.zone.name,
            tz.name()
        );

        let mut start_date = match raw.start_date {
            Some(date) => {
                if date < today {
                    return Err(Error::validation(format!(
                        "startDate {date} is earlier than the current date {today}"
                    )));
                }
                let midnight = date
                    .and_time(NaiveTime::MIN)
                    .and_local_timezone(client_offset)
                    .single()
                    .ok_or_else(|| Error::validation(format!("startDate {date} is out of range")))?;
                Some(midnight.timestamp())
            }
            None => None,
        };

        let mut shift = DateShift::None;
        let start_time = match raw.start_time {
            Some(config_sec) => {
                if start_date.is_none() {
                    return Err(Error::validation("startTime requires startDate to be set"));
                }
                let (seconds, date_shift) = to_array_seconds(config_sec, time_zone);
                shift = date_shift;
                Some(seconds)
            }
            None => None,
        };

        raw.check_count(kind)?;

        if let Some(date) = start_date.as_mut() {
            *date += shift.seconds();
        }

        Ok(Schedule {
            schedule_type: kind,
            start_date,
            start_time,
            duration_time: raw.duration_time,
            day_of_week: raw.day_of_week,
        })
    }
}
