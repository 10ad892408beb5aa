// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};

    use dsware_lib::{
        client::ArrayClient,
        constants::{MAX_IOPS_VALUE, MAX_MBPS_VALUE},
        qos::{get_qos_param_at, QosManager, QosParams, ScheduleType},
        test_env::{FakeArray, Injected},
        Error,
    };

    fn raw(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    /// Midnight UTC of the given day, as an epoch timestamp.
    fn epoch(year: i32, month: u32, day: u32) -> i64 {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp()
    }

    fn berlin(dst_enabled: bool) -> FakeArray {
        FakeArray::new()
            .with_time_zone("Europe/Berlin", 3600)
            .with_dst(dst_enabled)
    }

    fn convert(array: &FakeArray, spec: &[(&str, &str)], now: DateTime<Utc>) -> QosParams {
        get_qos_param_at(&raw(spec), array, now, utc()).unwrap()
    }

    #[test]
    fn limits_only() {
        let array = FakeArray::new();
        let params = convert(&array, &[("maxIOPS", "1000")], at(2025, 7, 10, 12));

        assert_eq!(params.max_iops, 1000);
        assert_eq!(params.max_mbps, MAX_MBPS_VALUE);
        assert_eq!(params.schedule, None);
        // No schedule, so the array is not asked anything.
        assert!(array.calls().is_empty());
    }

    #[test]
    fn aliases_and_priority() {
        let array = FakeArray::new();
        let now = at(2025, 7, 10, 12);

        let params = convert(&array, &[("maxIOPS", "500"), ("total_iops_sec", "900")], now);
        assert_eq!(params.max_iops, 500);

        let params = convert(&array, &[("total_iops_sec", "900")], now);
        assert_eq!(params.max_iops, 900);

        let params = convert(&array, &[("total_bytes_sec", "104857600")], now);
        assert_eq!(params.max_mbps, 100);
        assert_eq!(params.max_iops, MAX_IOPS_VALUE);

        let params = convert(&array, &[("maxMBPS", "50"), ("total_bytes_sec", "104857600")], now);
        assert_eq!(params.max_mbps, 50);
    }

    #[test]
    fn bad_values() {
        let array = FakeArray::new();
        let now = at(2025, 7, 10, 12);
        for spec in [
            vec![("maxIOPS", "0")],
            vec![("maxIOPS", "-5")],
            vec![("maxIOPS", "+5")],
            vec![("total_bytes_sec", "+104857600")],
            vec![("total_bytes_sec", "1000")],
            vec![("maxIOPS", "10"), ("burst", "1")],
            vec![("scheduleType", "2")],
            vec![("maxIOPS", "10"), ("scheduleType", "7")],
            vec![("maxIOPS", "10"), ("startTime", "08:00")],
        ] {
            let result = get_qos_param_at(&raw(&spec), &array, now, utc());
            assert!(matches!(result, Err(Error::Validation(_))), "{spec:?}");
        }
    }

    #[test]
    fn weekly_needs_every_field() {
        let array = FakeArray::new();
        let spec = raw(&[("maxIOPS", "100"), ("scheduleType", "3"), ("dayOfWeek", "Mon")]);

        let err = get_qos_param_at(&spec, &array, at(2025, 7, 10, 12), utc()).unwrap_err();

        let Error::Validation(message) = err else {
            panic!("unexpected error: {err}");
        };
        assert!(message.contains("but 1 of them"), "{message}");
    }

    #[test]
    fn weekly_schedule() {
        let array = FakeArray::new();
        let params = convert(
            &array,
            &[
                ("maxIOPS", "100"),
                ("scheduleType", "3"),
                ("startDate", "2025-07-20"),
                ("startTime", "12:00"),
                ("durationTime", "24:00"),
                ("dayOfWeek", "Sun Wed Sat"),
            ],
            at(2025, 7, 10, 12),
        );

        let schedule = params.schedule.unwrap();
        assert_eq!(schedule.schedule_type, ScheduleType::Weekly);
        assert_eq!(schedule.day_of_week, Some(1 + 8 + 64));
        assert_eq!(schedule.duration_time, Some(86400));
        // 12:00 in Shanghai is 04:00 UTC, same day.
        assert_eq!(schedule.start_time, Some(4 * 3600));
        assert_eq!(schedule.start_date, Some(epoch(2025, 7, 20)));
    }

    #[test]
    fn daily_rejects_day_of_week() {
        let array = FakeArray::new();
        let spec = raw(&[
            ("maxIOPS", "100"),
            ("scheduleType", "2"),
            ("startDate", "2025-07-20"),
            ("startTime", "12:00"),
            ("durationTime", "01:00"),
            ("dayOfWeek", "Mon"),
        ]);

        let result = get_qos_param_at(&spec, &array, at(2025, 7, 10, 12), utc());
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn dst_shifts_across_midnight() {
        let spec = [
            ("maxIOPS", "100"),
            ("scheduleType", "2"),
            ("startDate", "2025-07-20"),
            ("startTime", "00:30"),
            ("durationTime", "01:00"),
        ];

        // Summer in Berlin: UTC+1 plus the DST hour, so 00:30 local is 22:30 UTC the day before.
        let schedule = convert(&berlin(true), &spec, at(2025, 7, 10, 12))
            .schedule
            .unwrap();
        assert_eq!(schedule.start_time, Some(86400 - 5400));
        assert_eq!(schedule.start_date, Some(epoch(2025, 7, 19)));

        // Without DST on the array, only the standard offset applies.
        let schedule = convert(&berlin(false), &spec, at(2025, 7, 10, 12))
            .schedule
            .unwrap();
        assert_eq!(schedule.start_time, Some(86400 - 1800));
        assert_eq!(schedule.start_date, Some(epoch(2025, 7, 19)));

        // In winter the DST hour is not in effect even when enabled.
        let winter = [
            ("maxIOPS", "100"),
            ("scheduleType", "2"),
            ("startDate", "2026-01-20"),
            ("startTime", "02:00"),
            ("durationTime", "01:00"),
        ];
        let schedule = convert(&berlin(true), &winter, at(2026, 1, 10, 12))
            .schedule
            .unwrap();
        assert_eq!(schedule.start_time, Some(3600));
        assert_eq!(schedule.start_date, Some(epoch(2026, 1, 20)));
    }

    #[test]
    fn west_zone_shifts_forward() {
        let array = FakeArray::new().with_time_zone("America/Bogota", -5 * 3600);
        let schedule = convert(
            &array,
            &[
                ("maxIOPS", "100"),
                ("scheduleType", "1"),
                ("startDate", "2025-07-20"),
                ("startTime", "23:00"),
                ("durationTime", "02:00"),
            ],
            at(2025, 7, 10, 12),
        )
        .schedule
        .unwrap();

        assert_eq!(schedule.start_time, Some(4 * 3600));
        assert_eq!(schedule.start_date, Some(epoch(2025, 7, 21)));
    }

    #[test]
    fn start_date_in_the_past() {
        let array = FakeArray::new();
        let spec = |date: &str| {
            raw(&[
                ("maxIOPS", "100"),
                ("scheduleType", "1"),
                ("startDate", date),
                ("startTime", "12:00"),
                ("durationTime", "01:00"),
            ])
        };
        let now = at(2025, 7, 10, 12);

        assert!(get_qos_param_at(&spec("2025-07-09"), &array, now, utc()).is_err());
        assert!(get_qos_param_at(&spec("2025-07-10"), &array, now, utc()).is_ok());

        // 20:00 UTC is already the next day in Shanghai.
        let late = at(2025, 7, 10, 20);
        assert!(get_qos_param_at(&spec("2025-07-10"), &array, late, utc()).is_err());
        assert!(get_qos_param_at(&spec("2025-07-11"), &array, late, utc()).is_ok());
    }

    #[test]
    fn start_date_uses_client_offset() {
        let array = FakeArray::new();
        let spec = raw(&[
            ("maxIOPS", "100"),
            ("scheduleType", "1"),
            ("startDate", "2025-07-20"),
            ("startTime", "12:00"),
            ("durationTime", "01:00"),
        ]);
        let client = FixedOffset::east_opt(2 * 3600).unwrap();

        let params = get_qos_param_at(&spec, &array, at(2025, 7, 10, 12), client).unwrap();

        assert_eq!(
            params.schedule.unwrap().start_date,
            Some(epoch(2025, 7, 20) - 2 * 3600)
        );
    }

    #[test]
    fn old_firmware_has_no_schedules() {
        let array = FakeArray::new().with_version("6.3.0");
        let spec = raw(&[
            ("maxIOPS", "100"),
            ("scheduleType", "1"),
            ("startDate", "2025-07-20"),
            ("startTime", "12:00"),
            ("durationTime", "01:00"),
        ]);

        let result = get_qos_param_at(&spec, &array, at(2025, 7, 10, 12), utc());

        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(array.calls_to("get_system_time_zone"), 0);

        // Plain limits still work.
        convert(&array, &[("maxIOPS", "100")], at(2025, 7, 10, 12));
    }

    #[test]
    fn legacy_zone_name() {
        let array = FakeArray::new().with_time_zone("Asia/Beijing", 8 * 3600);
        let schedule = convert(
            &array,
            &[
                ("maxIOPS", "100"),
                ("scheduleType", "2"),
                ("startDate", "2025-07-20"),
                ("startTime", "23:30"),
                ("durationTime", "00:30"),
            ],
            at(2025, 7, 10, 12),
        )
        .schedule
        .unwrap();

        assert_eq!(schedule.start_time, Some(84600 - 28800));
        assert_eq!(schedule.start_date, Some(epoch(2025, 7, 20)));
    }

    #[test]
    fn policy_body() {
        let array = FakeArray::new();
        let params = convert(
            &array,
            &[
                ("maxIOPS", "100"),
                ("maxMBPS", "20"),
                ("scheduleType", "2"),
                ("startDate", "2025-07-20"),
                ("startTime", "08:00"),
                ("durationTime", "01:00"),
            ],
            at(2025, 7, 10, 12),
        );

        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            serde_json::json!({
                "maxIOPS": 100,
                "maxMBPS": 20,
                "scheduleType": 2,
                "startDate": epoch(2025, 7, 20),
                "startTime": 0,
                "durationTime": 3600,
            })
        );
    }

    #[test]
    fn policy_lifecycle() {
        let array = FakeArray::new();
        let manager = QosManager::new(&array);

        let attachment = manager
            .add("volume-1", &raw(&[("maxIOPS", "100")]))
            .unwrap();
        assert!(attachment.created);
        assert_eq!(attachment.name, "OpenStack_volume-1");

        manager
            .update("volume-1", &raw(&[("maxIOPS", "300")]))
            .unwrap();
        assert_eq!(array.qos_policy("OpenStack_volume-1").unwrap().max_iops, 300);

        manager.remove("volume-1").unwrap();
        assert!(array.qos_names().is_empty());
        assert_eq!(array.get_qos_by_volume("volume-1").unwrap(), None);

        // Removing again is harmless.
        manager.remove("volume-1").unwrap();
    }

    #[test]
    fn shared_policy_is_kept() {
        let array = FakeArray::new();
        let manager = QosManager::new(&array);
        let attachment = manager
            .add("volume-1", &raw(&[("maxIOPS", "100")]))
            .unwrap();
        array
            .associate_qos_with_volume("volume-2", &attachment.name)
            .unwrap();

        manager.remove("volume-1").unwrap();

        assert_eq!(array.qos_names(), vec!["OpenStack_volume-1"]);
        assert_eq!(array.calls_to("delete_qos"), 0);
    }

    #[test]
    fn existing_policy_is_taken_over() {
        let array = FakeArray::new();
        let manager = QosManager::new(&array);
        manager
            .add("volume-1", &raw(&[("maxIOPS", "100")]))
            .unwrap();
        array
            .disassociate_qos_with_volume("volume-1", "OpenStack_volume-1")
            .unwrap();

        let attachment = manager
            .add("volume-1", &raw(&[("maxIOPS", "200")]))
            .unwrap();

        assert!(!attachment.created);
        assert_eq!(array.qos_policy("OpenStack_volume-1").unwrap().max_iops, 200);
        assert_eq!(array.calls_to("modify_qos"), 1);
    }

    #[test]
    fn failed_association_removes_new_policy() {
        let array = FakeArray::new();
        array.fail("associate_qos_with_volume", Injected::Business(50158010));

        let err = QosManager::new(&array)
            .add("volume-1", &raw(&[("maxIOPS", "100")]))
            .unwrap_err();

        assert!(matches!(err, Error::Array(ref e) if e.code() == Some(50158010)));
        assert!(array.qos_names().is_empty());
        assert_eq!(array.calls_to("delete_qos"), 1);
    }
}
