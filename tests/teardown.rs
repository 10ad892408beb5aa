// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dsware_lib::{
        client::ArrayClient,
        connect::{Connector, Orchestrator},
        test_env::{fixture_config, FakeArray},
        Error,
    };

    const INITIATOR: &str = "iqn.1993-08.org.debian:01:compute01";
    const NODE_IQN: &str = "iqn.2006-08.com.example:dsware.node1";

    fn setup() -> (Arc<FakeArray>, Orchestrator) {
        let array = Arc::new(FakeArray::new());
        array.add_target_ports("192.168.10.11", NODE_IQN, &["192.168.10.11"]);
        array.add_target_ports("192.168.10.12", NODE_IQN, &["192.168.10.12"]);
        let config = Arc::new(fixture_config("target_ips"));
        let orchestrator = Orchestrator::new(array.clone(), config).unwrap();
        (array, orchestrator)
    }

    fn connector(host: &str, initiator: &str) -> Connector {
        Connector {
            host: Some(host.to_string()),
            initiator: Some(initiator.to_string()),
            multipath: false,
        }
    }

    fn no_host() -> Connector {
        Connector {
            host: None,
            initiator: None,
            multipath: false,
        }
    }

    fn mutating_calls(array: &FakeArray) -> Vec<String> {
        array
            .calls()
            .into_iter()
            .filter(|call| !call.starts_with("get_"))
            .collect()
    }

    #[test]
    fn last_volume_removes_everything() {
        let (array, orchestrator) = setup();
        let compute01 = connector("compute01", INITIATOR);
        orchestrator.establish("volume-1", &compute01, None).unwrap();

        orchestrator.teardown("volume-1", &compute01).unwrap();

        assert!(array.mappings().is_empty());
        assert!(array.host_names().is_empty());
        assert!(array.group_names().is_empty());
        assert!(array.initiator_names().is_empty());
        assert!(orchestrator.host_locks().is_empty());
    }

    #[test]
    fn teardown_order() {
        let (array, orchestrator) = setup();
        let compute01 = connector("compute01", INITIATOR);
        orchestrator.establish("volume-1", &compute01, None).unwrap();
        array.clear_calls();

        orchestrator.teardown("volume-1", &compute01).unwrap();

        let expected = vec![
            "unmap_volume_from_host compute01 volume-1".to_string(),
            format!("delete_initiator_from_host compute01 {INITIATOR}"),
            format!("remove_initiator_from_array {INITIATOR}"),
            "remove_host_from_hostgroup compute01 OpenStack_compute01".to_string(),
            "delete_hostgroup OpenStack_compute01".to_string(),
            "delete_host compute01".to_string(),
        ];
        assert_eq!(mutating_calls(&array), expected);
    }

    #[test]
    fn host_serving_another_volume_is_kept() {
        let (array, orchestrator) = setup();
        let compute01 = connector("compute01", INITIATOR);
        orchestrator.establish("volume-1", &compute01, None).unwrap();
        orchestrator.establish("volume-2", &compute01, None).unwrap();
        array.clear_calls();

        orchestrator.teardown("volume-1", &compute01).unwrap();

        assert_eq!(
            array.mappings(),
            vec![("compute01".to_string(), "volume-2".to_string())]
        );
        assert_eq!(array.host_names(), vec!["compute01"]);
        assert_eq!(array.group_names(), vec!["OpenStack_compute01"]);
        assert_eq!(array.initiator_names(), vec![INITIATOR]);
        assert_eq!(
            mutating_calls(&array),
            vec!["unmap_volume_from_host compute01 volume-1"]
        );
        assert_eq!(orchestrator.host_locks().len(), 1);
    }

    #[test]
    fn shared_initiator_stays_registered() {
        let (array, orchestrator) = setup();
        orchestrator
            .establish("volume-1", &connector("compute01", INITIATOR), None)
            .unwrap();
        orchestrator
            .establish("volume-2", &connector("compute02", INITIATOR), None)
            .unwrap();

        orchestrator
            .teardown("volume-1", &connector("compute01", INITIATOR))
            .unwrap();

        assert_eq!(array.host_names(), vec!["compute02"]);
        assert_eq!(array.initiator_names(), vec![INITIATOR]);
        assert_eq!(
            array.get_host_associate_initiator(INITIATOR).unwrap(),
            vec!["compute02"]
        );
    }

    #[test]
    fn ambiguous_host_is_refused() {
        let (array, orchestrator) = setup();
        orchestrator
            .establish("volume-1", &connector("compute01", INITIATOR), None)
            .unwrap();
        orchestrator
            .establish(
                "volume-1",
                &connector("compute02", "iqn.1993-08.org.debian:01:compute02"),
                None,
            )
            .unwrap();
        array.clear_calls();

        let err = orchestrator.teardown("volume-1", &no_host()).unwrap_err();

        match err {
            Error::AmbiguousHost { volume, hosts } => {
                assert_eq!(volume, "volume-1");
                assert_eq!(hosts, vec!["compute01", "compute02"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(mutating_calls(&array).is_empty());
        assert_eq!(array.mappings().len(), 2);
    }

    #[test]
    fn host_resolved_from_mapping() {
        let (array, orchestrator) = setup();
        orchestrator
            .establish("volume-1", &connector("compute01", INITIATOR), None)
            .unwrap();

        orchestrator.teardown("volume-1", &no_host()).unwrap();

        assert!(array.mappings().is_empty());
        assert!(array.host_names().is_empty());
    }

    #[test]
    fn unknown_host_is_a_no_op() {
        let (array, orchestrator) = setup();

        orchestrator.teardown("volume-1", &no_host()).unwrap();
        orchestrator
            .teardown("volume-1", &connector("compute01", INITIATOR))
            .unwrap();

        assert_eq!(
            array.calls(),
            vec!["get_hosts_by_volume volume-1", "get_all_host"]
        );
    }

    #[test]
    fn teardown_twice() {
        let (array, orchestrator) = setup();
        let compute01 = connector("compute01", INITIATOR);
        orchestrator.establish("volume-1", &compute01, None).unwrap();

        orchestrator.teardown("volume-1", &compute01).unwrap();
        array.clear_calls();
        orchestrator.teardown("volume-1", &compute01).unwrap();

        assert!(mutating_calls(&array).is_empty());
    }

    #[test]
    fn host_in_foreign_group_is_kept() {
        let (array, orchestrator) = setup();
        array.create_host("compute01").unwrap();
        array.create_hostgroup("rack07").unwrap();
        array.add_host_to_hostgroup("compute01", "rack07").unwrap();
        array.create_host("compute09").unwrap();
        array.add_host_to_hostgroup("compute09", "rack07").unwrap();
        array.map_volume_to_host("compute01", "volume-1").unwrap();

        orchestrator
            .teardown("volume-1", &connector("compute01", INITIATOR))
            .unwrap();

        // compute01 left the group and was deleted; the group still holds compute09.
        assert_eq!(array.host_names(), vec!["compute09"]);
        assert_eq!(array.group_names(), vec!["rack07"]);
    }
}
