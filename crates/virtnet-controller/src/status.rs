//! Interface status reconciliation
//!
//! Rebuilds `status.interfaces` from the pod's Multus network-status. Entries
//! are ordered primary, secondaries (spec order), then entries for networks
//! outside the declared topology. Info-source bits other than
//! `MULTUS_STATUS` are never touched here.

use crate::annotations::{network_status_from_pod, NetworkStatus};
use crate::error::{ControllerError, Result};
use crate::namescheme::{assign, infer_scheme, PodInterfaceNames};
use std::collections::HashSet;
use tracing::debug;
use virtnet_core::topology::{
    filter_secondary_networks, lookup_default_network, lookup_interface, lookup_network,
    lookup_status,
};
use virtnet_core::{
    InfoSource, Instance, InterfaceStatus, Network, Pod, PRIMARY_POD_INTERFACE_NAME,
};

/// Recompute `instance.status.interfaces` from the pod observation
pub fn update_interface_status(instance: &mut Instance, pod: &Pod) -> Result<()> {
    let observed = network_status_from_pod(pod);
    let prior = &instance.status.interfaces;
    let networks = &instance.spec.networks;

    let mut updated = Vec::with_capacity(prior.len().max(networks.len()));
    if let Some(primary) = lookup_default_network(networks) {
        updated.push(primary_status(primary, prior, &observed));
    }
    updated.extend(secondary_statuses(instance, &observed)?);
    updated.extend(foreign_statuses(instance));

    debug!(
        "Instance {}/{}: {} interface status entries",
        instance.namespace(),
        instance.name(),
        updated.len()
    );
    instance.status.interfaces = updated;
    Ok(())
}

fn primary_status(
    primary: &Network,
    prior: &[InterfaceStatus],
    observed: &[NetworkStatus],
) -> InterfaceStatus {
    let existing = lookup_status(prior, &primary.name);
    let pod_interface_name = observed
        .iter()
        .find(|s| s.default && !s.interface.is_empty())
        .map(|s| s.interface.clone())
        .or_else(|| {
            existing
                .map(|s| s.pod_interface_name.clone())
                .filter(|name| !name.is_empty())
        })
        .unwrap_or_else(|| PRIMARY_POD_INTERFACE_NAME.to_string());

    match existing {
        Some(status) => {
            let mut status = status.clone();
            status.pod_interface_name = pod_interface_name;
            status
        }
        None => InterfaceStatus::new(&primary.name).with_pod_interface_name(pod_interface_name),
    }
}

/// Names the pod got for its secondary networks. The scheme is read from the
/// pod observation, or from prior status when Multus reports no secondaries.
fn secondary_pod_names(instance: &Instance, observed: &[NetworkStatus]) -> PodInterfaceNames {
    let observed_names: Vec<&str> = observed
        .iter()
        .filter(|s| !s.default && !s.interface.is_empty())
        .map(|s| s.interface.as_str())
        .collect();

    let scheme = if observed_names.is_empty() {
        let secondary: HashSet<&str> = filter_secondary_networks(&instance.spec.networks)
            .into_iter()
            .map(|net| net.name.as_str())
            .collect();
        infer_scheme(
            instance
                .status
                .interfaces
                .iter()
                .filter(|s| secondary.contains(s.name.as_str()))
                .map(|s| s.pod_interface_name.as_str()),
        )
    } else {
        infer_scheme(observed_names)
    };
    assign(&instance.spec.networks, scheme)
}

fn secondary_statuses(
    instance: &Instance,
    observed: &[NetworkStatus],
) -> Result<Vec<InterfaceStatus>> {
    let pod_names = secondary_pod_names(instance, observed);
    let interfaces = instance.spec.interfaces();
    let prior = &instance.status.interfaces;

    let mut statuses = Vec::new();
    for network in filter_secondary_networks(&instance.spec.networks) {
        if lookup_interface(interfaces, &network.name).is_some_and(|iface| iface.is_absent()) {
            continue;
        }

        let existing = lookup_status(prior, &network.name);
        let Some(pod_interface_name) = pod_names.get(&network.name) else {
            if existing.is_some() {
                return Err(ControllerError::resolution_error(&network.name));
            }
            continue;
        };
        let reported = observed.iter().any(|s| &s.interface == pod_interface_name);

        let status = match (existing, reported) {
            (None, true) => InterfaceStatus::new(&network.name)
                .with_pod_interface_name(pod_interface_name)
                .with_info_source(InfoSource::MULTUS_STATUS),
            (Some(existing), reported) => {
                let mut status = existing.clone();
                status.info_source.set(InfoSource::MULTUS_STATUS, reported);
                status.pod_interface_name.clone_from(pod_interface_name);
                status
            }
            (None, false) => continue,
        };
        statuses.push(status);
    }
    Ok(statuses)
}

/// Prior entries for networks outside the declared topology, such as
/// interfaces created inside the guest
fn foreign_statuses(instance: &Instance) -> Vec<InterfaceStatus> {
    let interfaces = instance.spec.interfaces();
    instance
        .status
        .interfaces
        .iter()
        .filter(|status| lookup_network(&instance.spec.networks, &status.name).is_none())
        .filter(|status| {
            !lookup_interface(interfaces, &status.name).is_some_and(|iface| iface.is_absent())
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::NETWORK_STATUS_ANNOTATION;
    use std::collections::BTreeMap;
    use virtnet_core::{InstanceSpec, Interface, InterfaceState};

    const STATUS_PRIMARY: &str =
        r#"[{"name":"k8s-pod-network","ips":["10.244.196.146","fd10:244::c491"],"default":true,"dns":{}}]"#;
    const STATUS_PRIMARY_WITH_IFACE: &str = r#"[{"name":"k8s-pod-network","interface":"eth0","ips":["10.244.196.146"],"default":true,"dns":{}}]"#;
    const STATUS_CUSTOM_PRIMARY_AND_SECONDARY: &str = r#"[
        {"name":"k8s-pod-network","interface":"eth0","ips":["10.244.196.146"],"default":false,"dns":{}},
        {"name":"cluster-network","interface":"custom-iface","ips":["10.128.0.4"],"mac":"0a:58:0a:80:00:04","default":true,"dns":{}},
        {"name":"meganet","interface":"pod7e0055a6880","mac":"8a:37:d9:e7:0f:18","dns":{}}
    ]"#;
    const STATUS_PRIMARY_AND_SECONDARY: &str = r#"[
        {"name":"k8s-pod-network","ips":["10.244.196.146"],"default":true,"dns":{}},
        {"name":"meganet","interface":"pod7e0055a6880","mac":"8a:37:d9:e7:0f:18","dns":{}}
    ]"#;
    const STATUS_PRIMARY_AND_ORDINAL_SECONDARY: &str = r#"[
        {"name":"k8s-pod-network","ips":["10.244.196.146"],"default":true,"dns":{}},
        {"name":"meganet","interface":"net1","mac":"8a:37:d9:e7:0f:18","dns":{}}
    ]"#;

    fn pod(network_status: Option<&str>) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some("virt-launcher-vm1".to_string());
        pod.metadata.annotations = network_status.map(|raw| {
            BTreeMap::from([(NETWORK_STATUS_ANNOTATION.to_string(), raw.to_string())])
        });
        pod
    }

    fn primary_only() -> Instance {
        Instance::new(
            "default",
            "vm1",
            InstanceSpec::new(vec![Interface::bridge("default")], vec![Network::pod("default")]),
        )
    }

    fn secondary_only(prior: Vec<InterfaceStatus>) -> Instance {
        let mut instance = Instance::new(
            "default",
            "vm1",
            InstanceSpec::new(
                vec![Interface::bridge("iface1")],
                vec![Network::multus("iface1", "meganet")],
            ),
        );
        instance.status.interfaces = prior;
        instance
    }

    fn primary_and_secondary() -> Instance {
        Instance::new(
            "default",
            "vm1",
            InstanceSpec::new(
                vec![Interface::bridge("default"), Interface::bridge("iface1")],
                vec![Network::pod("default"), Network::multus("iface1", "meganet")],
            ),
        )
    }

    #[test]
    fn test_no_networks_no_status() {
        for raw in [None, Some(STATUS_PRIMARY)] {
            let mut instance = Instance::new("default", "vm1", InstanceSpec::default());
            update_interface_status(&mut instance, &pod(raw)).unwrap();
            assert!(instance.status.interfaces.is_empty());
        }
    }

    #[test]
    fn test_primary_status_synthesized() {
        for raw in [None, Some(STATUS_PRIMARY), Some(STATUS_PRIMARY_WITH_IFACE)] {
            let mut instance = primary_only();
            update_interface_status(&mut instance, &pod(raw)).unwrap();
            assert_eq!(
                instance.status.interfaces,
                vec![InterfaceStatus::new("default").with_pod_interface_name("eth0")]
            );
        }
    }

    #[test]
    fn test_primary_status_keeps_info_source() {
        let both = InfoSource::DOMAIN | InfoSource::GUEST_AGENT;
        for raw in [None, Some(STATUS_PRIMARY), Some(STATUS_PRIMARY_WITH_IFACE)] {
            let mut instance = primary_only();
            instance.status.interfaces = vec![InterfaceStatus::new("default").with_info_source(both)];
            update_interface_status(&mut instance, &pod(raw)).unwrap();
            assert_eq!(
                instance.status.interfaces,
                vec![InterfaceStatus::new("default")
                    .with_pod_interface_name("eth0")
                    .with_info_source(both)]
            );
        }
    }

    #[test]
    fn test_multus_default_network_is_primary() {
        let mut instance = Instance::new(
            "default",
            "vm1",
            InstanceSpec::new(
                vec![Interface::bridge("alternative")],
                vec![Network::multus_default("alternative", "alternativeNAD")],
            ),
        );
        let raw = r#"[{"name":"alternativeNAD","ips":["10.244.196.146"],"default":true,"dns":{}}]"#;
        update_interface_status(&mut instance, &pod(Some(raw))).unwrap();
        assert_eq!(
            instance.status.interfaces,
            vec![InterfaceStatus::new("alternative").with_pod_interface_name("eth0")]
        );
    }

    #[test]
    fn test_secondary_not_reported_has_no_status() {
        let mut instance = secondary_only(vec![]);
        update_interface_status(&mut instance, &pod(None)).unwrap();
        assert!(instance.status.interfaces.is_empty());
    }

    #[test]
    fn test_secondary_reported_hashed_and_ordinal() {
        for (raw, expected) in [
            (STATUS_PRIMARY_AND_SECONDARY, "pod7e0055a6880"),
            (STATUS_PRIMARY_AND_ORDINAL_SECONDARY, "net1"),
        ] {
            let mut instance = secondary_only(vec![]);
            update_interface_status(&mut instance, &pod(Some(raw))).unwrap();
            assert_eq!(
                instance.status.interfaces,
                vec![InterfaceStatus::new("iface1")
                    .with_pod_interface_name(expected)
                    .with_info_source(InfoSource::MULTUS_STATUS)]
            );
        }
    }

    #[test]
    fn test_primary_and_secondary_with_custom_primary_name() {
        for (raw, primary_name) in [
            (STATUS_PRIMARY_AND_SECONDARY, "eth0"),
            (STATUS_CUSTOM_PRIMARY_AND_SECONDARY, "custom-iface"),
        ] {
            let mut instance = primary_and_secondary();
            update_interface_status(&mut instance, &pod(Some(raw))).unwrap();
            assert_eq!(
                instance.status.interfaces,
                vec![
                    InterfaceStatus::new("default").with_pod_interface_name(primary_name),
                    InterfaceStatus::new("iface1")
                        .with_pod_interface_name("pod7e0055a6880")
                        .with_info_source(InfoSource::MULTUS_STATUS),
                ]
            );
        }
    }

    #[test]
    fn test_primary_added_to_existing_secondary_status() {
        let mut instance = primary_and_secondary();
        instance.status.interfaces =
            vec![InterfaceStatus::new("iface1").with_info_source(InfoSource::MULTUS_STATUS)];
        update_interface_status(&mut instance, &pod(Some(STATUS_PRIMARY_AND_SECONDARY))).unwrap();
        assert_eq!(
            instance.status.interfaces,
            vec![
                InterfaceStatus::new("default").with_pod_interface_name("eth0"),
                InterfaceStatus::new("iface1")
                    .with_pod_interface_name("pod7e0055a6880")
                    .with_info_source(InfoSource::MULTUS_STATUS),
            ]
        );
    }

    #[test]
    fn test_multus_bit_removed_when_no_longer_reported() {
        let mut instance = secondary_only(vec![InterfaceStatus::new("iface1")
            .with_pod_interface_name("pod7e0055a6880")
            .with_info_source(InfoSource::MULTUS_STATUS)]);
        update_interface_status(&mut instance, &pod(Some(STATUS_PRIMARY))).unwrap();
        assert_eq!(
            instance.status.interfaces,
            vec![InterfaceStatus::new("iface1").with_pod_interface_name("pod7e0055a6880")]
        );
    }

    #[test]
    fn test_other_info_sources_survive() {
        let sources = InfoSource::GUEST_AGENT | InfoSource::DOMAIN;
        let mut instance =
            secondary_only(vec![InterfaceStatus::new("iface1").with_info_source(sources)]);
        update_interface_status(&mut instance, &pod(Some(STATUS_PRIMARY))).unwrap();
        assert_eq!(
            instance.status.interfaces,
            vec![InterfaceStatus::new("iface1")
                .with_pod_interface_name("pod7e0055a6880")
                .with_info_source(sources)]
        );

        update_interface_status(&mut instance, &pod(Some(STATUS_PRIMARY_AND_SECONDARY))).unwrap();
        assert_eq!(
            instance.status.interfaces[0].info_source,
            sources | InfoSource::MULTUS_STATUS
        );
    }

    #[test]
    fn test_empty_info_source_entry_kept() {
        let mut instance = secondary_only(vec![InterfaceStatus::new("iface1")]);
        update_interface_status(&mut instance, &pod(Some(STATUS_PRIMARY))).unwrap();
        assert_eq!(
            instance.status.interfaces,
            vec![InterfaceStatus::new("iface1").with_pod_interface_name("pod7e0055a6880")]
        );
    }

    #[test]
    fn test_guest_internal_interface_kept_last() {
        let mut guest = InterfaceStatus::new("").with_info_source(InfoSource::GUEST_AGENT);
        guest.ip = Some("192.168.50.10".to_string());
        let mut instance = secondary_only(vec![guest.clone()]);

        update_interface_status(&mut instance, &pod(Some(STATUS_PRIMARY_AND_SECONDARY))).unwrap();
        assert_eq!(
            instance.status.interfaces,
            vec![
                InterfaceStatus::new("iface1")
                    .with_pod_interface_name("pod7e0055a6880")
                    .with_info_source(InfoSource::MULTUS_STATUS),
                guest,
            ]
        );
    }

    #[test]
    fn test_absent_interface_status_dropped() {
        let mut instance = Instance::new(
            "default",
            "vm1",
            InstanceSpec::new(
                vec![Interface::bridge("iface1").with_state(InterfaceState::Absent)],
                vec![Network::multus("iface1", "meganet")],
            ),
        );
        instance.status.interfaces = vec![InterfaceStatus::new("iface1")
            .with_pod_interface_name("pod7e0055a6880")
            .with_info_source(InfoSource::DOMAIN)];

        update_interface_status(&mut instance, &pod(Some(STATUS_PRIMARY))).unwrap();
        assert!(instance.status.interfaces.is_empty());
    }

    #[test]
    fn test_ordinal_name_kept_when_multus_reports_no_secondaries() {
        let mut instance = secondary_only(vec![InterfaceStatus::new("iface1")
            .with_pod_interface_name("net1")
            .with_info_source(InfoSource::MULTUS_STATUS | InfoSource::DOMAIN)]);
        update_interface_status(&mut instance, &pod(Some(STATUS_PRIMARY))).unwrap();
        assert_eq!(
            instance.status.interfaces,
            vec![InterfaceStatus::new("iface1")
                .with_pod_interface_name("net1")
                .with_info_source(InfoSource::DOMAIN)]
        );
    }
}
