use crate::annotations::{decode_status, NetworkStatus, StatusDecodeError};
use crate::namescheme::from_network_status;
use std::collections::BTreeMap;
use tracing::warn;
use virtnet_core::topology::filter_sriov_interfaces;
use virtnet_core::{Interface, Network};

const EMPTY_MAP: &str = "{}";

fn resolve(
    networks: &[Network],
    interfaces: &[Interface],
    statuses: &[NetworkStatus],
) -> Option<BTreeMap<String, String>> {
    let pod_names = from_network_status(networks, statuses);
    let mut map = BTreeMap::new();
    for iface in filter_sriov_interfaces(interfaces) {
        let Some(pod_interface_name) = pod_names.get(&iface.name) else {
            warn!("No pod interface name for SR-IOV interface {}", iface.name);
            return None;
        };
        let Some(status) = statuses.iter().find(|s| &s.interface == pod_interface_name) else {
            warn!(
                "No network-status entry for SR-IOV interface {} ({})",
                iface.name, pod_interface_name
            );
            return None;
        };
        let Some(address) = status.pci_address() else {
            warn!("No PCI address reported for SR-IOV interface {}", iface.name);
            return None;
        };
        map.insert(iface.name.clone(), address.to_string());
    }
    Some(map)
}

/// Interface name to PCI address map for SR-IOV interfaces, as a JSON object.
///
/// Any interface that cannot be resolved yields `{}` rather than a partial map.
pub fn build_pci_map(networks: &[Network], interfaces: &[Interface], raw_status: Option<&str>) -> String {
    let statuses = match decode_status(raw_status) {
        Ok(statuses) => statuses,
        Err(StatusDecodeError::Absent) => Vec::new(),
        Err(e) => {
            warn!("Cannot build PCI map: {}", e);
            return EMPTY_MAP.to_string();
        }
    };

    match resolve(networks, interfaces, &statuses) {
        Some(map) => serde_json::to_string(&map).unwrap_or_else(|e| {
            warn!("Failed to encode PCI map: {}", e);
            EMPTY_MAP.to_string()
        }),
        None => EMPTY_MAP.to_string(),
    }
}
