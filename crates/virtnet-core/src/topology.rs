//! Lookup and filter helpers over interface/network/status lists

use crate::types::{Interface, InterfaceStatus, Network};
use std::collections::{HashMap, HashSet};

/// Index status entries by network name. Entries with an empty name
/// (guest-internal interfaces) are not indexed.
pub fn statuses_by_name(statuses: &[InterfaceStatus]) -> HashMap<&str, &InterfaceStatus> {
    let mut index = HashMap::new();
    for status in statuses.iter().filter(|s| !s.name.is_empty()) {
        index.entry(status.name.as_str()).or_insert(status);
    }
    index
}

pub fn lookup_interface<'a>(interfaces: &'a [Interface], name: &str) -> Option<&'a Interface> {
    interfaces.iter().find(|iface| iface.name == name)
}

pub fn lookup_network<'a>(networks: &'a [Network], name: &str) -> Option<&'a Network> {
    networks.iter().find(|net| net.name == name)
}

pub fn lookup_status<'a>(
    statuses: &'a [InterfaceStatus],
    name: &str,
) -> Option<&'a InterfaceStatus> {
    statuses.iter().find(|status| status.name == name)
}

/// The pod network, or the Multus network flagged as default
pub fn lookup_default_network(networks: &[Network]) -> Option<&Network> {
    networks.iter().find(|net| net.is_primary())
}

/// Multus networks that are not the default one, in spec order
pub fn filter_secondary_networks(networks: &[Network]) -> Vec<&Network> {
    networks.iter().filter(|net| net.is_secondary()).collect()
}

pub fn filter_sriov_interfaces(interfaces: &[Interface]) -> Vec<&Interface> {
    interfaces.iter().filter(|iface| iface.is_sriov()).collect()
}

/// Keep the networks that some interface in `interfaces` refers to
pub fn filter_networks_by_interfaces(networks: &[Network], interfaces: &[Interface]) -> Vec<Network> {
    let names: HashSet<&str> = interfaces.iter().map(|iface| iface.name.as_str()).collect();
    networks
        .iter()
        .filter(|net| names.contains(net.name.as_str()))
        .cloned()
        .collect()
}

/// Interfaces whose network is a secondary Multus network, in spec order
pub fn secondary_interfaces<'a>(
    interfaces: &'a [Interface],
    networks: &[Network],
) -> Vec<&'a Interface> {
    let secondary: HashSet<&str> = filter_secondary_networks(networks)
        .into_iter()
        .map(|net| net.name.as_str())
        .collect();
    interfaces
        .iter()
        .filter(|iface| secondary.contains(iface.name.as_str()))
        .collect()
}
