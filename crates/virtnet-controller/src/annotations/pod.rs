use super::{
    encode_selection, merge_selection, network_status_from_pod, DEFAULT_NETWORK_ANNOTATION,
    NETWORK_SELECTION_ANNOTATION, NETWORK_STATUS_ANNOTATION, PCI_MAP_ANNOTATION,
};
use crate::config::BindingPluginRegistry;
use crate::error::Result;
use crate::namescheme::{from_network_status, infer_from_network_status, map_from_observed_status};
use crate::pci::build_pci_map;
use std::collections::BTreeMap;
use tracing::debug;
use virtnet_core::topology::{
    filter_networks_by_interfaces, filter_sriov_interfaces, lookup_default_network,
    statuses_by_name,
};
use virtnet_core::{Instance, Interface, Network, Pod};

fn pod_annotation<'a>(pod: &'a Pod, key: &str) -> Option<&'a str> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(String::as_str)
}

/// Annotations the instance's pod must carry for its networks.
///
/// The naming scheme is taken from the pod's network-status when present,
/// so an already running pod keeps its interface names.
pub fn generate_pod_annotations(
    instance: &Instance,
    pod: &Pod,
    plugins: &BindingPluginRegistry,
) -> Result<BTreeMap<String, String>> {
    let networks = &instance.spec.networks;
    let interfaces = instance.spec.interfaces();
    let observed = network_status_from_pod(pod);
    let pod_names = from_network_status(networks, &observed);

    let mut annotations = BTreeMap::new();
    let selection = encode_selection(
        instance.namespace(),
        interfaces,
        networks,
        &pod_names,
        plugins,
    )?;
    if !selection.is_empty() {
        annotations.insert(NETWORK_SELECTION_ANNOTATION.to_string(), selection);
    }

    if let Some(multus) = lookup_default_network(networks).and_then(Network::multus_source) {
        annotations.insert(
            DEFAULT_NETWORK_ANNOTATION.to_string(),
            multus.network_name.clone(),
        );
    }

    if !filter_sriov_interfaces(interfaces).is_empty() {
        annotations.insert(
            PCI_MAP_ANNOTATION.to_string(),
            build_pci_map(
                networks,
                interfaces,
                pod_annotation(pod, NETWORK_STATUS_ANNOTATION),
            ),
        );
    }

    Ok(annotations)
}

/// Non-absent interfaces and their networks, when the pod's selection must
/// change: some secondary interface is not plugged yet, or one is being
/// unplugged. `None` when no change is needed.
pub fn interfaces_and_networks_for_selection_update(
    instance: &Instance,
) -> Option<(Vec<Interface>, Vec<Network>)> {
    let all_interfaces = instance.spec.interfaces();
    let interfaces: Vec<Interface> = all_interfaces
        .iter()
        .filter(|iface| !iface.is_absent())
        .cloned()
        .collect();
    let networks = filter_networks_by_interfaces(&instance.spec.networks, &interfaces);

    let statuses = statuses_by_name(&instance.status.interfaces);
    let hotplug_pending = networks
        .iter()
        .filter(|net| net.is_secondary())
        .any(|net| !statuses.contains_key(net.name.as_str()));
    let hotunplug_pending = interfaces.len() != all_interfaces.len();

    if hotplug_pending || hotunplug_pending {
        Some((interfaces, networks))
    } else {
        None
    }
}

fn parse_selection(raw: &str) -> Option<serde_json::Value> {
    if raw.trim().is_empty() {
        return Some(serde_json::Value::Array(Vec::new()));
    }
    serde_json::from_str(raw).ok()
}

/// Selections are compared as JSON so formatting differences do not count
fn same_selection(current: &str, merged: &str) -> bool {
    match (parse_selection(current), parse_selection(merged)) {
        (Some(current), Some(merged)) => current == merged,
        _ => current == merged,
    }
}

/// New value of the pod's network-selection annotation after a topology
/// change, or `None` when the current value is already right
pub fn selection_annotation_update(
    instance: &Instance,
    pod: &Pod,
    plugins: &BindingPluginRegistry,
) -> Result<Option<String>> {
    let Some((interfaces, networks)) = interfaces_and_networks_for_selection_update(instance)
    else {
        return Ok(None);
    };

    let observed = network_status_from_pod(pod);
    // Names already recorded for networks that stay plugged are kept
    let pod_names = map_from_observed_status(
        &networks,
        &instance.status.interfaces,
        infer_from_network_status(&observed),
    );

    let generated = encode_selection(
        instance.namespace(),
        &interfaces,
        &networks,
        &pod_names,
        plugins,
    )?;
    let current = pod_annotation(pod, NETWORK_SELECTION_ANNOTATION).unwrap_or("");
    let merged = merge_selection(current, &generated)?;

    if same_selection(current, &merged) {
        debug!(
            "Pod selection for instance {}/{} already up to date",
            instance.namespace(),
            instance.name()
        );
        return Ok(None);
    }
    Ok(Some(merged))
}
