use super::LOGIC_NETWORK_NAME_ARG;
use crate::config::BindingPluginRegistry;
use crate::error::{ControllerError, Result};
use crate::namescheme::PodInterfaceNames;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use virtnet_core::topology::lookup_interface;
use virtnet_core::{Interface, Network};

/// One element of the network-selection annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSelectionElement {
    pub name: String,
    pub namespace: String,
    #[serde(rename = "interface", default, skip_serializing_if = "Option::is_none")]
    pub interface_request: Option<String>,
    #[serde(rename = "mac", default, skip_serializing_if = "Option::is_none")]
    pub mac_request: Option<String>,
    #[serde(rename = "cni-args", default, skip_serializing_if = "Option::is_none")]
    pub cni_args: Option<BTreeMap<String, serde_json::Value>>,
}

/// Split `namespace/name`, using `default_namespace` when there is no namespace part
pub fn split_attachment_ref(reference: &str, default_namespace: &str) -> (String, String) {
    match reference.split_once('/') {
        Some((namespace, name)) => (namespace.to_string(), name.to_string()),
        None => (default_namespace.to_string(), reference.to_string()),
    }
}

fn secondary_element(
    namespace: &str,
    network: &Network,
    iface: Option<&Interface>,
    pod_names: &PodInterfaceNames,
) -> Result<Option<NetworkSelectionElement>> {
    let Some(multus) = network.multus_source().filter(|_| network.is_secondary()) else {
        return Ok(None);
    };
    let pod_interface_name = pod_names
        .get(&network.name)
        .ok_or_else(|| ControllerError::resolution_error(&network.name))?;
    let (nad_namespace, nad_name) = split_attachment_ref(&multus.network_name, namespace);

    Ok(Some(NetworkSelectionElement {
        name: nad_name,
        namespace: nad_namespace,
        interface_request: Some(pod_interface_name.clone()),
        mac_request: iface.and_then(|i| i.mac_address.clone()),
        cni_args: None,
    }))
}

fn plugin_element(
    namespace: &str,
    iface: &Interface,
    plugins: &BindingPluginRegistry,
) -> Result<Option<NetworkSelectionElement>> {
    let Some(plugin_name) = iface.binding_plugin() else {
        return Ok(None);
    };
    let plugin = plugins
        .get(plugin_name)
        .ok_or_else(|| ControllerError::unregistered_binding_plugin(plugin_name, &iface.name))?;
    let Some(nad) = plugin.network_attachment_definition.as_deref() else {
        return Ok(None);
    };
    let (nad_namespace, nad_name) = split_attachment_ref(nad, namespace);

    let mut args = BTreeMap::new();
    args.insert(
        LOGIC_NETWORK_NAME_ARG.to_string(),
        serde_json::Value::String(iface.name.clone()),
    );
    Ok(Some(NetworkSelectionElement {
        name: nad_name,
        namespace: nad_namespace,
        interface_request: None,
        mac_request: None,
        cni_args: Some(args),
    }))
}

/// Build the network-selection annotation value.
///
/// Elements follow network order: a secondary Multus network contributes its
/// attachment request, and an interface with a binding plugin contributes the
/// plugin's attachment. Returns an empty string when nothing is selected.
pub fn encode_selection(
    namespace: &str,
    interfaces: &[Interface],
    networks: &[Network],
    pod_names: &PodInterfaceNames,
    plugins: &BindingPluginRegistry,
) -> Result<String> {
    let mut elements = Vec::new();
    for network in networks {
        let iface = lookup_interface(interfaces, &network.name);
        if let Some(element) = secondary_element(namespace, network, iface, pod_names)? {
            elements.push(element);
        }
        if let Some(iface) = iface {
            if let Some(element) = plugin_element(namespace, iface, plugins)? {
                elements.push(element);
            }
        }
    }

    if elements.is_empty() {
        return Ok(String::new());
    }
    serde_json::to_string(&elements).map_err(|e| {
        ControllerError::internal_error(format!("Failed to encode network selection: {}", e))
    })
}
