use super::NETWORK_STATUS_ANNOTATION;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use virtnet_core::Pod;

/// PCI details of a passthrough device
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PciDevice {
    #[serde(rename = "pci-address", default)]
    pub pci_address: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(rename = "type", default)]
    pub device_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pci: Option<PciDevice>,
}

/// One element of the network-status annotation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub interface: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac: String,
    #[serde(default)]
    pub default: bool,
    #[serde(rename = "device-info", default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
}

impl NetworkStatus {
    /// Non-empty PCI address from the device info, if any
    pub fn pci_address(&self) -> Option<&str> {
        self.device_info
            .as_ref()
            .and_then(|info| info.pci.as_ref())
            .map(|pci| pci.pci_address.as_str())
            .filter(|address| !address.is_empty())
    }
}

#[derive(Error, Debug, Diagnostic)]
pub enum StatusDecodeError {
    #[error("network-status annotation is absent")]
    #[diagnostic(
        code(virtnet::annotations::status_absent),
        help("Multus has not reported the pod networks yet")
    )]
    Absent,

    #[error("network-status annotation is malformed: {message}")]
    #[diagnostic(
        code(virtnet::annotations::status_malformed),
        help("The annotation must be a JSON array of network status objects")
    )]
    Malformed {
        #[allow(unused)]
        message: String,
    },
}

pub fn decode_status(raw: Option<&str>) -> Result<Vec<NetworkStatus>, StatusDecodeError> {
    let raw = raw.map(str::trim).filter(|r| !r.is_empty());
    let Some(raw) = raw else {
        return Err(StatusDecodeError::Absent);
    };
    serde_json::from_str(raw).map_err(|e| StatusDecodeError::Malformed {
        message: e.to_string(),
    })
}

/// Network-status of `pod`; absent or malformed annotations read as empty
pub fn network_status_from_pod(pod: &Pod) -> Vec<NetworkStatus> {
    let raw = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(NETWORK_STATUS_ANNOTATION))
        .map(String::as_str);
    let pod_name = pod.metadata.name.as_deref().unwrap_or("<unknown>");

    match decode_status(raw) {
        Ok(statuses) => statuses,
        Err(StatusDecodeError::Absent) => {
            debug!("Pod {} has no network-status annotation", pod_name);
            Vec::new()
        }
        Err(e) => {
            warn!("Ignoring network-status of pod {}: {}", pod_name, e);
            Vec::new()
        }
    }
}
