//! Multus pod annotations: the network-selection request we write and the
//! network-status report the meta-plugin writes back.

pub mod merge;
pub mod pod;
pub mod selection;
pub mod status;

pub use merge::merge_selection;
pub use pod::{
    generate_pod_annotations, interfaces_and_networks_for_selection_update,
    selection_annotation_update,
};
pub use selection::{encode_selection, split_attachment_ref, NetworkSelectionElement};
pub use status::{decode_status, network_status_from_pod, NetworkStatus, StatusDecodeError};

/// Network-selection request read by Multus
pub const NETWORK_SELECTION_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";
/// Network-status report written by Multus
pub const NETWORK_STATUS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/network-status";
/// Overrides the cluster default network for the pod
pub const DEFAULT_NETWORK_ANNOTATION: &str = "v1.multus-cni.io/default-network";
/// Interface name to PCI address of passthrough devices
pub const PCI_MAP_ANNOTATION: &str = "kubevirt.io/network-pci-map";

/// CNI argument naming the logical network a binding plugin serves
pub const LOGIC_NETWORK_NAME_ARG: &str = "logicNetworkName";
