//! Pod-local interface naming
//!
//! The primary network always lands on `eth0`. Secondary Multus networks get
//! either a content-hashed name (`pod` + 11 hex chars of sha256) or, for pods
//! started before hashing was introduced, an ordinal name (`net1`, `net2`, ...).
//! A pod keeps whichever scheme it was launched with.

use crate::annotations::NetworkStatus;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use virtnet_core::topology::filter_secondary_networks;
use virtnet_core::{Instance, InterfaceStatus, Network, PRIMARY_POD_INTERFACE_NAME};

const HASHED_PREFIX: &str = "pod";
const HASHED_DIGEST_LEN: usize = 11;
const ORDINAL_PREFIX: &str = "net";

/// Network name to pod interface name
pub type PodInterfaceNames = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameScheme {
    Hashed,
    Ordinal,
}

pub fn hashed_pod_interface_name(network_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(network_name.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}{}", HASHED_PREFIX, &digest[..HASHED_DIGEST_LEN])
}

pub fn ordinal_pod_interface_name(position: usize) -> String {
    format!("{}{}", ORDINAL_PREFIX, position)
}

pub fn is_hashed_name(name: &str) -> bool {
    name.strip_prefix(HASHED_PREFIX).is_some_and(|digest| {
        digest.len() == HASHED_DIGEST_LEN
            && digest
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    })
}

pub fn is_ordinal_name(name: &str) -> bool {
    name.strip_prefix(ORDINAL_PREFIX)
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// Assign pod interface names to `networks` under `scheme`.
///
/// Ordinal positions count secondary networks only, 1-based, in spec order.
pub fn assign(networks: &[Network], scheme: NameScheme) -> PodInterfaceNames {
    let mut names = PodInterfaceNames::new();
    let mut position = 0;
    for net in networks {
        if net.is_primary() {
            names.insert(net.name.clone(), PRIMARY_POD_INTERFACE_NAME.to_string());
        } else if net.is_secondary() {
            position += 1;
            let pod_name = match scheme {
                NameScheme::Hashed => hashed_pod_interface_name(&net.name),
                NameScheme::Ordinal => ordinal_pod_interface_name(position),
            };
            names.insert(net.name.clone(), pod_name);
        }
    }
    names
}

/// Ordinal iff some observed name is ordinal and none is hashed
pub fn infer_scheme<'a>(observed: impl IntoIterator<Item = &'a str>) -> NameScheme {
    let mut saw_ordinal = false;
    for name in observed {
        if is_hashed_name(name) {
            return NameScheme::Hashed;
        }
        saw_ordinal |= is_ordinal_name(name);
    }
    if saw_ordinal {
        NameScheme::Ordinal
    } else {
        NameScheme::Hashed
    }
}

/// Scheme used by a running pod, read from its non-default network-status entries
pub fn infer_from_network_status(statuses: &[NetworkStatus]) -> NameScheme {
    infer_scheme(
        statuses
            .iter()
            .filter(|s| !s.default)
            .map(|s| s.interface.as_str()),
    )
}

/// Reconstruct the names a running pod got from its network-status
pub fn from_network_status(networks: &[Network], statuses: &[NetworkStatus]) -> PodInterfaceNames {
    assign(networks, infer_from_network_status(statuses))
}

/// Prefer names already recorded in instance status, falling back to
/// `assign` for networks without one.
pub fn map_from_observed_status(
    networks: &[Network],
    statuses: &[InterfaceStatus],
    scheme: NameScheme,
) -> PodInterfaceNames {
    let mut names = assign(networks, scheme);
    for status in statuses {
        if status.pod_interface_name.is_empty() {
            continue;
        }
        if let Some(name) = names.get_mut(&status.name) {
            name.clone_from(&status.pod_interface_name);
        }
    }
    names
}

/// Scheme in use by an instance, judged from the pod interface names in its
/// status. `None` when a secondary network has a status entry without a pod
/// interface name, since the scheme cannot be told apart then.
pub fn infer_instance_scheme(instance: &Instance) -> Option<NameScheme> {
    let secondary: HashSet<&str> = filter_secondary_networks(&instance.spec.networks)
        .into_iter()
        .map(|net| net.name.as_str())
        .collect();

    let mut observed = Vec::new();
    for status in &instance.status.interfaces {
        if !secondary.contains(status.name.as_str()) {
            continue;
        }
        if status.pod_interface_name.is_empty() {
            return None;
        }
        observed.push(status.pod_interface_name.as_str());
    }
    Some(infer_scheme(observed))
}
