//! Which networks the running domain should attach or detach

use serde::Serialize;
use virtnet_core::topology::{filter_secondary_networks, lookup_interface, lookup_status};
use virtnet_core::{InfoSource, Instance, Network};

/// Attach and detach work pending on the running domain
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainPlan {
    pub hotplug: Vec<Network>,
    pub hotunplug: Vec<Network>,
    pub sriov_hotplug_pending: bool,
}

pub fn plan_domain(instance: &Instance) -> DomainPlan {
    DomainPlan {
        hotplug: networks_to_hotplug(instance),
        hotunplug: networks_to_hotunplug(instance),
        sriov_hotplug_pending: sriov_hotplug_pending(instance),
    }
}

/// Secondary networks plugged into the pod by Multus but not yet attached to
/// the domain
pub fn networks_to_hotplug(instance: &Instance) -> Vec<Network> {
    let interfaces = instance.spec.interfaces();
    filter_secondary_networks(&instance.spec.networks)
        .into_iter()
        .filter(|net| lookup_interface(interfaces, &net.name).is_some_and(|i| !i.is_absent()))
        .filter(|net| {
            lookup_status(&instance.status.interfaces, &net.name).is_some_and(|status| {
                status.info_source.contains(InfoSource::MULTUS_STATUS)
                    && !status.info_source.contains(InfoSource::DOMAIN)
            })
        })
        .cloned()
        .collect()
}

/// Secondary networks whose interface is marked `absent`
pub fn networks_to_hotunplug(instance: &Instance) -> Vec<Network> {
    let interfaces = instance.spec.interfaces();
    filter_secondary_networks(&instance.spec.networks)
        .into_iter()
        .filter(|net| lookup_interface(interfaces, &net.name).is_some_and(|i| i.is_absent()))
        .cloned()
        .collect()
}

/// Whether an SR-IOV interface is waiting to be attached to the domain
pub fn sriov_hotplug_pending(instance: &Instance) -> bool {
    let interfaces = instance.spec.interfaces();
    networks_to_hotplug(instance)
        .iter()
        .any(|net| lookup_interface(interfaces, &net.name).is_some_and(|i| i.is_sriov()))
}
