//! Interface hotplug and hotunplug at instance scope
//!
//! The VM template is the desired topology and the instance spec is what is
//! instantiated. Bridge and SR-IOV interfaces added to the VM are appended to
//! the instance, state changes are propagated, and interfaces marked `absent`
//! are dropped from both once no status entry for them remains.

use crate::client::InstanceClient;
use crate::error::{SyncError, FAILED_UPDATE_REASON};
use crate::namescheme::{infer_instance_scheme, NameScheme};
use crate::patch::GuardedPatch;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use virtnet_core::topology::{lookup_network, statuses_by_name};
use virtnet_core::{Instance, InstanceSpec, Interface, InterfaceStatus, Network, VirtualMachine};

/// Drop interfaces marked `absent` that have no status entry left, along
/// with their networks
pub fn clear_detached(
    interfaces: &[Interface],
    networks: &[Network],
    statuses: &HashMap<&str, &InterfaceStatus>,
) -> (Vec<Interface>, Vec<Network>) {
    let detached: HashSet<&str> = interfaces
        .iter()
        .filter(|iface| iface.is_absent() && !statuses.contains_key(iface.name.as_str()))
        .map(|iface| iface.name.as_str())
        .collect();

    let interfaces = interfaces
        .iter()
        .filter(|iface| !detached.contains(iface.name.as_str()))
        .cloned()
        .collect();
    let networks = networks
        .iter()
        .filter(|net| !detached.contains(net.name.as_str()))
        .cloned()
        .collect();
    (interfaces, networks)
}

fn clear_detached_spec(spec: &mut InstanceSpec, statuses: &HashMap<&str, &InterfaceStatus>) {
    let (interfaces, networks) = clear_detached(spec.interfaces(), &spec.networks, statuses);
    spec.domain.devices.interfaces = interfaces;
    spec.networks = networks;
}

/// Pods named with ordinal interface names cannot detach a network without
/// renumbering the ones after it. An unknown scheme counts as ordinal.
pub fn has_legacy_ordinal_names(instance: &Instance) -> bool {
    infer_instance_scheme(instance) != Some(NameScheme::Hashed)
}

/// Apply the VM's interface requests to a copy of the instance spec
pub fn apply_dynamic_request(
    vm_spec: &InstanceSpec,
    instance_spec: &InstanceSpec,
    has_legacy_ordinal_names: bool,
) -> InstanceSpec {
    let mut updated = instance_spec.clone();

    for vm_iface in vm_spec.interfaces() {
        let existing = updated
            .domain
            .devices
            .interfaces
            .iter()
            .position(|iface| iface.name == vm_iface.name);

        let Some(index) = existing else {
            if vm_iface.is_absent() || !vm_iface.is_hot_attachable() {
                debug!(
                    "Interface {} ({} binding, state {}) is not hot-pluggable",
                    vm_iface.name,
                    vm_iface.binding.kind(),
                    vm_iface.state
                );
                continue;
            }
            let Some(network) = lookup_network(&vm_spec.networks, &vm_iface.name) else {
                warn!("Interface {} has no matching network, skipping hotplug", vm_iface.name);
                continue;
            };
            info!("Hotplugging interface {}", vm_iface.name);
            updated.domain.devices.interfaces.push(vm_iface.clone());
            updated.networks.push(network.clone());
            continue;
        };

        let iface = &mut updated.domain.devices.interfaces[index];
        if iface.state == vm_iface.state || iface.is_absent() {
            continue;
        }
        if has_legacy_ordinal_names && vm_iface.is_absent() {
            info!(
                "Not unplugging interface {}: pod uses ordinal interface names",
                vm_iface.name
            );
            continue;
        }
        debug!(
            "Interface {} state {} -> {}",
            iface.name, iface.state, vm_iface.state
        );
        iface.state = vm_iface.state;
    }

    updated
}

/// Outcome of the pure part of a sync pass
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPlan {
    /// VM with fully detached interfaces removed
    pub vm: VirtualMachine,
    /// New instance topology, `None` when the instance needs no patch
    pub instance_spec: Option<InstanceSpec>,
}

/// Compute the VM and instance topology updates for one pass
pub fn plan_sync(vm: &VirtualMachine, instance: &Instance) -> SyncPlan {
    let statuses = statuses_by_name(&instance.status.interfaces);

    let mut vm_copy = vm.clone();
    clear_detached_spec(vm_copy.template_spec_mut(), &statuses);

    let legacy = has_legacy_ordinal_names(instance);
    let mut instance_spec =
        apply_dynamic_request(vm_copy.template_spec(), &instance.spec, legacy);
    clear_detached_spec(&mut instance_spec, &statuses);

    let changed = instance_spec.interfaces() != instance.spec.interfaces();
    SyncPlan {
        vm: vm_copy,
        instance_spec: changed.then_some(instance_spec),
    }
}

/// Hotplug reconciler that pushes instance topology changes through an
/// `InstanceClient`
pub struct HotplugReconciler {
    client: Arc<dyn InstanceClient>,
}

impl HotplugReconciler {
    pub fn new(client: Arc<dyn InstanceClient>) -> Self {
        Self { client }
    }

    /// Reconcile `vm` against `instance`, returning the updated VM.
    ///
    /// Does nothing when there is no instance or it is being deleted. On
    /// patch failure the returned `SyncError` still carries the updated VM.
    pub async fn sync(
        &self,
        vm: &VirtualMachine,
        instance: Option<&Instance>,
    ) -> std::result::Result<VirtualMachine, SyncError> {
        let Some(instance) = instance.filter(|i| !i.is_being_deleted()) else {
            return Ok(vm.clone());
        };

        let plan = plan_sync(vm, instance);
        let Some(instance_spec) = plan.instance_spec else {
            debug!(
                "Instance {}/{} interfaces up to date",
                instance.namespace(),
                instance.name()
            );
            return Ok(plan.vm);
        };

        let patch = match GuardedPatch::for_topology(&instance.spec, &instance_spec) {
            Ok(patch) => patch,
            Err(e) => return Err(SyncError::new(FAILED_UPDATE_REASON, e, plan.vm)),
        };

        match self
            .client
            .patch_instance(instance.namespace(), instance.name(), &patch)
            .await
        {
            Ok(_) => {
                info!(
                    "Patched interfaces of instance {}/{}",
                    instance.namespace(),
                    instance.name()
                );
                Ok(plan.vm)
            }
            Err(e) => {
                warn!(
                    "Failed to patch instance {}/{}: {}",
                    instance.namespace(),
                    instance.name(),
                    e
                );
                Err(SyncError::new(FAILED_UPDATE_REASON, e, plan.vm))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ControllerError;
    use crate::mock::MockInstanceStore;
    use crate::migration::evaluate;
    use crate::namescheme::hashed_pod_interface_name;
    use virtnet_core::{ConditionStatus, InfoSource, InterfaceState, Time};

    fn base_spec() -> InstanceSpec {
        InstanceSpec::new(vec![Interface::masquerade("default")], vec![Network::pod("default")])
    }

    fn spec_with_secondary(iface: Interface) -> InstanceSpec {
        let mut spec = base_spec();
        spec.networks
            .push(Network::multus(&iface.name, format!("{}-nad", iface.name)));
        spec.domain.devices.interfaces.push(iface);
        spec
    }

    async fn store_with(instance: &Instance) -> (Arc<MockInstanceStore>, HotplugReconciler) {
        let store = Arc::new(MockInstanceStore::new());
        store.insert(instance.clone()).await;
        let reconciler = HotplugReconciler::new(store.clone());
        (store, reconciler)
    }

    #[tokio::test]
    async fn test_sync_noop_without_instance() {
        let store = Arc::new(MockInstanceStore::new());
        let reconciler = HotplugReconciler::new(store.clone());
        let vm = VirtualMachine::new("default", "vm1", spec_with_secondary(Interface::bridge("foonet")));

        assert_eq!(reconciler.sync(&vm, None).await.unwrap(), vm);
        assert_eq!(store.patch_count().await, 0);
    }

    #[tokio::test]
    async fn test_sync_noop_when_instance_deleted() {
        let mut instance = Instance::new("default", "vm1", base_spec());
        instance.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        let vm = VirtualMachine::new("default", "vm1", spec_with_secondary(Interface::bridge("foonet")));
        let (store, reconciler) = store_with(&instance).await;

        assert_eq!(reconciler.sync(&vm, Some(&instance)).await.unwrap(), vm);
        assert_eq!(store.patch_count().await, 0);
    }

    #[tokio::test]
    async fn test_sync_noop_when_identical() {
        for spec in [InstanceSpec::default(), spec_with_secondary(Interface::bridge("foonet"))] {
            let instance = Instance::new("default", "vm1", spec.clone());
            let vm = VirtualMachine::new("default", "vm1", spec);
            let (store, reconciler) = store_with(&instance).await;

            assert_eq!(reconciler.sync(&vm, Some(&instance)).await.unwrap(), vm);
            assert_eq!(store.patch_count().await, 0);
        }
    }

    #[tokio::test]
    async fn test_sync_patch_failure_is_sync_error() {
        let instance = Instance::new("default", "vm1", base_spec());
        let vm = VirtualMachine::new("default", "vm1", spec_with_secondary(Interface::bridge("foonet")));
        let (store, reconciler) = store_with(&instance).await;
        store.fail_patches_with("test patch error").await;

        let err = reconciler.sync(&vm, Some(&instance)).await.unwrap_err();
        assert!(err.requires_requeue());
        assert_eq!(err.reason(), FAILED_UPDATE_REASON);
        assert!(err.to_string().contains("test patch error"));
        assert_eq!(err.vm(), &vm);
    }

    #[tokio::test]
    async fn test_sync_conflict_is_reported() {
        let instance = Instance::new("default", "vm1", base_spec());
        let vm = VirtualMachine::new("default", "vm1", spec_with_secondary(Interface::bridge("foonet")));
        let (store, reconciler) = store_with(&instance).await;

        let mut stale = instance.clone();
        stale.spec = spec_with_secondary(Interface::bridge("other"));
        let err = reconciler.sync(&vm, Some(&stale)).await.unwrap_err();
        assert!(matches!(err.cause(), ControllerError::ConcurrencyConflict { .. }));
        assert_eq!(store.patch_count().await, 0);
    }

    #[tokio::test]
    async fn test_sync_hotplugs_bridge_and_sriov() {
        for iface in [
            Interface::bridge("foonet"),
            Interface::sriov("foonet"),
            Interface::bridge("foonet").with_state(InterfaceState::LinkDown),
            Interface::bridge("foonet").with_state(InterfaceState::LinkUp),
        ] {
            let instance = Instance::new("default", "vm1", base_spec());
            let vm = VirtualMachine::new("default", "vm1", spec_with_secondary(iface));
            let (store, reconciler) = store_with(&instance).await;

            let updated = reconciler.sync(&vm, Some(&instance)).await.unwrap();
            assert_eq!(updated, vm);

            let stored = store.get_instance("default", "vm1").await.unwrap();
            assert_eq!(&stored.spec, updated.template_spec());
        }
    }

    #[tokio::test]
    async fn test_sync_hotplug_is_idempotent() {
        let mut instance = Instance::new("default", "vm1", base_spec());
        let vm = VirtualMachine::new("default", "vm1", spec_with_secondary(Interface::bridge("foonet")));
        let (store, reconciler) = store_with(&instance).await;

        let first = reconciler.sync(&vm, Some(&instance)).await.unwrap();
        instance = store.get_instance("default", "vm1").await.unwrap();
        let second = reconciler.sync(&first, Some(&instance)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.patch_count().await, 1);
    }

    #[tokio::test]
    async fn test_sync_clears_new_absent_interface() {
        let instance = Instance::new("default", "vm1", base_spec());
        let vm = VirtualMachine::new(
            "default",
            "vm1",
            spec_with_secondary(Interface::bridge("absentIface").with_state(InterfaceState::Absent)),
        );
        let (store, reconciler) = store_with(&instance).await;

        let updated = reconciler.sync(&vm, Some(&instance)).await.unwrap();
        assert_eq!(updated.template_spec(), &base_spec());
        assert_eq!(store.patch_count().await, 0);
    }

    #[tokio::test]
    async fn test_sync_marks_interface_for_hotunplug() {
        for current_state in [InterfaceState::Unset, InterfaceState::Absent] {
            let mut instance = Instance::new(
                "default",
                "vm1",
                spec_with_secondary(Interface::bridge("foonet").with_state(current_state)),
            );
            instance.status.interfaces = vec![
                InterfaceStatus::new("default")
                    .with_pod_interface_name("eth0")
                    .with_info_source(InfoSource::DOMAIN),
                InterfaceStatus::new("foonet")
                    .with_pod_interface_name(hashed_pod_interface_name("foonet"))
                    .with_info_source(InfoSource::MULTUS_STATUS | InfoSource::DOMAIN),
            ];
            let mut vm = VirtualMachine::new("default", "vm1", instance.spec.clone());
            vm.template_spec_mut().domain.devices.interfaces[1].state = InterfaceState::Absent;
            let (store, reconciler) = store_with(&instance).await;

            let updated = reconciler.sync(&vm, Some(&instance)).await.unwrap();
            assert_eq!(updated, vm);

            let stored = store.get_instance("default", "vm1").await.unwrap();
            assert_eq!(&stored.spec, updated.template_spec());
        }
    }

    #[tokio::test]
    async fn test_sync_never_hotplugs_plugin_binding() {
        for state in [InterfaceState::Unset, InterfaceState::LinkUp] {
            let instance = Instance::new("default", "vm1", InstanceSpec::default());
            let mut vm_spec = InstanceSpec::default();
            vm_spec.networks.push(Network::multus("foonet", "foonet-nad"));
            vm_spec
                .domain
                .devices
                .interfaces
                .push(Interface::plugin("foonet", "someplugin").with_state(state));
            let vm = VirtualMachine::new("default", "vm1", vm_spec);
            let (store, reconciler) = store_with(&instance).await;

            assert_eq!(reconciler.sync(&vm, Some(&instance)).await.unwrap(), vm);
            let stored = store.get_instance("default", "vm1").await.unwrap();
            assert!(stored.spec.networks.is_empty());
            assert!(stored.spec.interfaces().is_empty());
        }
    }

    #[tokio::test]
    async fn test_sync_clears_unplugged_interfaces() {
        let instance = Instance::new(
            "default",
            "vm1",
            spec_with_secondary(Interface::bridge("foonet").with_state(InterfaceState::Absent)),
        );
        let vm = VirtualMachine::new("default", "vm1", instance.spec.clone());
        let (store, reconciler) = store_with(&instance).await;

        let updated = reconciler.sync(&vm, Some(&instance)).await.unwrap();
        assert_eq!(updated.template_spec(), &base_spec());

        let stored = store.get_instance("default", "vm1").await.unwrap();
        assert_eq!(&stored.spec, updated.template_spec());
    }

    #[tokio::test]
    async fn test_sync_keeps_unplug_when_scheme_unknown() {
        let mut instance =
            Instance::new("default", "vm1", spec_with_secondary(Interface::bridge("foonet")));
        instance.status.interfaces = vec![InterfaceStatus::new("default"), InterfaceStatus::new("foonet")];
        let mut vm = VirtualMachine::new("default", "vm1", instance.spec.clone());
        vm.template_spec_mut().domain.devices.interfaces[1].state = InterfaceState::Absent;
        let (store, reconciler) = store_with(&instance).await;

        assert_eq!(reconciler.sync(&vm, Some(&instance)).await.unwrap(), vm);
        let stored = store.get_instance("default", "vm1").await.unwrap();
        assert!(!stored.spec.interfaces()[1].is_absent());
        assert_eq!(store.patch_count().await, 0);
    }

    #[tokio::test]
    async fn test_sync_keeps_unplug_with_ordinal_names() {
        let mut instance =
            Instance::new("default", "vm1", spec_with_secondary(Interface::bridge("foonet")));
        instance.status.interfaces = vec![
            InterfaceStatus::new("default").with_pod_interface_name("eth0"),
            InterfaceStatus::new("foonet").with_pod_interface_name("net1"),
        ];
        let mut vm = VirtualMachine::new("default", "vm1", instance.spec.clone());
        vm.template_spec_mut().domain.devices.interfaces[1].state = InterfaceState::Absent;
        let (store, reconciler) = store_with(&instance).await;

        assert_eq!(reconciler.sync(&vm, Some(&instance)).await.unwrap(), vm);
        let stored = store.get_instance("default", "vm1").await.unwrap();
        assert!(!stored.spec.interfaces()[1].is_absent());
    }

    #[tokio::test]
    async fn test_sync_propagates_link_state() {
        let states = [
            InterfaceState::LinkUp,
            InterfaceState::LinkDown,
            InterfaceState::Unset,
        ];
        for from in states {
            for to in states.into_iter().chain([InterfaceState::Absent]) {
                let mut instance = Instance::new(
                    "default",
                    "vm1",
                    InstanceSpec::new(
                        vec![Interface::bridge("default").with_state(from)],
                        vec![Network::pod("default")],
                    ),
                );
                instance.status.interfaces = vec![InterfaceStatus::new("default")];
                let mut vm = VirtualMachine::new("default", "vm1", instance.spec.clone());
                vm.template_spec_mut().domain.devices.interfaces[0].state = to;
                let (store, reconciler) = store_with(&instance).await;

                let updated = reconciler.sync(&vm, Some(&instance)).await.unwrap();
                let stored = store.get_instance("default", "vm1").await.unwrap();
                assert_eq!(stored.spec.interfaces(), vm.template_spec().interfaces());
                assert_eq!(stored.spec.networks, updated.template_spec().networks);
            }
        }
    }

    #[tokio::test]
    async fn test_sync_keeps_state_while_unplugging() {
        for to in [
            InterfaceState::LinkUp,
            InterfaceState::LinkDown,
            InterfaceState::Unset,
        ] {
            let mut instance = Instance::new(
                "default",
                "vm1",
                InstanceSpec::new(
                    vec![Interface::bridge("default").with_state(InterfaceState::Absent)],
                    vec![Network::pod("default")],
                ),
            );
            instance.status.interfaces = vec![InterfaceStatus::new("default")];
            let mut vm = VirtualMachine::new("default", "vm1", instance.spec.clone());
            vm.template_spec_mut().domain.devices.interfaces[0].state = to;
            let (store, reconciler) = store_with(&instance).await;

            let updated = reconciler.sync(&vm, Some(&instance)).await.unwrap();
            assert_eq!(updated, vm);
            let stored = store.get_instance("default", "vm1").await.unwrap();
            assert_eq!(stored.spec, instance.spec);
            assert_eq!(store.patch_count().await, 0);
        }
    }

    #[test]
    fn test_clear_detached_keeps_observed() {
        let interfaces = vec![
            Interface::masquerade("default"),
            Interface::bridge("red").with_state(InterfaceState::Absent),
            Interface::bridge("green").with_state(InterfaceState::Absent),
        ];
        let networks = vec![
            Network::pod("default"),
            Network::multus("red", "red-net"),
            Network::multus("green", "green-net"),
        ];
        let statuses = vec![InterfaceStatus::new("red").with_info_source(InfoSource::MULTUS_STATUS)];
        let index = statuses_by_name(&statuses);

        let (interfaces, networks) = clear_detached(&interfaces, &networks, &index);
        let names: Vec<&str> = interfaces.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["default", "red"]);
        assert_eq!(networks.len(), 2);
    }

    #[test]
    fn test_apply_dynamic_request_skips_unmatched_network() {
        let mut vm_spec = base_spec();
        vm_spec.domain.devices.interfaces.push(Interface::bridge("orphan"));
        let updated = apply_dynamic_request(&vm_spec, &base_spec(), false);
        assert_eq!(updated, base_spec());
    }

    #[tokio::test]
    async fn test_bridge_hotplug_then_pending_migration() {
        let instance = Instance::new("default", "vm1", base_spec());
        let vm = VirtualMachine::new("default", "vm1", spec_with_secondary(Interface::bridge("foonet")));
        let (store, reconciler) = store_with(&instance).await;

        assert_eq!(reconciler.sync(&vm, Some(&instance)).await.unwrap(), vm);
        let patched = store.get_instance("default", "vm1").await.unwrap();
        assert_eq!(&patched.spec, vm.template_spec());

        let signal = evaluate(&patched, chrono::Utc::now(), chrono::Duration::seconds(15));
        assert_eq!(signal, ConditionStatus::False);
    }

    #[tokio::test]
    async fn test_hotunplug_waits_for_domain_then_clears() {
        let mut instance =
            Instance::new("default", "vm1", spec_with_secondary(Interface::bridge("foonet")));
        instance.status.interfaces = vec![
            InterfaceStatus::new("default")
                .with_pod_interface_name("eth0")
                .with_info_source(InfoSource::DOMAIN),
            InterfaceStatus::new("foonet")
                .with_pod_interface_name(hashed_pod_interface_name("foonet"))
                .with_info_source(InfoSource::MULTUS_STATUS),
        ];
        let mut vm = VirtualMachine::new("default", "vm1", instance.spec.clone());
        vm.template_spec_mut().domain.devices.interfaces[1].state = InterfaceState::Absent;
        let (store, reconciler) = store_with(&instance).await;

        // Unplug requested, both entries stay until the status entry is gone
        let vm = reconciler.sync(&vm, Some(&instance)).await.unwrap();
        assert_eq!(vm.template_spec().interfaces().len(), 2);
        let mut instance = store.get_instance("default", "vm1").await.unwrap();
        assert_eq!(instance.spec.interfaces().len(), 2);
        assert_eq!(instance.spec.networks.len(), 2);
        assert!(instance.spec.interfaces()[1].is_absent());
        let signal = evaluate(&instance, chrono::Utc::now(), chrono::Duration::seconds(15));
        assert_eq!(signal, ConditionStatus::False);

        instance.status.interfaces.truncate(1);
        let vm = reconciler.sync(&vm, Some(&instance)).await.unwrap();
        assert_eq!(vm.template_spec(), &base_spec());
        let stored = store.get_instance("default", "vm1").await.unwrap();
        assert_eq!(stored.spec, base_spec());
        assert_eq!(store.patch_count().await, 2);
    }

    #[tokio::test]
    async fn test_sync_against_server_document_keeps_unmodeled_fields() {
        let store = Arc::new(MockInstanceStore::new());
        store
            .insert_document(serde_json::json!({
                "metadata": {"name": "vm1", "namespace": "default"},
                "spec": {
                    "domain": {"devices": {"interfaces": [
                        {"name": "default", "masquerade": {}, "model": "virtio", "ports": [{"port": 80}]}
                    ]}},
                    "networks": [{"name": "default", "pod": {}}]
                }
            }))
            .await
            .unwrap();
        let reconciler = HotplugReconciler::new(store.clone());
        let instance = store.get_instance("default", "vm1").await.unwrap();

        let mut vm_spec = instance.spec.clone();
        vm_spec.networks.push(Network::multus("foonet", "foonet-nad"));
        vm_spec.domain.devices.interfaces.push(Interface::bridge("foonet"));
        let vm = VirtualMachine::new("default", "vm1", vm_spec);

        reconciler.sync(&vm, Some(&instance)).await.unwrap();
        let doc = store.document("default", "vm1").await.unwrap();
        assert_eq!(
            doc["spec"]["domain"]["devices"]["interfaces"],
            serde_json::json!([
                {"name": "default", "masquerade": {}, "model": "virtio", "ports": [{"port": 80}]},
                {"name": "foonet", "bridge": {}}
            ])
        );
    }
}
