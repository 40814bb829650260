use crate::annotations::{generate_pod_annotations, selection_annotation_update};
use crate::client::InstanceClient;
use crate::config::NetworkControllerConfig;
use crate::domain::{plan_domain, DomainPlan};
use crate::error::{ControllerError, Result, SyncError, FAILED_UPDATE_REASON};
use crate::hotplug::HotplugReconciler;
use crate::migration::{apply_migration_requirement, evaluate};
use crate::status::update_interface_status;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use virtnet_core::{record_key, ConditionStatus, Instance, Pod, VirtualMachine};

/// Network controller wiring the interface reconcilers to an instance client
pub struct NetworkController {
    client: Arc<dyn InstanceClient>,
    hotplug: HotplugReconciler,
    config: NetworkControllerConfig,
}

impl NetworkController {
    pub fn new(client: Arc<dyn InstanceClient>, config: NetworkControllerConfig) -> Self {
        Self {
            hotplug: HotplugReconciler::new(client.clone()),
            client,
            config,
        }
    }

    pub fn config(&self) -> &NetworkControllerConfig {
        &self.config
    }

    /// Push the VM's interface requests to the given instance
    pub async fn sync(
        &self,
        vm: &VirtualMachine,
        instance: Option<&Instance>,
    ) -> std::result::Result<VirtualMachine, SyncError> {
        self.hotplug.sync(vm, instance).await
    }

    /// Fetch the VM's instance through the client, then sync against it.
    /// A VM without an instance is returned unchanged.
    pub async fn sync_vm(
        &self,
        vm: &VirtualMachine,
    ) -> std::result::Result<VirtualMachine, SyncError> {
        let (namespace, name) = record_key(&vm.metadata, "VM")
            .map_err(|e| SyncError::new(FAILED_UPDATE_REASON, e.into(), vm.clone()))?;

        match self.client.get_instance(namespace, name).await {
            Ok(instance) => self.sync(vm, Some(&instance)).await,
            Err(ControllerError::InstanceNotFound { .. }) => {
                debug!("No instance for VM {}/{}, nothing to sync", namespace, name);
                Ok(vm.clone())
            }
            Err(e) => Err(SyncError::new(FAILED_UPDATE_REASON, e, vm.clone())),
        }
    }

    /// Rebuild the instance interface status from its pod
    pub fn update_status(&self, instance: &mut Instance, pod: &Pod) -> Result<()> {
        update_interface_status(instance, pod)?;
        debug!(
            "Instance {}/{} has {} interface status entries",
            instance.namespace(),
            instance.name(),
            instance.status.interfaces.len()
        );
        Ok(())
    }

    /// Evaluate the migration signal at `now` and record it in the instance
    /// conditions
    pub fn evaluate_migration(&self, instance: &mut Instance, now: DateTime<Utc>) -> ConditionStatus {
        let signal = evaluate(instance, now, self.config.migration_grace_period);
        apply_migration_requirement(instance, signal, now);
        if signal == ConditionStatus::True {
            info!(
                "Instance {}/{} requires migration for its interface changes",
                instance.namespace(),
                instance.name()
            );
        }
        signal
    }

    /// Networks the running domain should attach or detach
    pub fn domain_plan(&self, instance: &Instance) -> DomainPlan {
        let plan = plan_domain(instance);
        if plan.sriov_hotplug_pending {
            debug!(
                "Instance {}/{} has an SR-IOV interface waiting for the domain",
                instance.namespace(),
                instance.name()
            );
        }
        plan
    }

    pub fn pod_annotations(&self, instance: &Instance, pod: &Pod) -> Result<BTreeMap<String, String>> {
        generate_pod_annotations(instance, pod, &self.config.binding_plugins)
    }

    pub fn selection_update(&self, instance: &Instance, pod: &Pod) -> Result<Option<String>> {
        selection_annotation_update(instance, pod, &self.config.binding_plugins)
    }
}
