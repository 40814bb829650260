use miette::Diagnostic;
use thiserror::Error;
use virtnet_core::{CoreError, VirtualMachine};

/// Controller error type for network reconciliation
#[derive(Error, Debug, Diagnostic)]
pub enum ControllerError {
    /// An interface references a binding plugin nobody registered
    #[error("Binding plugin '{plugin}' used by interface '{interface}' is not registered")]
    #[diagnostic(
        code(virtnet::controller::unregistered_binding_plugin),
        help("Register the plugin with --binding-plugin {plugin}=<namespace>/<attachment>, or change the interface binding")
    )]
    UnregisteredBindingPlugin {
        #[allow(unused)]
        plugin: String,
        #[allow(unused)]
        interface: String,
    },

    /// Configuration could not be parsed
    #[error("Invalid configuration: {message}")]
    #[diagnostic(
        code(virtnet::controller::configuration_error),
        help("{suggestion}")
    )]
    ConfigurationError {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Pod interface name for a network could not be determined
    #[error("Cannot resolve pod interface name for network '{network}'")]
    #[diagnostic(
        code(virtnet::controller::resolution_error),
        help("The network has status but no naming scheme entry. Check that the instance spec and pod network-status agree")
    )]
    ResolutionError {
        #[allow(unused)]
        network: String,
    },

    /// Guarded patch precondition failed
    #[error("Concurrent modification of instance {namespace}/{name}: {message}")]
    #[diagnostic(
        code(virtnet::controller::concurrency_conflict),
        help("The instance changed between read and patch. Re-read the instance and reconcile again")
    )]
    ConcurrencyConflict {
        #[allow(unused)]
        namespace: String,
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        message: String,
    },

    /// Instance was not found
    #[error("Instance not found: {namespace}/{name}")]
    #[diagnostic(
        code(virtnet::controller::instance_not_found),
        help("Verify the instance exists. It may have been deleted while reconciling")
    )]
    InstanceNotFound {
        #[allow(unused)]
        namespace: String,
        #[allow(unused)]
        name: String,
    },

    /// Patch could not be built or submitted
    #[error("Patch failed for instance {namespace}/{name}: {message}")]
    #[diagnostic(
        code(virtnet::controller::patch_failed),
        help("Check connectivity to the API server and the instance record")
    )]
    PatchFailed {
        #[allow(unused)]
        namespace: String,
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        message: String,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(virtnet::controller::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },

    /// Core error passthrough
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] CoreError),
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    pub fn unregistered_binding_plugin(
        plugin: impl Into<String>,
        interface: impl Into<String>,
    ) -> Self {
        Self::UnregisteredBindingPlugin {
            plugin: plugin.into(),
            interface: interface.into(),
        }
    }

    pub fn configuration_error(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn resolution_error(network: impl Into<String>) -> Self {
        Self::ResolutionError {
            network: network.into(),
        }
    }

    pub fn concurrency_conflict(
        namespace: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ConcurrencyConflict {
            namespace: namespace.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn instance_not_found(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::InstanceNotFound {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn patch_failed(
        namespace: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::PatchFailed {
            namespace: namespace.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Sync failure reason attached when the instance patch is rejected
pub const FAILED_UPDATE_REASON: &str = "FailedUpdate";

/// Hotplug sync failure
///
/// Carries the VM copy with its desired-state edits so the caller can still
/// persist them; instance patch failures do not roll those back.
#[derive(Error, Debug, Diagnostic)]
#[error("Error encountered when trying to patch instance: {source}")]
#[diagnostic(
    code(virtnet::controller::sync_error),
    help("Requeue the VM and retry the reconciliation")
)]
pub struct SyncError {
    reason: String,
    #[source]
    source: ControllerError,
    vm: Box<VirtualMachine>,
}

impl SyncError {
    pub fn new(reason: impl Into<String>, source: ControllerError, vm: VirtualMachine) -> Self {
        Self {
            reason: reason.into(),
            source,
            vm: Box::new(vm),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn requires_requeue(&self) -> bool {
        true
    }

    pub fn cause(&self) -> &ControllerError {
        &self.source
    }

    pub fn vm(&self) -> &VirtualMachine {
        &self.vm
    }

    pub fn into_vm(self) -> VirtualMachine {
        *self.vm
    }
}
