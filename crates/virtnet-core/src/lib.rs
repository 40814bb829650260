//! Virtnet Core - record types for VM network interface reconciliation
//!
//! This crate provides:
//! - VM, instance, network, interface and interface-status records
//! - Topology lookup and filter helpers
//! - Error types with miette diagnostics
//! - Serialization helpers

pub mod error;
pub mod topology;
pub mod types;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use types::{
    ConditionStatus, Devices, DomainSpec, InfoSource, Instance, InstanceCondition, InstanceSpec,
    InstanceStatus, InstanceTemplate, Interface, InterfaceBinding, InterfaceState,
    InterfaceStatus, MultusNetwork, Network, NetworkSource, PodNetwork, UnmodeledFields,
    VirtualMachine, VirtualMachineSpec, MIGRATION_REQUIRED_CONDITION, PRIMARY_POD_INTERFACE_NAME,
};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::Pod;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

/// Serialize a record to JSON
pub fn to_json<T: serde::Serialize>(record: &T) -> Result<String> {
    serde_json::to_string(record).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a record to pretty JSON
pub fn to_json_pretty<T: serde::Serialize>(record: &T) -> Result<String> {
    serde_json::to_string_pretty(record).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a record from JSON
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a record to YAML
pub fn to_yaml<T: serde::Serialize>(record: &T) -> Result<String> {
    serde_yaml::to_string(record).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to serialize to YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a record from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Read a record from a file, picking YAML or JSON by extension
pub fn from_file<T: for<'de> serde::Deserialize<'de>>(path: &std::path::Path) -> Result<T> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        CoreError::serialization_error(
            format!("Failed to read {}: {}", path.display(), e),
            Some(Box::new(e)),
        )
    })?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => from_yaml(&data),
        _ => from_json(&data),
    }
}

/// Namespace and name of a record, which must be named to be addressed.
/// A missing namespace means `default`.
pub fn record_key<'a>(metadata: &'a ObjectMeta, kind: &str) -> Result<(&'a str, &'a str)> {
    let name = metadata.name.as_deref().unwrap_or_default();
    if name.is_empty() {
        return Err(CoreError::invalid_record(
            format!("{} has no metadata.name", kind),
            "Set metadata.name so the record can be looked up and patched",
        ));
    }
    Ok((metadata.namespace.as_deref().unwrap_or("default"), name))
}
