use crate::error::{ControllerError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use virtnet_core::InstanceSpec;

pub const NETWORKS_PATH: &str = "/spec/networks";
pub const INTERFACES_PATH: &str = "/spec/domain/devices/interfaces";

/// JSON-Patch operation subset used for instance topology updates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Test { path: String, value: Value },
    Add { path: String, value: Value },
}

/// Topology patch guarded by equality preconditions
///
/// Every `add` is preceded by a `test` of the value it replaces, so the patch
/// is rejected when the instance changed since it was read.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardedPatch {
    operations: Vec<PatchOperation>,
}

fn to_value<T: Serialize + ?Sized>(value: &T, what: &str) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| ControllerError::internal_error(format!("Failed to encode {}: {}", what, e)))
}

impl GuardedPatch {
    /// Patch replacing the networks and interfaces of `old` with those of `new`
    pub fn for_topology(old: &InstanceSpec, new: &InstanceSpec) -> Result<Self> {
        let operations = vec![
            PatchOperation::Test {
                path: NETWORKS_PATH.to_string(),
                value: to_value(&old.networks, "networks")?,
            },
            PatchOperation::Add {
                path: NETWORKS_PATH.to_string(),
                value: to_value(&new.networks, "networks")?,
            },
            PatchOperation::Test {
                path: INTERFACES_PATH.to_string(),
                value: to_value(old.interfaces(), "interfaces")?,
            },
            PatchOperation::Add {
                path: INTERFACES_PATH.to_string(),
                value: to_value(new.interfaces(), "interfaces")?,
            },
        ];
        Ok(Self { operations })
    }

    pub fn operations(&self) -> &[PatchOperation] {
        &self.operations
    }

    /// `(path, expected value)` of every test operation
    pub fn preconditions(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.operations.iter().filter_map(|op| match op {
            PatchOperation::Test { path, value } => Some((path.as_str(), value)),
            PatchOperation::Add { .. } => None,
        })
    }

    /// Request body for a `application/json-patch+json` PATCH
    pub fn to_body(&self) -> Result<String> {
        serde_json::to_string(&self.operations)
            .map_err(|e| ControllerError::internal_error(format!("Failed to encode patch: {}", e)))
    }

    pub fn to_json_patch(&self) -> Result<json_patch::Patch> {
        serde_json::from_value(to_value(&self.operations, "patch")?).map_err(|e| {
            ControllerError::internal_error(format!("Patch is not valid JSON-Patch: {}", e))
        })
    }
}
