// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod annotations;
pub mod api_client;
pub mod client;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod hotplug;
pub mod migration;
pub mod mock;
pub mod namescheme;
pub mod patch;
pub mod pci;
pub mod status;

// Re-export primary types
pub use client::InstanceClient;
pub use config::{BindingPlugin, BindingPluginRegistry, NetworkControllerConfig};
pub use error::{ControllerError, Result, SyncError};
pub use mock::MockInstanceStore;
pub use namescheme::{NameScheme, PodInterfaceNames};
pub use patch::{GuardedPatch, PatchOperation};

// Re-export reconcilers and the controller facade
pub use api_client::ApiClient;
pub use controller::NetworkController;
pub use domain::{plan_domain, DomainPlan};
pub use hotplug::{plan_sync, HotplugReconciler, SyncPlan};
pub use migration::{apply_migration_requirement, evaluate, MigrationRequirement};
pub use pci::build_pci_map;
pub use status::update_interface_status;
