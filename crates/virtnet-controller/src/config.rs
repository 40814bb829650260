use crate::error::{ControllerError, Result};
use std::collections::BTreeMap;

/// Default debounce window before a pending migration is escalated
pub const DEFAULT_MIGRATION_GRACE_SECS: i64 = 15;

/// A registered network binding plugin
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingPlugin {
    /// Attachment definition (`namespace/name` or `name`) the plugin needs in
    /// the pod, if any
    pub network_attachment_definition: Option<String>,
}

/// Binding plugins known to the cluster, keyed by plugin name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingPluginRegistry {
    plugins: BTreeMap<String, BindingPlugin>,
}

impl BindingPluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, plugin: BindingPlugin) {
        self.plugins.insert(name.into(), plugin);
    }

    pub fn get(&self, name: &str) -> Option<&BindingPlugin> {
        self.plugins.get(name)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Parse `name` or `name=attachment` entries
    pub fn from_entries<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            let (name, nad) = match entry.split_once('=') {
                Some((name, nad)) => (name.trim(), Some(nad.trim())),
                None => (entry, None),
            };
            if name.is_empty() {
                return Err(ControllerError::configuration_error(
                    format!("binding plugin entry '{}' has no name", entry),
                    "Use the form <plugin>=<namespace>/<attachment> or <plugin>",
                ));
            }
            if nad == Some("") {
                return Err(ControllerError::configuration_error(
                    format!("binding plugin '{}' has an empty attachment definition", name),
                    "Drop the '=' or name the attachment definition",
                ));
            }
            registry.register(
                name,
                BindingPlugin {
                    network_attachment_definition: nad.map(str::to_string),
                },
            );
        }
        Ok(registry)
    }
}

/// Configuration for the network controller
#[derive(Debug, Clone)]
pub struct NetworkControllerConfig {
    pub binding_plugins: BindingPluginRegistry,
    /// How long a pending migration may stay pending before it is forced
    pub migration_grace_period: chrono::Duration,
}

impl Default for NetworkControllerConfig {
    fn default() -> Self {
        Self {
            binding_plugins: BindingPluginRegistry::default(),
            migration_grace_period: chrono::Duration::seconds(DEFAULT_MIGRATION_GRACE_SECS),
        }
    }
}
