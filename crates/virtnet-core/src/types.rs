use bitflags::bitflags;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Pod interface name reserved for the primary network
pub const PRIMARY_POD_INTERFACE_NAME: &str = "eth0";

/// Condition type carrying the migration-required signal
pub const MIGRATION_REQUIRED_CONDITION: &str = "MigrationRequired";

/// Fields of a record this subsystem does not interpret. They are carried
/// through unchanged so a patch built from the record matches the server copy.
pub type UnmodeledFields = BTreeMap<String, serde_json::Value>;

/// Cluster pod network, e.g. `vmNetworkCIDR` settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PodNetwork {
    #[serde(flatten)]
    pub extra: UnmodeledFields,
}

/// Multus network reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultusNetwork {
    /// Attachment definition reference, `namespace/name` or bare `name`
    pub network_name: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
    #[serde(flatten)]
    pub extra: UnmodeledFields,
}

/// Where a network comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkSource {
    Pod(PodNetwork),
    Multus(MultusNetwork),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    #[serde(flatten)]
    pub source: NetworkSource,
    // Must stay after `source` so the variant key is taken first
    #[serde(flatten)]
    pub extra: UnmodeledFields,
}

impl Network {
    pub fn pod(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: NetworkSource::Pod(PodNetwork::default()),
            extra: UnmodeledFields::new(),
        }
    }

    pub fn multus(name: impl Into<String>, network_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: NetworkSource::Multus(MultusNetwork {
                network_name: network_name.into(),
                default: false,
                extra: UnmodeledFields::new(),
            }),
            extra: UnmodeledFields::new(),
        }
    }

    pub fn multus_default(name: impl Into<String>, network_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: NetworkSource::Multus(MultusNetwork {
                network_name: network_name.into(),
                default: true,
                extra: UnmodeledFields::new(),
            }),
            extra: UnmodeledFields::new(),
        }
    }

    pub fn multus_source(&self) -> Option<&MultusNetwork> {
        match &self.source {
            NetworkSource::Multus(multus) => Some(multus),
            NetworkSource::Pod(_) => None,
        }
    }

    /// Pod network or a Multus network flagged as default
    pub fn is_primary(&self) -> bool {
        match &self.source {
            NetworkSource::Pod(_) => true,
            NetworkSource::Multus(multus) => multus.default,
        }
    }

    /// Multus network that is not the default one
    pub fn is_secondary(&self) -> bool {
        matches!(&self.source, NetworkSource::Multus(multus) if !multus.default)
    }
}

/// How an interface is connected to its network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InterfaceBinding {
    Masquerade {},
    Bridge {},
    Sriov {},
    #[serde(rename = "binding")]
    Plugin { name: String },
}

impl InterfaceBinding {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Masquerade {} => "masquerade",
            Self::Bridge {} => "bridge",
            Self::Sriov {} => "sriov",
            Self::Plugin { .. } => "binding",
        }
    }
}

/// Requested link state of an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterfaceState {
    #[default]
    #[serde(rename = "")]
    Unset,
    #[serde(rename = "up")]
    LinkUp,
    #[serde(rename = "down")]
    LinkDown,
    #[serde(rename = "absent")]
    Absent,
}

impl InterfaceState {
    pub fn is_unset(&self) -> bool {
        *self == Self::Unset
    }
}

impl fmt::Display for InterfaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => write!(f, "unset"),
            Self::LinkUp => write!(f, "up"),
            Self::LinkDown => write!(f, "down"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

/// A VM interface
///
/// Settings such as `model`, `ports` or `bootOrder` are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    pub name: String,
    #[serde(flatten)]
    pub binding: InterfaceBinding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "InterfaceState::is_unset")]
    pub state: InterfaceState,
    // Must stay after `binding` so the variant key is taken first
    #[serde(flatten)]
    pub extra: UnmodeledFields,
}

impl Interface {
    pub fn new(name: impl Into<String>, binding: InterfaceBinding) -> Self {
        Self {
            name: name.into(),
            binding,
            mac_address: None,
            state: InterfaceState::Unset,
            extra: UnmodeledFields::new(),
        }
    }

    pub fn masquerade(name: impl Into<String>) -> Self {
        Self::new(name, InterfaceBinding::Masquerade {})
    }

    pub fn bridge(name: impl Into<String>) -> Self {
        Self::new(name, InterfaceBinding::Bridge {})
    }

    pub fn sriov(name: impl Into<String>) -> Self {
        Self::new(name, InterfaceBinding::Sriov {})
    }

    pub fn plugin(name: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self::new(
            name,
            InterfaceBinding::Plugin {
                name: plugin.into(),
            },
        )
    }

    pub fn with_state(mut self, state: InterfaceState) -> Self {
        self.state = state;
        self
    }

    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac_address = Some(mac.into());
        self
    }

    pub fn is_absent(&self) -> bool {
        self.state == InterfaceState::Absent
    }

    pub fn is_sriov(&self) -> bool {
        matches!(self.binding, InterfaceBinding::Sriov {})
    }

    /// Only bridge and SR-IOV bindings can be attached to a running instance
    pub fn is_hot_attachable(&self) -> bool {
        matches!(
            self.binding,
            InterfaceBinding::Bridge {} | InterfaceBinding::Sriov {}
        )
    }

    pub fn binding_plugin(&self) -> Option<&str> {
        match &self.binding {
            InterfaceBinding::Plugin { name } => Some(name),
            _ => None,
        }
    }
}

bitflags! {
    /// Observers currently vouching for an interface status entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InfoSource: u8 {
        const DOMAIN = 1;
        const GUEST_AGENT = 1 << 1;
        const MULTUS_STATUS = 1 << 2;
    }
}

impl InfoSource {
    const NAMES: [(InfoSource, &'static str); 3] = [
        (InfoSource::DOMAIN, "domain"),
        (InfoSource::GUEST_AGENT, "guest-agent"),
        (InfoSource::MULTUS_STATUS, "multus-status"),
    ];

    /// Parse the comma separated record form; unknown tokens are ignored
    pub fn parse(raw: &str) -> Self {
        let mut sources = Self::empty();
        for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if let Some((flag, _)) = Self::NAMES.iter().find(|(_, name)| *name == token) {
                sources.insert(*flag);
            }
        }
        sources
    }
}

impl Default for InfoSource {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for InfoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", names.join(", "))
    }
}

impl Serialize for InfoSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for InfoSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Observed state of one interface
///
/// Fields this subsystem does not interpret are kept in `extra` so they
/// survive a read/modify/write cycle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pod_interface_name: String,
    #[serde(default, skip_serializing_if = "InfoSource::is_empty")]
    pub info_source: InfoSource,
    #[serde(default, rename = "ipAddress", skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_count: Option<i32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl InterfaceStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_pod_interface_name(mut self, pod_interface_name: impl Into<String>) -> Self {
        self.pod_interface_name = pod_interface_name.into();
        self
    }

    pub fn with_info_source(mut self, info_source: InfoSource) -> Self {
        self.info_source = info_source;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Devices {
    #[serde(default)]
    pub interfaces: Vec<Interface>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DomainSpec {
    #[serde(default)]
    pub devices: Devices,
}

/// Network topology shared by the VM template and the instance
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstanceSpec {
    #[serde(default)]
    pub networks: Vec<Network>,
    #[serde(default)]
    pub domain: DomainSpec,
}

impl InstanceSpec {
    pub fn new(interfaces: Vec<Interface>, networks: Vec<Network>) -> Self {
        Self {
            networks,
            domain: DomainSpec {
                devices: Devices { interfaces },
            },
        }
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.domain.devices.interfaces
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstanceStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<InterfaceStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<InstanceCondition>,
}

/// Running execution of a VM
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Instance {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: InstanceSpec,
    #[serde(default)]
    pub status: InstanceStatus,
}

impl Instance {
    pub fn new(namespace: &str, name: &str, spec: InstanceSpec) -> Self {
        Self {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec,
            status: InstanceStatus::default(),
        }
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("")
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn condition(&self, condition_type: &str) -> Option<&InstanceCondition> {
        self.status
            .conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstanceTemplate {
    #[serde(default)]
    pub spec: InstanceSpec,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VirtualMachineSpec {
    #[serde(default)]
    pub template: InstanceTemplate,
}

/// Desired-state record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VirtualMachine {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: VirtualMachineSpec,
}

impl VirtualMachine {
    pub fn new(namespace: &str, name: &str, spec: InstanceSpec) -> Self {
        Self {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: VirtualMachineSpec {
                template: InstanceTemplate { spec },
            },
        }
    }

    pub fn template_spec(&self) -> &InstanceSpec {
        &self.spec.template.spec
    }

    pub fn template_spec_mut(&mut self) -> &mut InstanceSpec {
        &mut self.spec.template.spec
    }
}
