//! Record types for the DeviceNode inventory.
//!
//! A [`DeviceNode`] is the single per-node record listing the storage
//! devices present on that node. It is keyed by [`NodeKey`] and carries the
//! [`OwnerReference`]s that tie it to the object responsible for its
//! lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::KeyError;

/// A storage device as reported by the device inventory provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Kernel device name (e.g., "sda", "nvme0n1")
    pub name: String,
    /// Device node path (e.g., "/dev/sda")
    pub path: String,
    /// Capacity in bytes
    pub capacity: u64,
    /// Model string reported by the device, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Serial number reported by the device, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    /// Whether the device is rotational media
    #[serde(default)]
    pub rotational: bool,
}

impl Device {
    /// Creates a device with the given name, path and capacity.
    pub fn new(name: impl Into<String>, path: impl Into<String>, capacity: u64) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            capacity,
            model: None,
            serial: None,
            rotational: false,
        }
    }

    /// Sets the model string.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the serial number.
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Marks the device as rotational.
    pub fn with_rotational(mut self, rotational: bool) -> Self {
        self.rotational = rotational;
        self
    }
}

/// Reference from a record to the object that owns it.
///
/// The owner may garbage-collect the record when it goes away. Only `uid`
/// identifies the owner; the remaining fields are descriptive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    /// API version of the owner (e.g., "v1")
    pub api_version: String,
    /// Kind of the owner (e.g., "Node")
    pub kind: String,
    /// Name of the owner
    pub name: String,
    /// Unique identity of the owner
    pub uid: String,
    /// Whether the owner is the managing controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
    /// Whether deletion of the owner is blocked until this record is removed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_owner_deletion: Option<bool>,
}

impl OwnerReference {
    /// Creates a controller reference: `controller` and
    /// `block_owner_deletion` are both set.
    pub fn controller_ref(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        uid: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            uid: uid.into(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

/// Identity of a record: namespace and name.
///
/// The textual form is `namespace/name`, or just `name` when the namespace
/// is empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    /// Namespace of the record
    pub namespace: String,
    /// Name of the record (the node identifier)
    pub name: String,
}

impl NodeKey {
    /// Creates a new key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parses a `namespace/name` (or bare `name`) key.
    pub fn parse(key: &str) -> Result<Self, KeyError> {
        let mut parts = key.split('/');
        let (namespace, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) => ("", name),
            (Some(namespace), Some(name), None) => (namespace, name),
            _ => return Err(KeyError::invalid(key)),
        };

        if name.is_empty() {
            return Err(KeyError::invalid(key));
        }

        Ok(Self::new(namespace, name))
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for NodeKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Object metadata shared by stored records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Namespace of the record
    pub namespace: String,
    /// Name of the record
    pub name: String,
    /// Store-assigned unique identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Store-assigned version token used for optimistic concurrency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Store-assigned creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Owners of this record
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
}

/// The per-node device inventory record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceNode {
    /// Record metadata
    pub metadata: ObjectMeta,
    /// Devices present on the node
    #[serde(default)]
    pub devices: Vec<Device>,
}

impl DeviceNode {
    /// Returns the key identifying this record.
    pub fn key(&self) -> NodeKey {
        NodeKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// Returns the store-assigned version token, if any.
    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }
}

/// Builder for new [`DeviceNode`] records.
///
/// Store-assigned metadata (uid, version, creation time) is left empty.
#[derive(Debug, Default)]
pub struct DeviceNodeBuilder {
    namespace: String,
    name: String,
    devices: Vec<Device>,
    owner_references: Vec<OwnerReference>,
}

impl DeviceNodeBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets namespace and name from a key.
    pub fn with_key(mut self, key: &NodeKey) -> Self {
        self.namespace = key.namespace.clone();
        self.name = key.name.clone();
        self
    }

    /// Sets the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the device list.
    pub fn with_devices(mut self, devices: Vec<Device>) -> Self {
        self.devices = devices;
        self
    }

    /// Adds an owner reference.
    pub fn with_owner_reference(mut self, owner: OwnerReference) -> Self {
        self.owner_references.push(owner);
        self
    }

    /// Builds the record. Fails if the name is empty.
    pub fn build(self) -> Result<DeviceNode, KeyError> {
        if self.name.is_empty() {
            return Err(KeyError::invalid(format!("{}/", self.namespace)));
        }

        Ok(DeviceNode {
            metadata: ObjectMeta {
                namespace: self.namespace,
                name: self.name,
                owner_references: self.owner_references,
                ..ObjectMeta::default()
            },
            devices: self.devices,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_node_key_display() {
        assert_eq!(NodeKey::new("openebs", "node-1").to_string(), "openebs/node-1");
        assert_eq!(NodeKey::new("", "node-1").to_string(), "node-1");
    }

    #[test]
    fn test_node_key_parse() {
        assert_eq!(
            NodeKey::parse("openebs/node-1").unwrap(),
            NodeKey::new("openebs", "node-1")
        );
        assert_eq!(NodeKey::parse("node-1").unwrap(), NodeKey::new("", "node-1"));
        assert_eq!(
            "openebs/node-1".parse::<NodeKey>().unwrap(),
            NodeKey::new("openebs", "node-1")
        );
    }

    #[test]
    fn test_node_key_parse_invalid() {
        assert!(NodeKey::parse("a/b/c").is_err());
        assert!(NodeKey::parse("openebs/").is_err());
        assert!(NodeKey::parse("").is_err());
    }

    #[test]
    fn test_builder() {
        let owner = OwnerReference::controller_ref("v1", "Node", "node-1", "uid-1");
        let node = DeviceNodeBuilder::new()
            .with_key(&NodeKey::new("openebs", "node-1"))
            .with_devices(vec![Device::new("sda", "/dev/sda", 1 << 30)])
            .with_owner_reference(owner.clone())
            .build()
            .unwrap();

        assert_eq!(node.key(), NodeKey::new("openebs", "node-1"));
        assert_eq!(node.devices.len(), 1);
        assert_eq!(node.metadata.owner_references, vec![owner]);
        assert_eq!(node.resource_version(), None);
    }

    #[test]
    fn test_builder_requires_name() {
        assert!(DeviceNodeBuilder::new().with_namespace("openebs").build().is_err());
    }

    #[test]
    fn test_record_json_shape() {
        let node = DeviceNodeBuilder::new()
            .with_namespace("openebs")
            .with_name("node-1")
            .with_owner_reference(OwnerReference::controller_ref("v1", "Node", "node-1", "u"))
            .build()
            .unwrap();

        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["metadata"]["ownerReferences"][0]["blockOwnerDeletion"], true);
        assert!(json["metadata"].get("resourceVersion").is_none());
    }
}
