use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Opaque service identity plus free-form metadata.
///
/// `id` is unique per service; it keys the local cache and names the tree
/// node holding the route under the route root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ServiceDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One network endpoint of a service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One routing entry: a service and the addresses it is reachable at.
/// Stored as one tree node named after `descriptor.id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRoute {
    pub descriptor: ServiceDescriptor,
    pub addresses: Vec<Address>,
}

impl ServiceRoute {
    pub fn new(descriptor: ServiceDescriptor, addresses: Vec<Address>) -> Self {
        Self {
            descriptor,
            addresses,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }
}
