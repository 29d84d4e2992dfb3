//! Peer discovery
//!
//! Radio scanning is out of reach here, so discovery is a trait with a
//! static implementation fed from configuration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::errors::Result;
use crate::types::{ConnectionInfo, ConnectionType, Endpoint};

/// How to look for peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    /// Bluetooth service discovery
    BluetoothSdp,
    /// TCP peers
    Tcp,
}

impl DiscoveryMethod {
    pub fn connection_type(&self) -> ConnectionType {
        match self {
            DiscoveryMethod::BluetoothSdp => ConnectionType::Bluetooth,
            DiscoveryMethod::Tcp => ConnectionType::Tcp,
        }
    }
}

/// A peer found by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub name: String,
    pub endpoint: Endpoint,
}

impl DiscoveredDevice {
    pub fn new(name: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            name: name.into(),
            endpoint,
        }
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo::new(self.endpoint.clone())
    }
}

pub type DiscoveredDevices = SmallVec<[DiscoveredDevice; 8]>;

/// Source of reachable peers
#[async_trait]
pub trait PeerDiscovery: Send + Sync {
    async fn discover_peers(&self, method: DiscoveryMethod) -> Result<DiscoveredDevices>;
}

/// Discovery over a fixed list of known peers
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    devices: Vec<DiscoveredDevice>,
}

impl StaticDiscovery {
    pub fn new(devices: Vec<DiscoveredDevice>) -> Self {
        Self { devices }
    }

    pub fn add_device(&mut self, device: DiscoveredDevice) {
        if !self.devices.contains(&device) {
            self.devices.push(device);
        }
    }
}

#[async_trait]
impl PeerDiscovery for StaticDiscovery {
    async fn discover_peers(&self, method: DiscoveryMethod) -> Result<DiscoveredDevices> {
        let wanted = method.connection_type();
        let found: DiscoveredDevices = self
            .devices
            .iter()
            .filter(|d| d.endpoint.connection_type() == wanted)
            .cloned()
            .collect();
        debug!(?method, count = found.len(), "peer discovery finished");
        Ok(found)
    }
}
