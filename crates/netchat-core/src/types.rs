//! Core types for netchat
//!
//! Endpoints, Bluetooth addressing and connection descriptions. Bluetooth
//! values are plain data here; no radio is touched.

use core::fmt;
use core::str::FromStr;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{NetchatError, Result};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Service identifier the demo programs listen and connect on
pub const DEMO_SERVICE_ID: Uuid = Uuid::from_u128(0x3a768eea_cbda_4926_a82d_831cb89092aa);

/// Hardcoded peer address used by the console demo
pub const DEMO_PEER_ADDRESS: BluetoothAddress = BluetoothAddress::from_u64(0xE0B9_A5FB_552B);

// ----------------------------------------------------------------------------
// Network Identifier
// ----------------------------------------------------------------------------

/// Identifies one comms manager instance across all of its connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NetworkIdentifier(Uuid);

impl NetworkIdentifier {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for NetworkIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The short form is enough to tell peers apart in logs
        let simple = self.0.simple().to_string();
        write!(f, "{}", &simple[..8])
    }
}

// ----------------------------------------------------------------------------
// Bluetooth Addressing
// ----------------------------------------------------------------------------

/// 48-bit Bluetooth device address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BluetoothAddress([u8; 6]);

impl BluetoothAddress {
    /// Build from the low 48 bits of a u64
    pub const fn from_u64(value: u64) -> Self {
        let b = value.to_be_bytes();
        Self([b[2], b[3], b[4], b[5], b[6], b[7]])
    }

    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn to_u64(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    }
}

impl fmt::Display for BluetoothAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for BluetoothAddress {
    type Err = NetchatError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || NetchatError::InvalidAddress {
            input: s.to_string(),
        };

        let trimmed = s.trim();
        let clean: String = if trimmed.contains(':') || trimmed.contains('-') {
            let parts: Vec<&str> = trimmed.split([':', '-']).collect();
            if parts.len() != 6 || parts.iter().any(|p| p.len() != 2) {
                return Err(invalid());
            }
            parts.concat()
        } else {
            trimmed
                .strip_prefix("0x")
                .or_else(|| trimmed.strip_prefix("0X"))
                .unwrap_or(trimmed)
                .to_string()
        };

        if clean.is_empty() || clean.len() > 12 {
            return Err(invalid());
        }
        let value = u64::from_str_radix(&clean, 16).map_err(|_| invalid())?;
        Ok(Self::from_u64(value))
    }
}

/// A Bluetooth device address paired with a service identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BluetoothEndpoint {
    pub address: BluetoothAddress,
    pub service_id: Uuid,
}

impl BluetoothEndpoint {
    pub fn new(address: BluetoothAddress, service_id: Uuid) -> Self {
        Self {
            address,
            service_id,
        }
    }
}

impl fmt::Display for BluetoothEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.service_id)
    }
}

// ----------------------------------------------------------------------------
// Endpoints
// ----------------------------------------------------------------------------

/// Kind of connection an endpoint is reached over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Tcp,
    Bluetooth,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Tcp => write!(f, "TCP"),
            ConnectionType::Bluetooth => write!(f, "Bluetooth"),
        }
    }
}

/// Network endpoint
///
/// Text forms: `tcp://127.0.0.1:10000`, `127.0.0.1:10000`,
/// `bt://E0:B9:A5:FB:55:2B` and `bt://E0:B9:A5:FB:55:2B/<service uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    Tcp(SocketAddr),
    Bluetooth(BluetoothEndpoint),
}

impl Endpoint {
    pub fn connection_type(&self) -> ConnectionType {
        match self {
            Endpoint::Tcp(_) => ConnectionType::Tcp,
            Endpoint::Bluetooth(_) => ConnectionType::Bluetooth,
        }
    }

    /// Endpoint of the demo peer on the demo service
    pub fn demo_bluetooth_peer() -> Self {
        Endpoint::Bluetooth(BluetoothEndpoint::new(DEMO_PEER_ADDRESS, DEMO_SERVICE_ID))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "{}", addr),
            Endpoint::Bluetooth(bt) => write!(f, "bt://{}", bt),
        }
    }
}

impl FromStr for Endpoint {
    type Err = NetchatError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("bt://") {
            let (address, service_id) = match rest.split_once('/') {
                Some((address, service)) => {
                    let service_id = Uuid::parse_str(service)
                        .map_err(|e| NetchatError::invalid_endpoint(s, e.to_string()))?;
                    (address, service_id)
                }
                None => (rest, DEMO_SERVICE_ID),
            };
            let address = address.parse::<BluetoothAddress>()?;
            return Ok(Endpoint::Bluetooth(BluetoothEndpoint::new(address, service_id)));
        }

        let addr = s.strip_prefix("tcp://").unwrap_or(s);
        addr.parse::<SocketAddr>()
            .map(Endpoint::Tcp)
            .map_err(|e| NetchatError::invalid_endpoint(s, e.to_string()))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = NetchatError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        match endpoint {
            Endpoint::Tcp(addr) => format!("tcp://{}", addr),
            other => other.to_string(),
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::Tcp(addr)
    }
}

// ----------------------------------------------------------------------------
// Connection Info
// ----------------------------------------------------------------------------

/// Describes one side's view of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub connection_type: ConnectionType,
    pub remote_endpoint: Endpoint,
    pub local_endpoint: Option<Endpoint>,
    /// Learned from the remote's setup packet; `None` until it arrives
    pub remote_network_identifier: Option<NetworkIdentifier>,
    /// Endpoints the remote accepts connections on, from its setup packet
    pub remote_listen_endpoints: Vec<Endpoint>,
}

impl ConnectionInfo {
    /// Describe a connection target that has not been established yet
    pub fn new(remote_endpoint: Endpoint) -> Self {
        Self {
            connection_type: remote_endpoint.connection_type(),
            remote_endpoint,
            local_endpoint: None,
            remote_network_identifier: None,
            remote_listen_endpoints: Vec::new(),
        }
    }

    pub fn with_local_endpoint(mut self, local_endpoint: Endpoint) -> Self {
        self.local_endpoint = Some(local_endpoint);
        self
    }

    /// True when this connection leads to the peer `target` describes
    ///
    /// Matches the dialled endpoint, any endpoint the peer announced it
    /// listens on, or a known network identifier.
    pub fn reaches(&self, target: &ConnectionInfo) -> bool {
        self.remote_endpoint == target.remote_endpoint
            || self.remote_listen_endpoints.contains(&target.remote_endpoint)
            || (target.remote_network_identifier.is_some()
                && self.remote_network_identifier == target.remote_network_identifier)
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.local_endpoint {
            Some(local) => write!(
                f,
                "[{}] {} -> {}",
                self.connection_type, local, self.remote_endpoint
            ),
            None => write!(f, "[{}] -> {}", self.connection_type, self.remote_endpoint),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_address_formats() {
        assert_eq!(DEMO_PEER_ADDRESS.to_string(), "E0:B9:A5:FB:55:2B");
        assert_eq!(DEMO_PEER_ADDRESS.to_u64(), 0xE0B9A5FB552B);
        assert_eq!(
            DEMO_SERVICE_ID.to_string(),
            "3a768eea-cbda-4926-a82d-831cb89092aa"
        );
    }

    #[test]
    fn test_address_parse_forms() {
        let colon: BluetoothAddress = "e0:b9:a5:fb:55:2b".parse().unwrap();
        let bare: BluetoothAddress = "0xE0B9A5FB552B".parse().unwrap();
        assert_eq!(colon, DEMO_PEER_ADDRESS);
        assert_eq!(bare, DEMO_PEER_ADDRESS);

        assert!("E0:B9:A5".parse::<BluetoothAddress>().is_err());
        assert!("1234567890ABCD".parse::<BluetoothAddress>().is_err());
        assert!("zz".parse::<BluetoothAddress>().is_err());
    }

    #[test]
    fn test_endpoint_parse() {
        let tcp: Endpoint = "tcp://127.0.0.1:10000".parse().unwrap();
        assert_eq!(tcp.connection_type(), ConnectionType::Tcp);
        assert_eq!(tcp, "127.0.0.1:10000".parse().unwrap());

        let bt: Endpoint = "bt://E0:B9:A5:FB:55:2B".parse().unwrap();
        assert_eq!(bt, Endpoint::demo_bluetooth_peer());

        assert!("not-an-endpoint".parse::<Endpoint>().is_err());
        assert!("bt://E0:B9:A5:FB:55:2B/nope".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_connection_info_display() {
        let info = ConnectionInfo::new("127.0.0.1:2000".parse().unwrap())
            .with_local_endpoint("127.0.0.1:1000".parse().unwrap());
        assert_eq!(info.to_string(), "[TCP] 127.0.0.1:1000 -> 127.0.0.1:2000");
    }

    #[test]
    fn test_connection_reaches_announced_peer() {
        let peer = NetworkIdentifier::generate();
        let mut incoming = ConnectionInfo::new("127.0.0.1:53211".parse().unwrap());
        incoming.remote_network_identifier = Some(peer);
        incoming.remote_listen_endpoints = vec!["127.0.0.1:10000".parse().unwrap()];

        // Dialling the peer's listen endpoint finds the link it opened to us
        assert!(incoming.reaches(&ConnectionInfo::new("127.0.0.1:10000".parse().unwrap())));
        assert!(incoming.reaches(&ConnectionInfo::new("127.0.0.1:53211".parse().unwrap())));

        let mut by_identifier = ConnectionInfo::new("127.0.0.1:1".parse().unwrap());
        by_identifier.remote_network_identifier = Some(peer);
        assert!(incoming.reaches(&by_identifier));

        assert!(!incoming.reaches(&ConnectionInfo::new("127.0.0.1:10001".parse().unwrap())));
        assert!(!ConnectionInfo::new("127.0.0.1:1".parse().unwrap())
            .reaches(&ConnectionInfo::new("127.0.0.1:2".parse().unwrap())));
    }
}
