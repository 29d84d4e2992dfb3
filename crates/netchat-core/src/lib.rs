//! netchat core messaging layer
//!
//! Typed packets over length-prefixed frames, a handler registry keyed by
//! packet type and payload type, and a comms manager that listens, connects
//! and dispatches. Configuration is always passed in explicitly.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod comms;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod errors;
pub mod handlers;
pub mod packet;
pub mod serialization;
pub mod types;
pub mod wire;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use comms::CommsManager;
pub use config::CommsConfig;
pub use connection::{Connection, ConnectionId};
pub use discovery::{
    DiscoveredDevice, DiscoveredDevices, DiscoveryMethod, PeerDiscovery, StaticDiscovery,
};
pub use errors::{ConnectionError, FrameError, NetchatError, Result};
pub use handlers::PacketHandlerRegistry;
pub use packet::{
    ChatMessage, Packet, PacketHeader, Payload, CHAT_MESSAGE_PACKET_TYPE, MESSAGE_PACKET_TYPE,
};
pub use serialization::{Compression, SendReceiveOptions, SerializerKind};
pub use types::{
    BluetoothAddress, BluetoothEndpoint, ConnectionInfo, ConnectionType, Endpoint,
    NetworkIdentifier, DEMO_PEER_ADDRESS, DEMO_SERVICE_ID,
};
