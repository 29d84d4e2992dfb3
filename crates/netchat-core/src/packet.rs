//! Packets and the payload types carried in them
//!
//! A packet is a header naming its packet type (the routing key handlers are
//! registered under) and payload type (what the payload bytes decode into),
//! followed by the encoded payload.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{FrameError, Result};
use crate::serialization::SendReceiveOptions;
use crate::types::{Endpoint, NetworkIdentifier};

// ----------------------------------------------------------------------------
// Well-known Packet Types
// ----------------------------------------------------------------------------

/// Packet type used by the console demo
pub const MESSAGE_PACKET_TYPE: &str = "Message";

/// Packet type used by the chat app
pub const CHAT_MESSAGE_PACKET_TYPE: &str = "ChatMessage";

/// Reserved packet type both ends send first on a new connection
pub const CONNECTION_SETUP_PACKET_TYPE: &str = "ConnectionSetup";

// ----------------------------------------------------------------------------
// Payload Trait
// ----------------------------------------------------------------------------

/// A value that can travel as a packet payload
///
/// `TYPE_TAG` is written into every header so receivers only hand payloads to
/// handlers registered for that exact type.
pub trait Payload: Serialize + DeserializeOwned + Send + 'static {
    const TYPE_TAG: &'static str;
}

impl Payload for String {
    const TYPE_TAG: &'static str = "string";
}

// ----------------------------------------------------------------------------
// Packet
// ----------------------------------------------------------------------------

/// Packet header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub packet_type: String,
    pub payload_type: String,
    pub options: SendReceiveOptions,
    pub payload_size: u32,
}

/// A complete packet as written to a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Encode `value` with `options` into a packet of `packet_type`
    pub fn new<T: Payload>(
        packet_type: &str,
        value: &T,
        options: SendReceiveOptions,
    ) -> Result<Self> {
        let payload = options.encode(value)?;
        let payload_size = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
            size: payload.len(),
            max_size: u32::MAX as usize,
        })?;
        Ok(Self {
            header: PacketHeader {
                packet_type: packet_type.to_string(),
                payload_type: T::TYPE_TAG.to_string(),
                options,
                payload_size,
            },
            payload,
        })
    }

    /// Decode the payload, checking the declared type and size first
    pub fn decode_payload<T: Payload>(&self) -> Result<T> {
        if self.header.payload_type != T::TYPE_TAG {
            return Err(FrameError::PayloadTypeMismatch {
                expected: T::TYPE_TAG.to_string(),
                actual: self.header.payload_type.clone(),
            }
            .into());
        }
        if self.header.payload_size as usize != self.payload.len() {
            return Err(FrameError::PayloadSizeMismatch {
                declared: self.header.payload_size as usize,
                actual: self.payload.len(),
            }
            .into());
        }
        self.header.options.decode(&self.payload)
    }
}

// ----------------------------------------------------------------------------
// Payloads
// ----------------------------------------------------------------------------

/// First packet on every connection, announcing who is on the other end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSetup {
    pub network_identifier: NetworkIdentifier,
    /// Endpoints the sender accepts connections on
    pub listen_endpoints: Vec<Endpoint>,
}

impl Payload for ConnectionSetup {
    const TYPE_TAG: &'static str = "ConnectionSetup";
}

/// Chat message exchanged by the chat app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Comms instance that authored the message
    pub source_identifier: NetworkIdentifier,
    pub source_name: String,
    pub message: String,
    /// Per-author sequence number, increasing
    pub message_index: u64,
    /// How many times the message has been forwarded
    pub relay_count: u8,
}

impl ChatMessage {
    pub fn new(
        source_identifier: NetworkIdentifier,
        source_name: impl Into<String>,
        message: impl Into<String>,
        message_index: u64,
    ) -> Self {
        Self {
            source_identifier,
            source_name: source_name.into(),
            message: message.into(),
            message_index,
            relay_count: 0,
        }
    }

    /// Copy of this message one relay hop further along
    pub fn relayed(&self) -> Self {
        Self {
            relay_count: self.relay_count.saturating_add(1),
            ..self.clone()
        }
    }
}

impl Payload for ChatMessage {
    const TYPE_TAG: &'static str = "ChatMessage";
}
